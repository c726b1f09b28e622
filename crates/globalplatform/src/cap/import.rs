//! Import component (CAP component tag 4).

use super::header::PackageInfo;
use super::reader::ByteReader;
use crate::error::GpError;

#[derive(Debug, Clone)]
pub struct ImportComponent {
    pub packages: Vec<PackageInfo>,
}

impl ImportComponent {
    pub fn parse(data: &[u8]) -> Result<Self, GpError> {
        let mut reader = ByteReader::new(data);
        let _tag = reader.u8()?;
        let _size = reader.u16()?;
        let count = reader.u8()?;

        let mut packages = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let minor_version = reader.u8()?;
            let major_version = reader.u8()?;
            let aid_len = reader.u8()? as usize;
            let aid = reader.bytes(aid_len)?.to_vec();
            packages.push(PackageInfo {
                minor_version,
                major_version,
                aid,
            });
        }

        Ok(Self { packages })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn parses_import_packages() {
        let mut data = vec![0x04, 0x00, 0x0A, 0x01];
        data.extend_from_slice(&[0x00, 0x01, 0x07]);
        data.extend_from_slice(&hex!("A0000000620001"));

        let component = ImportComponent::parse(&data).unwrap();
        assert_eq!(component.packages.len(), 1);
        assert_eq!(component.packages[0].major_version, 1);
        assert_eq!(component.packages[0].aid, hex!("A0000000620001"));
    }
}
