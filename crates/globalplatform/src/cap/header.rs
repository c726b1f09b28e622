//! Header component (CAP component tag 1).

use super::reader::ByteReader;
use crate::error::GpError;

pub const HEADER_MAGIC: [u8; 4] = [0xDE, 0xCA, 0xFF, 0xED];

const FLAG_INT: u8 = 0x01;
const FLAG_EXPORT: u8 = 0x02;
const FLAG_APPLET: u8 = 0x04;
const FLAG_EXTENDED: u8 = 0x08;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageInfo {
    pub minor_version: u8,
    pub major_version: u8,
    pub aid: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct HeaderComponent {
    pub cap_format_minor: u8,
    pub cap_format_major: u8,
    pub has_int: bool,
    pub has_export: bool,
    pub has_applet: bool,
    pub is_extended: bool,
    /// Only present when `is_extended`.
    pub cap_version: Option<(u8, u8)>,
    pub cap_aid: Option<Vec<u8>>,
    /// Extended archives may describe more than one package; compact
    /// archives always carry exactly one, at index 0.
    pub packages: Vec<PackageInfo>,
    pub package_names: Vec<String>,
}

impl HeaderComponent {
    /// The package this CAP file defines (index 0 in both compact and
    /// extended form).
    pub fn package(&self) -> Option<&PackageInfo> {
        self.packages.first()
    }

    pub fn cap_format_version(&self) -> (u8, u8) {
        (self.cap_format_major, self.cap_format_minor)
    }

    pub fn parse(data: &[u8]) -> Result<Self, GpError> {
        let mut reader = ByteReader::new(data);
        let tag = reader.u8()?;
        if tag != 1 {
            tracing::warn!(tag, "header component tag is not 1");
        }
        let _size = reader.u16()?;
        let magic = reader.bytes(4)?;
        if magic != HEADER_MAGIC {
            return Err(GpError::CapMalformed(format!(
                "header magic mismatch: expected {:02X?}, found {:02X?}",
                HEADER_MAGIC, magic
            )));
        }
        let cap_format_minor = reader.u8()?;
        let cap_format_major = reader.u8()?;
        let flags = reader.u8()?;
        let is_extended = flags & FLAG_EXTENDED != 0;

        let mut cap_version = None;
        let mut cap_aid = None;
        let mut packages = Vec::new();
        let mut package_names = Vec::new();

        if is_extended {
            let minor = reader.u8()?;
            let major = reader.u8()?;
            cap_version = Some((major, minor));
            let aid_len = reader.u8()? as usize;
            cap_aid = Some(reader.bytes(aid_len)?.to_vec());
            let package_count = reader.u8()?;
            for _ in 0..package_count {
                packages.push(parse_package_info(&mut reader)?);
            }
            for _ in 0..package_count {
                package_names.push(parse_package_name(&mut reader)?);
            }
        } else {
            packages.push(parse_package_info(&mut reader)?);
            if (cap_format_major, cap_format_minor) >= (2, 2) && !reader.is_empty() {
                package_names.push(parse_package_name(&mut reader)?);
            }
        }

        Ok(Self {
            cap_format_minor,
            cap_format_major,
            has_int: flags & FLAG_INT != 0,
            has_export: flags & FLAG_EXPORT != 0,
            has_applet: flags & FLAG_APPLET != 0,
            is_extended,
            cap_version,
            cap_aid,
            packages,
            package_names,
        })
    }
}

fn parse_package_info(reader: &mut ByteReader<'_>) -> Result<PackageInfo, GpError> {
    let minor_version = reader.u8()?;
    let major_version = reader.u8()?;
    let aid_len = reader.u8()? as usize;
    let aid = reader.bytes(aid_len)?.to_vec();
    Ok(PackageInfo {
        minor_version,
        major_version,
        aid,
    })
}

fn parse_package_name(reader: &mut ByteReader<'_>) -> Result<String, GpError> {
    let name_len = reader.u8()? as usize;
    let name_bytes = reader.bytes(name_len)?;
    Ok(String::from_utf8_lossy(name_bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn accepts_valid_magic() {
        let data = hex!("01 00 1F DE CA FF ED 02 02 00 07 A0000000030000");
        let header = HeaderComponent::parse(&data).unwrap();
        assert_eq!(header.cap_format_version(), (2, 2));
        assert!(!header.is_extended);
        assert_eq!(header.package().unwrap().aid, hex!("A0000000030000"));
    }

    #[test]
    fn rejects_bad_magic() {
        let data = hex!("01 00 1F DE AD BE EF 02 02 00 07 A0000000030000");
        let err = HeaderComponent::parse(&data).unwrap_err();
        assert!(matches!(err, GpError::CapMalformed(_)));
    }

    #[test]
    fn parses_extended_header_with_multiple_packages() {
        let mut data = vec![0x01, 0x00, 0x00];
        data.extend_from_slice(&HEADER_MAGIC);
        data.extend_from_slice(&[0x02, 0x03]); // minor, major = format 2.3
        data.push(FLAG_EXTENDED);
        data.extend_from_slice(&[0x00, 0x01]); // cap version minor, major
        data.push(0x07); // cap aid length
        data.extend_from_slice(&hex!("A0000000030000"));
        data.push(0x01); // package count
        data.extend_from_slice(&[0x00, 0x01, 0x07]);
        data.extend_from_slice(&hex!("A0000000030000"));
        data.push(4);
        data.extend_from_slice(b"test");

        let header = HeaderComponent::parse(&data).unwrap();
        assert!(header.is_extended);
        assert_eq!(header.cap_aid.unwrap(), hex!("A0000000030000"));
        assert_eq!(header.package_names, vec!["test".to_string()]);
    }
}
