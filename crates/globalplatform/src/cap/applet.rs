//! Applet component (CAP component tag 3).

use super::reader::ByteReader;
use crate::error::GpError;

#[derive(Debug, Clone)]
pub struct AppletInfo {
    pub aid: Vec<u8>,
    /// Present only in extended archives.
    pub install_method_component_block_index: Option<u8>,
    pub install_method_offset: u16,
}

#[derive(Debug, Clone)]
pub struct AppletComponent {
    pub applets: Vec<AppletInfo>,
}

impl AppletComponent {
    pub fn parse(data: &[u8], is_extended: bool) -> Result<Self, GpError> {
        let mut reader = ByteReader::new(data);
        let _tag = reader.u8()?;
        let _size = reader.u16()?;
        let count = reader.u8()?;

        let mut applets = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let aid_len = reader.u8()? as usize;
            let aid = reader.bytes(aid_len)?.to_vec();
            let install_method_component_block_index =
                if is_extended { Some(reader.u8()?) } else { None };
            let install_method_offset = reader.u16()?;
            applets.push(AppletInfo {
                aid,
                install_method_component_block_index,
                install_method_offset,
            });
        }

        Ok(Self { applets })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn parses_compact_applet_component() {
        let mut data = vec![0x03, 0x00, 0x0B, 0x01];
        data.push(7);
        data.extend_from_slice(&hex!("A0000000030000"));
        data.extend_from_slice(&[0x00, 0x20]);

        let component = AppletComponent::parse(&data, false).unwrap();
        assert_eq!(component.applets.len(), 1);
        assert_eq!(component.applets[0].aid, hex!("A0000000030000"));
        assert_eq!(component.applets[0].install_method_offset, 0x20);
        assert!(component.applets[0]
            .install_method_component_block_index
            .is_none());
    }
}
