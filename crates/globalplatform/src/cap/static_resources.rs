//! Static-Resources component (CAP component tag 13).
//!
//! Always framed with a 4-byte size, even in compact archives. Holds
//! per-resource blobs (e.g. RMI export data) addressed by an opaque
//! numeric id; this driver never interprets their contents.

use super::reader::ByteReader;
use crate::error::GpError;

#[derive(Debug, Clone)]
pub struct ResourceEntry {
    pub id: u16,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct StaticResourcesComponent {
    pub resources: Vec<ResourceEntry>,
}

impl StaticResourcesComponent {
    pub fn parse(data: &[u8]) -> Result<Self, GpError> {
        let mut reader = ByteReader::new(data);
        let _tag = reader.u8()?;
        let _size = reader.u32()?;
        let resource_count = reader.u16()?;

        let mut directory = Vec::with_capacity(resource_count as usize);
        for _ in 0..resource_count {
            let id = reader.u16()?;
            let size = reader.u16()?;
            directory.push((id, size));
        }

        let mut resources = Vec::with_capacity(directory.len());
        for (id, size) in directory {
            let data = reader.bytes(size as usize)?.to_vec();
            resources.push(ResourceEntry { id, data });
        }

        Ok(Self { resources })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_resource_directory_then_blobs() {
        let mut data = vec![0x0D, 0x00, 0x00, 0x00, 0x0B];
        data.extend_from_slice(&[0x00, 0x02]); // resource_count
        data.extend_from_slice(&[0x00, 0x01, 0x00, 0x02]); // id=1, size=2
        data.extend_from_slice(&[0x00, 0x02, 0x00, 0x01]); // id=2, size=1
        data.extend_from_slice(&[0xAA, 0xBB]); // resource 1 bytes
        data.extend_from_slice(&[0xCC]); // resource 2 bytes

        let component = StaticResourcesComponent::parse(&data).unwrap();
        assert_eq!(component.resources.len(), 2);
        assert_eq!(component.resources[0].data, vec![0xAA, 0xBB]);
        assert_eq!(component.resources[1].data, vec![0xCC]);
    }
}
