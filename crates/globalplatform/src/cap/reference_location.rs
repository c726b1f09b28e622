//! Reference-Location component (CAP component tag 9).
//!
//! The extended form's block loop is `for _ in 0..block_count` — iterating
//! the block *count*, not iterating over it as if it were a collection.

use super::reader::ByteReader;
use crate::error::GpError;

#[derive(Debug, Clone, Default)]
pub struct OffsetBlock {
    pub byte_index_offsets: Vec<u8>,
    pub byte2_index_offsets: Vec<u8>,
}

fn parse_offset_block(reader: &mut ByteReader<'_>) -> Result<OffsetBlock, GpError> {
    let byte_index_count = reader.u16()? as usize;
    let byte_index_offsets = reader.bytes(byte_index_count)?.to_vec();
    let byte2_index_count = reader.u16()? as usize;
    let byte2_index_offsets = reader.bytes(byte2_index_count)?.to_vec();
    Ok(OffsetBlock {
        byte_index_offsets,
        byte2_index_offsets,
    })
}

#[derive(Debug, Clone)]
pub struct ReferenceLocationComponent {
    pub blocks: Vec<OffsetBlock>,
}

impl ReferenceLocationComponent {
    pub fn parse(data: &[u8], is_extended: bool) -> Result<Self, GpError> {
        let mut reader = ByteReader::new(data);
        let _tag = reader.u8()?;
        if is_extended {
            let _size = reader.u32()?;
            let block_count = reader.u8()?;
            let mut blocks = Vec::with_capacity(block_count as usize);
            for _ in 0..block_count {
                blocks.push(parse_offset_block(&mut reader)?);
            }
            Ok(Self { blocks })
        } else {
            let _size = reader.u16()?;
            Ok(Self {
                blocks: vec![parse_offset_block(&mut reader)?],
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_compact_single_block() {
        let mut data = vec![0x09, 0x00, 0x06];
        data.extend_from_slice(&[0x00, 0x02, 0x01, 0x02]);
        data.extend_from_slice(&[0x00, 0x00]);

        let component = ReferenceLocationComponent::parse(&data, false).unwrap();
        assert_eq!(component.blocks.len(), 1);
        assert_eq!(component.blocks[0].byte_index_offsets, vec![1, 2]);
        assert!(component.blocks[0].byte2_index_offsets.is_empty());
    }

    #[test]
    fn parses_extended_multi_block() {
        let mut data = vec![0x09, 0x00, 0x00, 0x00, 0x0E, 0x02];
        data.extend_from_slice(&[0x00, 0x01, 0x01]);
        data.extend_from_slice(&[0x00, 0x00]);
        data.extend_from_slice(&[0x00, 0x01, 0x02]);
        data.extend_from_slice(&[0x00, 0x00]);

        let component = ReferenceLocationComponent::parse(&data, true).unwrap();
        assert_eq!(component.blocks.len(), 2);
        assert_eq!(component.blocks[1].byte_index_offsets, vec![2]);
    }
}
