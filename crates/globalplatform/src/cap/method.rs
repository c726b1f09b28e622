//! Method component (CAP component tag 7).
//!
//! Bytecode is retained verbatim; this parser never decodes opcodes.

use super::reader::ByteReader;
use crate::error::GpError;

#[derive(Debug, Clone, Copy)]
pub struct ExceptionHandlerInfo {
    pub start_offset: u16,
    pub stop_bit: bool,
    pub active_length: u16,
    pub handler_offset: u16,
    pub catch_type_index: u16,
}

impl ExceptionHandlerInfo {
    fn parse(reader: &mut ByteReader<'_>) -> Result<Self, GpError> {
        let start_offset = reader.u16()?;
        let bitfield = reader.u16()?;
        let handler_offset = reader.u16()?;
        let catch_type_index = reader.u16()?;
        Ok(Self {
            start_offset,
            stop_bit: bitfield & 0x8000 != 0,
            active_length: bitfield & 0x7FFF,
            handler_offset,
            catch_type_index,
        })
    }
}

#[derive(Debug, Clone)]
pub struct MethodBlock {
    pub exception_handlers: Vec<ExceptionHandlerInfo>,
    pub bytecode: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct MethodComponent {
    pub blocks: Vec<MethodBlock>,
}

impl MethodComponent {
    pub fn parse(data: &[u8], is_extended: bool) -> Result<Self, GpError> {
        let mut reader = ByteReader::new(data);
        let _tag = reader.u8()?;

        if !is_extended {
            let size = reader.u16()? as usize;
            let body_end = reader.position() + size;
            let handler_count = reader.u8()?;
            let mut exception_handlers = Vec::with_capacity(handler_count as usize);
            for _ in 0..handler_count {
                exception_handlers.push(ExceptionHandlerInfo::parse(&mut reader)?);
            }
            let bytecode = reader.bytes(body_end - reader.position())?.to_vec();
            return Ok(Self {
                blocks: vec![MethodBlock {
                    exception_handlers,
                    bytecode,
                }],
            });
        }

        let size = reader.u32()? as usize;
        let body_start = reader.position();
        let body_end = body_start + size;
        let block_count = reader.u8()?;
        let mut block_offsets = Vec::with_capacity(block_count as usize);
        for _ in 0..block_count {
            block_offsets.push(reader.u32()? as usize);
        }

        let mut blocks = Vec::with_capacity(block_count as usize);
        for (index, offset) in block_offsets.iter().enumerate() {
            let block_start = body_start + offset;
            let block_end = block_offsets
                .get(index + 1)
                .map(|next| body_start + next)
                .unwrap_or(body_end);
            reader.seek(block_start);
            let handler_count = reader.u8()?;
            let mut exception_handlers = Vec::with_capacity(handler_count as usize);
            for _ in 0..handler_count {
                exception_handlers.push(ExceptionHandlerInfo::parse(&mut reader)?);
            }
            let bytecode = reader.bytes(block_end.saturating_sub(reader.position()))?.to_vec();
            blocks.push(MethodBlock {
                exception_handlers,
                bytecode,
            });
        }

        Ok(Self { blocks })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_compact_method_with_no_handlers() {
        let mut data = vec![0x07, 0x00, 0x05, 0x00];
        data.extend_from_slice(&[0xAA, 0xBB, 0xCC, 0xDD]);

        let method = MethodComponent::parse(&data, false).unwrap();
        assert_eq!(method.blocks.len(), 1);
        assert!(method.blocks[0].exception_handlers.is_empty());
        assert_eq!(method.blocks[0].bytecode, vec![0xAA, 0xBB, 0xCC, 0xDD]);
    }

    #[test]
    fn parses_compact_method_with_one_handler() {
        let mut data = vec![0x07, 0x00, 0x0A, 0x01];
        data.extend_from_slice(&[0x00, 0x05, 0x80, 0x03, 0x00, 0x10, 0x00, 0x01]);
        data.extend_from_slice(&[0xAA]);

        let method = MethodComponent::parse(&data, false).unwrap();
        let handler = method.blocks[0].exception_handlers[0];
        assert_eq!(handler.start_offset, 5);
        assert!(handler.stop_bit);
        assert_eq!(handler.active_length, 3);
        assert_eq!(method.blocks[0].bytecode, vec![0xAA]);
    }
}
