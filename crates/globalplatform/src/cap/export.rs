//! Export component (CAP component tag 10).

use super::reader::ByteReader;
use crate::error::GpError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodOffset {
    Compact(u16),
    Extended { block_index: u8, offset: u16 },
}

#[derive(Debug, Clone)]
pub struct ClassExportInfo {
    pub class_offset: u16,
    pub static_field_offsets: Vec<u16>,
    pub static_method_offsets: Vec<MethodOffset>,
}

fn parse_class_export(
    reader: &mut ByteReader<'_>,
    is_extended: bool,
) -> Result<ClassExportInfo, GpError> {
    let class_offset = reader.u16()?;
    let static_field_count = reader.u8()?;
    let static_method_count = reader.u8()?;

    let mut static_field_offsets = Vec::with_capacity(static_field_count as usize);
    for _ in 0..static_field_count {
        static_field_offsets.push(reader.u16()?);
    }

    let mut static_method_offsets = Vec::with_capacity(static_method_count as usize);
    for _ in 0..static_method_count {
        if is_extended {
            let block_index = reader.u8()?;
            let offset = reader.u16()?;
            static_method_offsets.push(MethodOffset::Extended {
                block_index,
                offset,
            });
        } else {
            static_method_offsets.push(MethodOffset::Compact(reader.u16()?));
        }
    }

    Ok(ClassExportInfo {
        class_offset,
        static_field_offsets,
        static_method_offsets,
    })
}

#[derive(Debug, Clone)]
pub struct ExportComponent {
    pub class_exports: Vec<ClassExportInfo>,
}

impl ExportComponent {
    pub fn parse(data: &[u8], is_extended: bool) -> Result<Self, GpError> {
        let mut reader = ByteReader::new(data);
        let _tag = reader.u8()?;
        let _size = reader.u16()?;

        let mut class_exports = Vec::new();
        if is_extended {
            let package_count = reader.u8()?;
            for _ in 0..package_count {
                let class_count = reader.u8()?;
                for _ in 0..class_count {
                    class_exports.push(parse_class_export(&mut reader, true)?);
                }
            }
        } else {
            let class_count = reader.u8()?;
            for _ in 0..class_count {
                class_exports.push(parse_class_export(&mut reader, false)?);
            }
        }

        Ok(Self { class_exports })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_compact_export_component() {
        let mut data = vec![0x0A, 0x00, 0x06, 0x01];
        data.extend_from_slice(&[0x00, 0x10]); // class_offset
        data.push(1); // static_field_count
        data.push(0); // static_method_count
        data.extend_from_slice(&[0x00, 0x20]); // field offset

        let export = ExportComponent::parse(&data, false).unwrap();
        assert_eq!(export.class_exports.len(), 1);
        assert_eq!(export.class_exports[0].static_field_offsets, vec![0x0020]);
    }
}
