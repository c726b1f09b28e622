//! Descriptor component (CAP component tag 11).
//!
//! Field and method references inside this component share the three-byte
//! physical layout used by the Constant-Pool's `static_ref`/`class_ref`
//! pairs; this parser keeps them as raw bytes rather than re-discriminating
//! instance vs static semantics that the load-time driver never consumes.

use super::class::TypeDescriptor;
use super::constant_pool::ClassRef;
use super::reader::ByteReader;
use crate::error::GpError;

#[derive(Debug, Clone, Copy)]
pub struct FieldDescriptorInfo {
    pub token: u8,
    pub access_flags: u8,
    pub field_ref: [u8; 3],
    pub field_type: u16,
}

#[derive(Debug, Clone, Copy)]
pub struct MethodDescriptorInfo {
    pub token: u8,
    pub access_flags: u8,
    pub method_offset: u16,
    pub type_offset: u16,
    pub bytecode_count: u16,
    pub exception_handler_count: u16,
    pub exception_handler_index: u16,
}

#[derive(Debug, Clone)]
pub struct ClassDescriptorInfo {
    pub token: u8,
    pub access_flags: u8,
    pub this_class_ref: u16,
    pub interfaces: Vec<ClassRef>,
    pub fields: Vec<FieldDescriptorInfo>,
    pub methods: Vec<MethodDescriptorInfo>,
}

fn parse_field(reader: &mut ByteReader<'_>) -> Result<FieldDescriptorInfo, GpError> {
    let token = reader.u8()?;
    let access_flags = reader.u8()?;
    let field_ref_bytes = reader.bytes(3)?;
    let field_ref = [field_ref_bytes[0], field_ref_bytes[1], field_ref_bytes[2]];
    let field_type = reader.u16()?;
    Ok(FieldDescriptorInfo {
        token,
        access_flags,
        field_ref,
        field_type,
    })
}

fn parse_method(reader: &mut ByteReader<'_>) -> Result<MethodDescriptorInfo, GpError> {
    Ok(MethodDescriptorInfo {
        token: reader.u8()?,
        access_flags: reader.u8()?,
        method_offset: reader.u16()?,
        type_offset: reader.u16()?,
        bytecode_count: reader.u16()?,
        exception_handler_count: reader.u16()?,
        exception_handler_index: reader.u16()?,
    })
}

fn parse_class(reader: &mut ByteReader<'_>) -> Result<ClassDescriptorInfo, GpError> {
    let token = reader.u8()?;
    let access_flags = reader.u8()?;
    let this_class_ref = reader.u16()?;
    let interface_count = reader.u8()?;
    let field_count = reader.u16()?;
    let method_count = reader.u16()?;

    let mut interfaces = Vec::with_capacity(interface_count as usize);
    for _ in 0..interface_count {
        let b1 = reader.u8()?;
        let b2 = reader.u8()?;
        interfaces.push(if b1 & 0x80 != 0 {
            ClassRef::External {
                package_token: b1 & 0x7F,
                class_token: b2,
            }
        } else {
            ClassRef::Internal {
                class_ref: u16::from_be_bytes([b1, b2]),
            }
        });
    }

    let mut fields = Vec::with_capacity(field_count as usize);
    for _ in 0..field_count {
        fields.push(parse_field(reader)?);
    }

    let mut methods = Vec::with_capacity(method_count as usize);
    for _ in 0..method_count {
        methods.push(parse_method(reader)?);
    }

    Ok(ClassDescriptorInfo {
        token,
        access_flags,
        this_class_ref,
        interfaces,
        fields,
        methods,
    })
}

#[derive(Debug, Clone, Default)]
pub struct TypeDescriptorInfo {
    pub constant_pool_types: Vec<u16>,
    pub type_descriptors: Vec<TypeDescriptor>,
}

#[derive(Debug, Clone)]
pub struct DescriptorComponent {
    pub classes: Vec<ClassDescriptorInfo>,
    pub type_descriptor_info: TypeDescriptorInfo,
}

impl DescriptorComponent {
    pub fn parse(data: &[u8], is_extended: bool) -> Result<Self, GpError> {
        let mut reader = ByteReader::new(data);
        let _tag = reader.u8()?;
        let size = if is_extended {
            reader.u32()? as usize
        } else {
            reader.u16()? as usize
        };
        let body_end = reader.position() + size;

        let mut classes = Vec::new();
        if is_extended {
            let package_count = reader.u8()?;
            for _ in 0..package_count {
                let class_count = reader.u8()?;
                for _ in 0..class_count {
                    classes.push(parse_class(&mut reader)?);
                }
            }
        } else {
            let class_count = reader.u8()?;
            for _ in 0..class_count {
                classes.push(parse_class(&mut reader)?);
            }
        }

        let mut type_descriptor_info = TypeDescriptorInfo::default();
        if reader.position() < body_end {
            let constant_pool_count = reader.u16()?;
            let mut constant_pool_types = Vec::with_capacity(constant_pool_count as usize);
            for _ in 0..constant_pool_count {
                constant_pool_types.push(reader.u16()?);
            }
            let mut type_descriptors = Vec::new();
            while reader.position() < body_end {
                let nibble_count = reader.u8()? as usize;
                type_descriptors.push(TypeDescriptor::parse(&mut reader, nibble_count)?);
            }
            type_descriptor_info = TypeDescriptorInfo {
                constant_pool_types,
                type_descriptors,
            };
        }

        Ok(Self {
            classes,
            type_descriptor_info,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_compact_descriptor_with_no_classes() {
        let data = vec![0x0B, 0x00, 0x01, 0x00];
        let component = DescriptorComponent::parse(&data, false).unwrap();
        assert!(component.classes.is_empty());
    }

    #[test]
    fn parses_single_field_descriptor() {
        let mut data = vec![0x0B, 0x00, 0x00, 0x01];
        // class_descriptor_info
        data.push(0x01); // token
        data.push(0x01); // access_flags
        data.extend_from_slice(&[0x00, 0x10]); // this_class_ref
        data.push(0); // interface_count
        data.extend_from_slice(&[0x00, 0x01]); // field_count
        data.extend_from_slice(&[0x00, 0x00]); // method_count
        data.push(0x02); // field token
        data.push(0x08); // field access_flags (static)
        data.extend_from_slice(&[0x00, 0x01, 0x00]); // field_ref
        data.extend_from_slice(&[0x00, 0x03]); // field_type = byte

        let size = (data.len() - 3) as u16;
        data[1] = (size >> 8) as u8;
        data[2] = (size & 0xFF) as u8;

        let component = DescriptorComponent::parse(&data, false).unwrap();
        assert_eq!(component.classes.len(), 1);
        assert_eq!(component.classes[0].fields.len(), 1);
        assert_eq!(component.classes[0].fields[0].field_type, 3);
    }
}
