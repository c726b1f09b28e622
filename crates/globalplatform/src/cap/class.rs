//! Class component (CAP component tag 6).
//!
//! The densest of the CAP components: a signature pool (format >= 2.2),
//! followed by a mixed stream of interface and class records discriminated
//! by the `INTERFACE` flag in each record's leading bitfield byte.

use super::constant_pool::ClassRef;
use super::reader::ByteReader;
use crate::error::GpError;

const ACC_INTERFACE: u8 = 0x08;
const ACC_REMOTE: u8 = 0x02;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeNibble {
    Void,
    Boolean,
    Byte,
    Short,
    Int,
    Reference(ClassRef),
    ArrayBoolean,
    ArrayByte,
    ArrayShort,
    ArrayInt,
    ArrayReference(ClassRef),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TypeDescriptor {
    pub nibbles: Vec<TypeNibble>,
}

impl TypeDescriptor {
    pub(crate) fn parse(reader: &mut ByteReader<'_>, nibble_count: usize) -> Result<Self, GpError> {
        let byte_count = nibble_count.div_ceil(2);
        let raw = reader.bytes(byte_count)?.to_vec();
        let mut nibbles = Vec::new();
        let mut produced = 0usize;
        let mut i = 0usize;
        while produced < nibble_count {
            let byte = raw[i / 2];
            let nibble = if i % 2 == 0 { byte >> 4 } else { byte & 0x0F };
            i += 1;
            produced += 1;
            match nibble {
                0x0 => break,
                0x1 => nibbles.push(TypeNibble::Void),
                0x2 => nibbles.push(TypeNibble::Boolean),
                0x3 => nibbles.push(TypeNibble::Byte),
                0x4 => nibbles.push(TypeNibble::Short),
                0x5 => nibbles.push(TypeNibble::Int),
                0x6 => {
                    let class_ref = read_inline_class_ref(&raw, &mut i)?;
                    produced += 4; // consumed two extra nibbles worth of bytes
                    nibbles.push(TypeNibble::Reference(class_ref));
                }
                0xA => nibbles.push(TypeNibble::ArrayBoolean),
                0xB => nibbles.push(TypeNibble::ArrayByte),
                0xC => nibbles.push(TypeNibble::ArrayShort),
                0xD => nibbles.push(TypeNibble::ArrayInt),
                0xE => {
                    let class_ref = read_inline_class_ref(&raw, &mut i)?;
                    produced += 4;
                    nibbles.push(TypeNibble::ArrayReference(class_ref));
                }
                other => {
                    return Err(GpError::CapMalformed(format!(
                        "unknown type descriptor nibble {other:x}"
                    )));
                }
            }
        }
        Ok(Self { nibbles })
    }
}

/// A class-ref embedded inline in a type descriptor's nibble stream occupies
/// the next two whole bytes, byte-aligned at the current nibble position.
fn read_inline_class_ref(raw: &[u8], nibble_index: &mut usize) -> Result<ClassRef, GpError> {
    let byte_index = nibble_index.div_ceil(2);
    if byte_index + 2 > raw.len() {
        return Err(GpError::CapMalformed(
            "truncated class_ref in type descriptor".into(),
        ));
    }
    let b1 = raw[byte_index];
    let b2 = raw[byte_index + 1];
    *nibble_index = (byte_index + 2) * 2;
    Ok(if b1 & 0x80 != 0 {
        ClassRef::External {
            package_token: b1 & 0x7F,
            class_token: b2,
        }
    } else {
        ClassRef::Internal {
            class_ref: u16::from_be_bytes([b1, b2]),
        }
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodTableEntry {
    Compact(u16),
    Extended { block_index: u8, offset: u16 },
}

#[derive(Debug, Clone)]
pub struct ImplementedInterfaceInfo {
    pub interface: ClassRef,
    pub index: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct RemoteMethodInfo {
    pub remote_method_hash: u16,
    pub signature_offset: u16,
    pub virtual_method_token: u8,
}

#[derive(Debug, Clone)]
pub struct RemoteInterfaces {
    pub remote_methods: Vec<RemoteMethodInfo>,
    pub hash_modifier: Vec<u8>,
    pub class_name: String,
    pub remote_interfaces: Vec<ClassRef>,
}

#[derive(Debug, Clone)]
pub struct InterfaceInfo {
    pub bitfield: u8,
    pub superinterfaces: Vec<ClassRef>,
    pub interface_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ClassInfo {
    pub bitfield: u8,
    pub super_class_ref: Option<ClassRef>,
    pub declared_instance_size: u8,
    pub first_reference_token: u8,
    pub reference_count: u8,
    pub public_method_table_base: u8,
    pub public_method_table_count: u8,
    pub package_method_table_base: u8,
    pub package_method_table_count: u8,
    pub public_virtual_method_table: Vec<MethodTableEntry>,
    pub package_virtual_method_table: Vec<MethodTableEntry>,
    pub interfaces: Vec<ImplementedInterfaceInfo>,
    pub remote_interfaces: Option<RemoteInterfaces>,
    pub public_virtual_method_token_mapping: Vec<u8>,
    pub inheritable_public_method_token_count: Option<u8>,
}

#[derive(Debug, Clone)]
pub enum ClassRecord {
    Interface(InterfaceInfo),
    Class(ClassInfo),
}

#[derive(Debug, Clone, Default)]
pub struct ClassComponent {
    pub signature_pool: Vec<TypeDescriptor>,
    pub records: Vec<ClassRecord>,
}

impl ClassComponent {
    pub fn parse(data: &[u8], is_extended: bool, format: (u8, u8)) -> Result<Self, GpError> {
        let mut reader = ByteReader::new(data);
        let _tag = reader.u8()?;
        let size = reader.u16()? as usize;
        let body_end = reader.position() + size;

        let mut signature_pool = Vec::new();
        if format >= (2, 2) {
            let signature_pool_length = reader.u16()? as usize;
            let pool_end = reader.position() + signature_pool_length;
            while reader.position() < pool_end {
                let nibble_count = reader.u8()? as usize;
                signature_pool.push(TypeDescriptor::parse(&mut reader, nibble_count)?);
            }
        }

        let mut records = Vec::new();
        while reader.position() < body_end {
            let bitfield = reader.u8()?;
            let interface_count = bitfield & 0x0F;
            if bitfield & ACC_INTERFACE != 0 {
                let mut superinterfaces = Vec::with_capacity(interface_count as usize);
                for _ in 0..interface_count {
                    superinterfaces.push(ClassRef::parse_pub(&mut reader)?);
                }
                let interface_name = if format >= (2, 2) && bitfield & ACC_REMOTE != 0 {
                    let len = reader.u8()? as usize;
                    Some(String::from_utf8_lossy(reader.bytes(len)?).into_owned())
                } else {
                    None
                };
                records.push(ClassRecord::Interface(InterfaceInfo {
                    bitfield,
                    superinterfaces,
                    interface_name,
                }));
            } else {
                let super_class_ref = Some(ClassRef::parse_pub(&mut reader)?);
                let declared_instance_size = reader.u8()?;
                let first_reference_token = reader.u8()?;
                let reference_count = reader.u8()?;
                let public_method_table_base = reader.u8()?;
                let public_method_table_count = reader.u8()?;
                let package_method_table_base = reader.u8()?;
                let package_method_table_count = reader.u8()?;

                let read_table = |reader: &mut ByteReader<'_>,
                                  count: u8|
                 -> Result<Vec<MethodTableEntry>, GpError> {
                    let mut table = Vec::with_capacity(count as usize);
                    for _ in 0..count {
                        if is_extended {
                            let block_index = reader.u8()?;
                            let offset = reader.u16()?;
                            table.push(MethodTableEntry::Extended {
                                block_index,
                                offset,
                            });
                        } else {
                            table.push(MethodTableEntry::Compact(reader.u16()?));
                        }
                    }
                    Ok(table)
                };

                let public_virtual_method_table =
                    read_table(&mut reader, public_method_table_count)?;
                let package_virtual_method_table =
                    read_table(&mut reader, package_method_table_count)?;

                let interface_impl_count = reader.u8()?;
                let mut interfaces = Vec::with_capacity(interface_impl_count as usize);
                for _ in 0..interface_impl_count {
                    let interface = ClassRef::parse_pub(&mut reader)?;
                    let index_count = reader.u8()? as usize;
                    let index = reader.bytes(index_count)?.to_vec();
                    interfaces.push(ImplementedInterfaceInfo { interface, index });
                }

                let remote_interfaces = if format >= (2, 2) && bitfield & ACC_REMOTE != 0 {
                    let remote_methods_count = reader.u8()?;
                    let mut remote_methods = Vec::with_capacity(remote_methods_count as usize);
                    for _ in 0..remote_methods_count {
                        remote_methods.push(RemoteMethodInfo {
                            remote_method_hash: reader.u16()?,
                            signature_offset: reader.u16()?,
                            virtual_method_token: reader.u8()?,
                        });
                    }
                    let hash_modifier_length = reader.u8()? as usize;
                    let hash_modifier = reader.bytes(hash_modifier_length)?.to_vec();
                    let class_name_length = reader.u8()? as usize;
                    let class_name =
                        String::from_utf8_lossy(reader.bytes(class_name_length)?).into_owned();
                    let remote_interfaces_count = reader.u8()?;
                    let mut remote_interfaces_list =
                        Vec::with_capacity(remote_interfaces_count as usize);
                    for _ in 0..remote_interfaces_count {
                        remote_interfaces_list.push(ClassRef::parse_pub(&mut reader)?);
                    }
                    Some(RemoteInterfaces {
                        remote_methods,
                        hash_modifier,
                        class_name,
                        remote_interfaces: remote_interfaces_list,
                    })
                } else {
                    None
                };

                let public_virtual_method_token_mapping = if format >= (2, 3) {
                    let mapping_len =
                        public_method_table_base as usize + public_method_table_count as usize;
                    let mut mapping = Vec::with_capacity(mapping_len);
                    for _ in 0..mapping_len {
                        mapping.push(reader.u8()?);
                    }
                    mapping
                } else {
                    Vec::new()
                };

                let inheritable_public_method_token_count = if format >= (2, 3) {
                    Some(reader.u8()?)
                } else {
                    None
                };

                records.push(ClassRecord::Class(ClassInfo {
                    bitfield,
                    super_class_ref,
                    declared_instance_size,
                    first_reference_token,
                    reference_count,
                    public_method_table_base,
                    public_method_table_count,
                    package_method_table_base,
                    package_method_table_count,
                    public_virtual_method_table,
                    package_virtual_method_table,
                    interfaces,
                    remote_interfaces,
                    public_virtual_method_token_mapping,
                    inheritable_public_method_token_count,
                }));
            }
        }

        Ok(Self {
            signature_pool,
            records,
        })
    }
}

impl ClassRef {
    fn parse_pub(reader: &mut ByteReader<'_>) -> Result<Self, GpError> {
        let b1 = reader.u8()?;
        let b2 = reader.u8()?;
        Ok(if b1 & 0x80 != 0 {
            ClassRef::External {
                package_token: b1 & 0x7F,
                class_token: b2,
            }
        } else {
            ClassRef::Internal {
                class_ref: u16::from_be_bytes([b1, b2]),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_signature_pool_primitive_descriptor() {
        let data = [0x02]; // nibble count 2: "int" then stop => [1 nibble "5"=Int, pad]
        let mut reader = ByteReader::new(&data);
        let desc = TypeDescriptor::parse(&mut reader, 0).unwrap();
        assert!(desc.nibbles.is_empty());
    }

    #[test]
    fn parses_simple_class_record_stream() {
        // One class record, compact, format 2.1: no super (bitfield low
        // nibble 0, high nibble 0), minimal table sizes.
        let mut data = vec![0x06, 0x00, 0x00];
        let body = vec![
            0x00u8, // bitfield: not interface, no super
            0x04,   // declared_instance_size
            0x00,   // first_reference_token
            0x00,   // reference_count
            0x00,   // public_method_table_base
            0x00,   // public_method_table_count
            0x00,   // package_method_table_base
            0x00,   // package_method_table_count
            0x00,   // interface_impl_count
        ];
        let body_len = body.len() as u16;
        data[1] = (body_len >> 8) as u8;
        data[2] = (body_len & 0xFF) as u8;
        data.extend_from_slice(&body);

        let component = ClassComponent::parse(&data, false, (2, 1)).unwrap();
        assert_eq!(component.records.len(), 1);
        assert!(matches!(component.records[0], ClassRecord::Class(_)));
    }
}
