//! Constant-Pool component (CAP component tag 5).
//!
//! Every constant is exactly four bytes: a one-byte tag followed by either a
//! class reference (Classref/InstanceFieldref/VirtualMethodref/
//! SuperMethodref) or a static reference (StaticFieldref/StaticMethodref).

use super::reader::ByteReader;
use crate::error::GpError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassRef {
    Internal { class_ref: u16 },
    External { package_token: u8, class_token: u8 },
}

impl ClassRef {
    fn parse(reader: &mut ByteReader<'_>) -> Result<Self, GpError> {
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

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaticRef {
    Internal { first_element: u8, offset: u16 },
    External {
        package_token: u8,
        class_token: u8,
        token: u8,
    },
}

impl StaticRef {
    fn parse(reader: &mut ByteReader<'_>) -> Result<Self, GpError> {
        let b1 = reader.u8()?;
        let b2 = reader.u8()?;
        let b3 = reader.u8()?;
        Ok(if b1 & 0x80 != 0 {
            StaticRef::External {
                package_token: b1 & 0x7F,
                class_token: b2,
                token: b3,
            }
        } else {
            StaticRef::Internal {
                first_element: b1,
                offset: u16::from_be_bytes([b2, b3]),
            }
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstantPoolEntry {
    Classref { class_ref: ClassRef, padding: u8 },
    InstanceFieldref { class_ref: ClassRef, token: u8 },
    VirtualMethodref { class_ref: ClassRef, token: u8 },
    SuperMethodref { class_ref: ClassRef, token: u8 },
    StaticFieldref { static_ref: StaticRef },
    StaticMethodref { static_ref: StaticRef },
}

#[derive(Debug, Clone)]
pub struct ConstantPoolComponent {
    pub entries: Vec<ConstantPoolEntry>,
}

impl ConstantPoolComponent {
    pub fn parse(data: &[u8], format: (u8, u8)) -> Result<Self, GpError> {
        let mut reader = ByteReader::new(data);
        let _tag = reader.u8()?;
        let _size = reader.u16()?;
        let count = reader.u16()?;

        let mut entries = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let tag = reader.u8()?;
            let entry = match tag {
                1 => {
                    let class_ref = ClassRef::parse(&mut reader)?;
                    let padding = reader.u8()?;
                    ConstantPoolEntry::Classref { class_ref, padding }
                }
                2 => ConstantPoolEntry::InstanceFieldref {
                    class_ref: ClassRef::parse(&mut reader)?,
                    token: reader.u8()?,
                },
                3 => ConstantPoolEntry::VirtualMethodref {
                    class_ref: ClassRef::parse(&mut reader)?,
                    token: reader.u8()?,
                },
                4 => ConstantPoolEntry::SuperMethodref {
                    class_ref: ClassRef::parse(&mut reader)?,
                    token: reader.u8()?,
                },
                5 => ConstantPoolEntry::StaticFieldref {
                    static_ref: StaticRef::parse(&mut reader)?,
                },
                6 => {
                    // format >= 2.3 repurposes the static ref's first byte as
                    // a method_info_block_index; StaticRef::parse already
                    // stores that byte as `first_element` regardless.
                    let _ = format;
                    ConstantPoolEntry::StaticMethodref {
                        static_ref: StaticRef::parse(&mut reader)?,
                    }
                }
                other => {
                    return Err(GpError::CapMalformed(format!(
                        "unknown constant pool tag {other}"
                    )));
                }
            };
            entries.push(entry);
        }

        Ok(Self { entries })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_internal_classref() {
        let mut data = vec![0x05, 0x00, 0x04, 0x00, 0x01];
        data.extend_from_slice(&[0x01, 0x00, 0x10, 0x00]);

        let pool = ConstantPoolComponent::parse(&data, (2, 1)).unwrap();
        assert_eq!(
            pool.entries[0],
            ConstantPoolEntry::Classref {
                class_ref: ClassRef::Internal { class_ref: 0x0010 },
                padding: 0,
            }
        );
    }

    #[test]
    fn parses_external_static_fieldref() {
        let mut data = vec![0x05, 0x00, 0x04, 0x00, 0x01];
        data.extend_from_slice(&[0x05, 0x81, 0x02, 0x03]);

        let pool = ConstantPoolComponent::parse(&data, (2, 1)).unwrap();
        assert_eq!(
            pool.entries[0],
            ConstantPoolEntry::StaticFieldref {
                static_ref: StaticRef::External {
                    package_token: 0x01,
                    class_token: 0x02,
                    token: 0x03,
                }
            }
        );
    }
}
