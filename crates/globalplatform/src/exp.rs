//! Export file (EXP) parser (§4.K).
//!
//! An EXP file describes a Java Card package's externally-visible API:
//! every class, field, and method another package's CAP file can reference
//! by token rather than by name. The wire format starts with magic
//! `00 FA CA DE`, a format version, a constant pool, `this_package`, an
//! optional referenced-package list (format 2.3+), and a list of class
//! records.
//!
//! Grounded byte-for-byte in `exp2json.py`: constant-pool tags, class/field/
//! method record shapes, and the format-2.3 gate on referenced packages and
//! the inheritable-method-token-count trailer all mirror that reference
//! parser.

use crate::cap::reader::ByteReader;
use crate::error::GpError;

/// `00 FA CA DE`, the fixed EXP file magic.
pub const MAGIC: [u8; 4] = [0x00, 0xFA, 0xCA, 0xDE];

/// One entry of an EXP file's constant pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConstantPoolEntry {
    /// Tag 1: a UTF-8 string, interned for name/descriptor indices.
    Utf8(String),
    /// Tag 3: a raw 4-byte integer constant.
    Integer([u8; 4]),
    /// Tag 7: a reference to a class or interface, by `name_index`.
    ClassRef { name_index: u16 },
    /// Tag 13: a referenced (or this) package's identity.
    Package {
        is_library: bool,
        name_index: u16,
        minor_version: u8,
        major_version: u8,
        aid: Vec<u8>,
    },
}

/// Decoded access-modifier bits, matching the flags a CAP/EXP file can set
/// on a class, field, or method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AccessFlags {
    pub public: bool,
    pub protected: bool,
    pub static_: bool,
    pub final_: bool,
    pub interface: bool,
    pub abstract_: bool,
    pub shareable: bool,
    pub remote: bool,
}

impl AccessFlags {
    fn from_bits(flags: u16) -> Self {
        Self {
            public: flags & 0x0001 != 0,
            protected: flags & 0x0004 != 0,
            static_: flags & 0x0008 != 0,
            final_: flags & 0x0010 != 0,
            interface: flags & 0x0200 != 0,
            abstract_: flags & 0x0400 != 0,
            shareable: flags & 0x0800 != 0,
            remote: flags & 0x1000 != 0,
        }
    }
}

/// A field or method attribute (`attribute_info`): an opaque, named blob.
#[derive(Debug, Clone)]
pub struct AttributeInfo {
    pub attribute_name_index: u16,
    pub info: Vec<u8>,
}

/// An exported field: token, access flags, name/descriptor indices, and
/// any attributes.
#[derive(Debug, Clone)]
pub struct FieldInfo {
    pub token: u8,
    pub access_flags: AccessFlags,
    pub name_index: u16,
    pub descriptor_index: u16,
    pub attributes: Vec<AttributeInfo>,
}

/// An exported method: token, access flags, and name/descriptor indices.
/// Unlike fields, export-file methods carry no attributes.
#[derive(Debug, Clone)]
pub struct MethodInfo {
    pub token: u8,
    pub access_flags: AccessFlags,
    pub name_index: u16,
    pub descriptor_index: u16,
}

/// An exported class or interface: its supertypes, interfaces, and every
/// externally visible field and method.
#[derive(Debug, Clone)]
pub struct ClassInfo {
    pub token: u8,
    pub access_flags: AccessFlags,
    pub name_index: u16,
    pub supers: Vec<u16>,
    pub interfaces: Vec<u16>,
    pub fields: Vec<FieldInfo>,
    pub methods: Vec<MethodInfo>,
    /// Present only in format 2.3+ export files.
    pub inheritable_public_method_token_count: Option<u8>,
}

/// A fully decoded export file.
#[derive(Debug, Clone)]
pub struct ExportFile {
    pub major_version: u8,
    pub minor_version: u8,
    pub constant_pool: Vec<ConstantPoolEntry>,
    pub this_package: u16,
    /// Present only in format 2.3+ export files.
    pub referenced_packages: Vec<u16>,
    pub classes: Vec<ClassInfo>,
}

impl ExportFile {
    /// `major.minor`, compared the way the format version gates optional
    /// fields (2.3 and up).
    fn is_at_least_2_3(&self) -> bool {
        (self.major_version, self.minor_version) >= (2, 3)
    }

    /// Look up `this_package`'s [`ConstantPoolEntry::Package`] entry.
    pub fn this_package_entry(&self) -> Option<&ConstantPoolEntry> {
        self.constant_pool.get(self.this_package as usize)
    }

    /// Resolve a 1-based constant-pool index to a UTF8 string, as used for
    /// `name_index`/`descriptor_index` lookups.
    pub fn resolve_utf8(&self, index: u16) -> Option<&str> {
        match self.constant_pool.get(index as usize)? {
            ConstantPoolEntry::Utf8(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

fn parse_cp_info(reader: &mut ByteReader<'_>) -> Result<ConstantPoolEntry, GpError> {
    let tag = reader.u8()?;
    match tag {
        1 => {
            let length = reader.u16()? as usize;
            let bytes = reader.bytes(length)?;
            let s = String::from_utf8(bytes.to_vec())
                .map_err(|e| GpError::CapMalformed(format!("non-UTF8 constant pool entry: {e}")))?;
            Ok(ConstantPoolEntry::Utf8(s))
        }
        3 => {
            let bytes = reader.bytes(4)?;
            Ok(ConstantPoolEntry::Integer([bytes[0], bytes[1], bytes[2], bytes[3]]))
        }
        7 => Ok(ConstantPoolEntry::ClassRef {
            name_index: reader.u16()?,
        }),
        13 => {
            let is_library = reader.u8()? != 0;
            let name_index = reader.u16()?;
            let minor_version = reader.u8()?;
            let major_version = reader.u8()?;
            let aid_length = reader.u8()? as usize;
            let aid = reader.bytes(aid_length)?.to_vec();
            Ok(ConstantPoolEntry::Package {
                is_library,
                name_index,
                minor_version,
                major_version,
                aid,
            })
        }
        other => Err(GpError::CapMalformed(format!(
            "invalid export file constant pool tag: {other}"
        ))),
    }
}

fn parse_attribute_info(reader: &mut ByteReader<'_>) -> Result<AttributeInfo, GpError> {
    let attribute_name_index = reader.u16()?;
    let attribute_length = reader.u32()? as usize;
    let info = reader.bytes(attribute_length)?.to_vec();
    Ok(AttributeInfo {
        attribute_name_index,
        info,
    })
}

fn parse_field_info(reader: &mut ByteReader<'_>) -> Result<FieldInfo, GpError> {
    let token = reader.u8()?;
    let access_flags = AccessFlags::from_bits(reader.u16()?);
    let name_index = reader.u16()?;
    let descriptor_index = reader.u16()?;
    let attribute_count = reader.u16()?;
    let mut attributes = Vec::with_capacity(attribute_count as usize);
    for _ in 0..attribute_count {
        attributes.push(parse_attribute_info(reader)?);
    }
    Ok(FieldInfo {
        token,
        access_flags,
        name_index,
        descriptor_index,
        attributes,
    })
}

fn parse_method_info(reader: &mut ByteReader<'_>) -> Result<MethodInfo, GpError> {
    Ok(MethodInfo {
        token: reader.u8()?,
        access_flags: AccessFlags::from_bits(reader.u16()?),
        name_index: reader.u16()?,
        descriptor_index: reader.u16()?,
    })
}

fn parse_class_info(reader: &mut ByteReader<'_>, format_2_3: bool) -> Result<ClassInfo, GpError> {
    let token = reader.u8()?;
    let access_flags = AccessFlags::from_bits(reader.u16()?);
    let name_index = reader.u16()?;

    let supers_count = reader.u16()?;
    let mut supers = Vec::with_capacity(supers_count as usize);
    for _ in 0..supers_count {
        supers.push(reader.u16()?);
    }

    let interfaces_count = reader.u8()?;
    let mut interfaces = Vec::with_capacity(interfaces_count as usize);
    for _ in 0..interfaces_count {
        interfaces.push(reader.u16()?);
    }

    let fields_count = reader.u16()?;
    let mut fields = Vec::with_capacity(fields_count as usize);
    for _ in 0..fields_count {
        fields.push(parse_field_info(reader)?);
    }

    let methods_count = reader.u16()?;
    let mut methods = Vec::with_capacity(methods_count as usize);
    for _ in 0..methods_count {
        methods.push(parse_method_info(reader)?);
    }

    let inheritable_public_method_token_count = if format_2_3 { Some(reader.u8()?) } else { None };

    Ok(ClassInfo {
        token,
        access_flags,
        name_index,
        supers,
        interfaces,
        fields,
        methods,
        inheritable_public_method_token_count,
    })
}

impl ExportFile {
    /// Parse a complete `.exp` file from raw bytes.
    pub fn parse(data: &[u8]) -> Result<Self, GpError> {
        let mut reader = ByteReader::new(data);

        let magic = reader.bytes(4)?;
        if magic != MAGIC {
            return Err(GpError::CapMalformed(format!(
                "not an export file: expected magic {MAGIC:02X?}, found {magic:02X?}"
            )));
        }

        let minor_version = reader.u8()?;
        let major_version = reader.u8()?;

        let constant_pool_count = reader.u16()?;
        let mut constant_pool = Vec::with_capacity(constant_pool_count as usize);
        for _ in 0..constant_pool_count {
            constant_pool.push(parse_cp_info(&mut reader)?);
        }

        let this_package = reader.u16()?;

        let format_2_3 = (major_version, minor_version) >= (2, 3);
        let mut referenced_packages = Vec::new();
        if format_2_3 {
            let referenced_package_count = reader.u8()?;
            referenced_packages.reserve(referenced_package_count as usize);
            for _ in 0..referenced_package_count {
                referenced_packages.push(reader.u16()?);
            }
        }

        let export_class_count = reader.u8()?;
        let mut classes = Vec::with_capacity(export_class_count as usize);
        for _ in 0..export_class_count {
            classes.push(parse_class_info(&mut reader, format_2_3)?);
        }

        Ok(Self {
            major_version,
            minor_version,
            constant_pool,
            this_package,
            referenced_packages,
            classes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    fn sample_package_export(major: u8, minor: u8) -> Vec<u8> {
        let aid = hex!("A0000000620001");
        let mut data = Vec::new();
        data.extend_from_slice(&MAGIC);
        data.push(minor);
        data.push(major);

        // constant pool: [0] UTF8 "Applet", [1] Package (this_package)
        data.extend_from_slice(&[0x00, 0x02]);
        data.push(1); // tag UTF8
        data.extend_from_slice(&6u16.to_be_bytes());
        data.extend_from_slice(b"Applet");
        data.push(13); // tag Package
        data.push(0); // not a library
        data.extend_from_slice(&0u16.to_be_bytes()); // name_index -> "Applet"
        data.push(minor);
        data.push(major);
        data.push(aid.len() as u8);
        data.extend_from_slice(&aid);

        data.extend_from_slice(&1u16.to_be_bytes()); // this_package = index 1

        if (major, minor) >= (2, 3) {
            data.push(0); // referenced_package_count = 0
        }

        data.push(0); // export_class_count = 0
        data
    }

    #[test]
    fn parses_magic_and_version() {
        let data = sample_package_export(2, 2);
        let exp = ExportFile::parse(&data).unwrap();
        assert_eq!((exp.major_version, exp.minor_version), (2, 2));
        assert_eq!(exp.this_package, 1);
        assert!(exp.referenced_packages.is_empty());
    }

    #[test]
    fn format_2_3_reads_referenced_packages_gate() {
        let data = sample_package_export(2, 3);
        let exp = ExportFile::parse(&data).unwrap();
        assert_eq!((exp.major_version, exp.minor_version), (2, 3));
        assert!(exp.referenced_packages.is_empty());
    }

    #[test]
    fn rejects_bad_magic() {
        let mut data = sample_package_export(2, 2);
        data[0] = 0xFF;
        assert!(ExportFile::parse(&data).is_err());
    }

    #[test]
    fn access_flags_decode_expected_bits() {
        let flags = AccessFlags::from_bits(0x0001 | 0x0008 | 0x0010);
        assert!(flags.public);
        assert!(flags.static_);
        assert!(flags.final_);
        assert!(!flags.interface);
    }

    #[test]
    fn resolves_utf8_constant_pool_entries() {
        let data = sample_package_export(2, 2);
        let exp = ExportFile::parse(&data).unwrap();
        assert_eq!(exp.resolve_utf8(0), Some("Applet"));
        assert_eq!(exp.resolve_utf8(1), None);
    }
}
