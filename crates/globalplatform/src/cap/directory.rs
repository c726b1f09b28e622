//! Directory component (CAP component tag 2).
//!
//! Field widths depend on the header's format version and `EXTENDED` flag,
//! so parsing takes both as parameters rather than re-deriving them.

use super::reader::ByteReader;
use crate::error::GpError;

#[derive(Debug, Clone, Default)]
pub struct ComponentSizes {
    pub header: u32,
    pub directory: u32,
    pub applet: u32,
    pub import: u32,
    pub constant_pool: u32,
    pub class: u32,
    pub method: u32,
    pub static_field: u32,
    pub reference_location: u32,
    pub export: u32,
    pub descriptor: u32,
    pub debug: Option<u32>,
    pub static_resources: Option<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct StaticFieldSizeInfo {
    pub image_size: u16,
    pub array_init_count: u16,
    pub array_init_size: u16,
}

#[derive(Debug, Clone)]
pub struct CustomComponent {
    pub component_tag: u8,
    pub size: u32,
    pub aid: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct DirectoryComponent {
    pub component_sizes: ComponentSizes,
    pub static_field_size_info: StaticFieldSizeInfo,
    pub import_count: u8,
    pub applet_count: u8,
    pub method_component_block_count: Option<u8>,
    pub custom_components: Vec<CustomComponent>,
}

impl DirectoryComponent {
    pub fn parse(data: &[u8], is_extended: bool, format: (u8, u8)) -> Result<Self, GpError> {
        let mut reader = ByteReader::new(data);
        let _tag = reader.u8()?;
        let _size = reader.u16()?;

        let wide = |reader: &mut ByteReader<'_>| -> Result<u32, GpError> {
            if is_extended {
                reader.u32()
            } else {
                Ok(reader.u16()? as u32)
            }
        };

        let mut sizes = ComponentSizes {
            header: reader.u16()? as u32,
            directory: reader.u16()? as u32,
            applet: reader.u16()? as u32,
            import: reader.u16()? as u32,
            constant_pool: reader.u16()? as u32,
            class: reader.u16()? as u32,
            method: wide(&mut reader)?,
            static_field: reader.u16()? as u32,
            reference_location: wide(&mut reader)?,
            export: reader.u16()? as u32,
            descriptor: wide(&mut reader)?,
            debug: None,
            static_resources: None,
        };
        if format >= (2, 2) {
            sizes.debug = Some(wide(&mut reader)?);
        }
        if format >= (2, 3) {
            sizes.static_resources = Some(reader.u32()?);
        }

        let static_field_size_info = StaticFieldSizeInfo {
            image_size: reader.u16()?,
            array_init_count: reader.u16()?,
            array_init_size: reader.u16()?,
        };

        let import_count = reader.u8()?;
        let applet_count = reader.u8()?;
        let method_component_block_count = if is_extended {
            Some(reader.u8()?)
        } else {
            None
        };
        let custom_count = reader.u8()?;
        let mut custom_components = Vec::with_capacity(custom_count as usize);
        for _ in 0..custom_count {
            let component_tag = reader.u8()?;
            let size = wide(&mut reader)?;
            let aid_len = reader.u8()? as usize;
            let aid = reader.bytes(aid_len)?.to_vec();
            custom_components.push(CustomComponent {
                component_tag,
                size,
                aid,
            });
        }

        Ok(Self {
            component_sizes: sizes,
            static_field_size_info,
            import_count,
            applet_count,
            method_component_block_count,
            custom_components,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_compact_directory_with_no_custom_components() {
        let mut data = vec![0x02, 0x00, 0x10];
        data.extend_from_slice(&[0x00, 0x1F]); // header size
        data.extend_from_slice(&[0x00, 0x10]); // directory size
        data.extend_from_slice(&[0x00, 0x20]); // applet size
        data.extend_from_slice(&[0x00, 0x08]); // import size
        data.extend_from_slice(&[0x00, 0x40]); // constant pool size
        data.extend_from_slice(&[0x00, 0x50]); // class size
        data.extend_from_slice(&[0x00, 0x60]); // method size (2B, compact)
        data.extend_from_slice(&[0x00, 0x04]); // static field size
        data.extend_from_slice(&[0x00, 0x06]); // reference location size (2B, compact)
        data.extend_from_slice(&[0x00, 0x02]); // export size
        data.extend_from_slice(&[0x00, 0x09]); // descriptor size (2B, compact)
        data.extend_from_slice(&[0x00, 0x00]); // image size
        data.extend_from_slice(&[0x00, 0x00]); // array init count
        data.extend_from_slice(&[0x00, 0x00]); // array init size
        data.push(1); // import count
        data.push(1); // applet count
        data.push(0); // custom count

        let dir = DirectoryComponent::parse(&data, false, (2, 1)).unwrap();
        assert_eq!(dir.component_sizes.method, 0x60);
        assert!(dir.component_sizes.debug.is_none());
        assert_eq!(dir.import_count, 1);
        assert!(dir.custom_components.is_empty());
    }
}
