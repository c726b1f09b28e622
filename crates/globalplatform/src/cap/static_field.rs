//! Static-Field component (CAP component tag 8).

use super::reader::ByteReader;
use crate::error::GpError;

#[derive(Debug, Clone)]
pub struct ArrayInitInfo {
    pub array_type: u8,
    pub count: u16,
    pub values: Vec<u8>,
}

fn element_size(array_type: u8) -> Result<usize, GpError> {
    match array_type {
        2 => Ok(1), // boolean
        3 => Ok(1), // byte
        4 => Ok(2), // short
        5 => Ok(4), // int
        other => Err(GpError::CapMalformed(format!(
            "unknown static array init type {other}"
        ))),
    }
}

#[derive(Debug, Clone)]
pub struct StaticFieldComponent {
    pub image_size: u16,
    pub reference_count: u16,
    pub array_init_info: Vec<ArrayInitInfo>,
    pub default_value_count: u16,
    pub non_default_values: Vec<u8>,
}

impl StaticFieldComponent {
    pub fn parse(data: &[u8]) -> Result<Self, GpError> {
        let mut reader = ByteReader::new(data);
        let _tag = reader.u8()?;
        let _size = reader.u16()?;

        let image_size = reader.u16()?;
        let reference_count = reader.u16()?;
        let array_init_count = reader.u16()?;

        let mut array_init_info = Vec::with_capacity(array_init_count as usize);
        for _ in 0..array_init_count {
            let array_type = reader.u8()?;
            let count = reader.u16()?;
            let elem_size = element_size(array_type)?;
            let values = reader.bytes(count as usize * elem_size)?.to_vec();
            array_init_info.push(ArrayInitInfo {
                array_type,
                count,
                values,
            });
        }

        let default_value_count = reader.u16()?;
        let non_default_value_count = reader.u16()? as usize;
        let non_default_values = reader.bytes(non_default_value_count)?.to_vec();

        Ok(Self {
            image_size,
            reference_count,
            array_init_info,
            default_value_count,
            non_default_values,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_static_field_with_one_byte_array() {
        let mut data = vec![0x08, 0x00, 0x0D];
        data.extend_from_slice(&[0x00, 0x10]); // image_size
        data.extend_from_slice(&[0x00, 0x02]); // reference_count
        data.extend_from_slice(&[0x00, 0x01]); // array_init_count
        data.push(3); // byte type
        data.extend_from_slice(&[0x00, 0x02]); // count = 2
        data.extend_from_slice(&[0xAA, 0xBB]); // values
        data.extend_from_slice(&[0x00, 0x00]); // default_value_count
        data.extend_from_slice(&[0x00, 0x00]); // non_default_value_count

        let sf = StaticFieldComponent::parse(&data).unwrap();
        assert_eq!(sf.array_init_info.len(), 1);
        assert_eq!(sf.array_init_info[0].values, vec![0xAA, 0xBB]);
    }
}
