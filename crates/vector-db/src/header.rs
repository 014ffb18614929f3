//! the 4096-byte header shared by the base, index, and WAL files
//!
//! all three files of one database agree on UUID, data type, and dimension;
//! that agreement is what [`super::db::VectorDatabase::load_or_create`]
//! checks before trusting any of them.

use uuid::Uuid;

use crate::error::{Error, Result};

pub const HEADER_SIZE: usize = 4096;

const MAGIC: [u8; 16] = [
    0xf0, 0x80, 0x35, 0x28, 0xe0, 0x31, 0xe3, 0x24, 0x88, 0x1c, 0x7e, 0x76, 0x48, 0x1e, 0xf7, 0xac,
];

const UUID_FIELD_OFFSET: usize = 16;
const UUID_FIELD_LEN: usize = 48;
const DATA_TYPE_OFFSET: usize = 64;
const DIMENSION_OFFSET: usize = 68;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum DataType {
    Int8 = 1,
}

impl DataType {
    fn from_u32(value: u32) -> Option<Self> {
        match value {
            1 => Some(DataType::Int8),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub uuid: Uuid,
    pub data_type: DataType,
    pub dimension: u32,
}

impl Header {
    pub fn new(uuid: Uuid, dimension: u32) -> Self {
        Self {
            uuid,
            data_type: DataType::Int8,
            dimension,
        }
    }

    pub fn to_bytes(self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[0..16].copy_from_slice(&MAGIC);
        let id_str = self.uuid.to_string();
        let id_bytes = id_str.as_bytes();
        bytes[UUID_FIELD_OFFSET..UUID_FIELD_OFFSET + id_bytes.len()].copy_from_slice(id_bytes);
        bytes[DATA_TYPE_OFFSET..DATA_TYPE_OFFSET + 4]
            .copy_from_slice(&(self.data_type as u32).to_le_bytes());
        bytes[DIMENSION_OFFSET..DIMENSION_OFFSET + 4].copy_from_slice(&self.dimension.to_le_bytes());
        bytes
    }

    /// parse and validate a header against the dimension this open call was
    /// configured with. any mismatch is `Malformed`, never silently coerced.
    pub fn parse(bytes: &[u8], expected_dimension: u32) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(Error::Malformed("file shorter than header".into()));
        }
        if bytes[0..16] != MAGIC {
            return Err(Error::Malformed("bad magic".into()));
        }
        let id_field = &bytes[UUID_FIELD_OFFSET..UUID_FIELD_OFFSET + UUID_FIELD_LEN];
        let nul_at = id_field.iter().position(|&b| b == 0).unwrap_or(id_field.len());
        let id_str = std::str::from_utf8(&id_field[..nul_at])
            .map_err(|_| Error::Malformed("uuid field is not utf-8".into()))?;
        let uuid = Uuid::parse_str(id_str).map_err(|_| Error::Malformed("invalid uuid".into()))?;

        let data_type_raw = u32::from_le_bytes(
            bytes[DATA_TYPE_OFFSET..DATA_TYPE_OFFSET + 4]
                .try_into()
                .unwrap(),
        );
        let data_type =
            DataType::from_u32(data_type_raw).ok_or_else(|| Error::Malformed("unknown data type".into()))?;

        let dimension = u32::from_le_bytes(
            bytes[DIMENSION_OFFSET..DIMENSION_OFFSET + 4]
                .try_into()
                .unwrap(),
        );
        if dimension != expected_dimension {
            return Err(Error::Malformed(format!(
                "dimension mismatch: file has {dimension}, expected {expected_dimension}"
            )));
        }

        Ok(Self {
            uuid,
            data_type,
            dimension,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_through_bytes() {
        let header = Header::new(Uuid::new_v4(), 128);
        let bytes = header.to_bytes();
        let parsed = Header::parse(&bytes, 128).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = Header::new(Uuid::new_v4(), 4).to_bytes();
        bytes[0] ^= 0xff;
        assert!(Header::parse(&bytes, 4).is_err());
    }

    #[test]
    fn rejects_dimension_mismatch() {
        let bytes = Header::new(Uuid::new_v4(), 4).to_bytes();
        assert!(Header::parse(&bytes, 8).is_err());
    }
}
