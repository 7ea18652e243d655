use super::error::{RecordError, RecordResult};

/// Fixed-width test tuple stored in relation files
#[derive(Debug, Clone, PartialEq)]
pub struct Tuple {
    pub i: i32,
    pub d: f64,
    pub s: String,
}

impl Tuple {
    /// Serialized width in bytes
    pub const SIZE: usize = 80;

    /// Byte offset of each attribute
    pub const I_OFFSET: usize = 0;
    pub const D_OFFSET: usize = 8;
    pub const S_OFFSET: usize = 16;

    /// Width of the string attribute, terminator included
    pub const S_LEN: usize = 64;

    /// The tuple the reference relations hold for `key`
    pub fn for_key(key: i32) -> Self {
        Self {
            i: key,
            d: key as f64,
            s: format!("{key:05} string record"),
        }
    }

    pub fn serialize(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[Self::I_OFFSET..Self::I_OFFSET + 4].copy_from_slice(&self.i.to_le_bytes());
        buf[Self::D_OFFSET..Self::D_OFFSET + 8].copy_from_slice(&self.d.to_le_bytes());

        // Null-terminated, truncated to fit
        let bytes = self.s.as_bytes();
        let len = bytes.len().min(Self::S_LEN - 1);
        buf[Self::S_OFFSET..Self::S_OFFSET + len].copy_from_slice(&bytes[..len]);
        buf
    }

    pub fn deserialize(data: &[u8]) -> RecordResult<Self> {
        if data.len() < Self::SIZE {
            return Err(RecordError::InvalidTuple {
                expected: Self::SIZE,
                actual: data.len(),
            });
        }

        let mut i_bytes = [0u8; 4];
        i_bytes.copy_from_slice(&data[Self::I_OFFSET..Self::I_OFFSET + 4]);
        let mut d_bytes = [0u8; 8];
        d_bytes.copy_from_slice(&data[Self::D_OFFSET..Self::D_OFFSET + 8]);

        let s_bytes = &data[Self::S_OFFSET..Self::S_OFFSET + Self::S_LEN];
        let end = s_bytes.iter().position(|&b| b == 0).unwrap_or(Self::S_LEN);

        Ok(Self {
            i: i32::from_le_bytes(i_bytes),
            d: f64::from_le_bytes(d_bytes),
            s: String::from_utf8_lossy(&s_bytes[..end]).into_owned(),
        })
    }
}
