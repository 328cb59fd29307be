//! Key and value serialization contracts.
//!
//! Keys must produce a totally-ordered byte encoding: within one column
//! family, the byte order of encoded keys is the iteration order. All
//! integral components are therefore encoded big-endian at a fixed
//! width. Values round-trip through bincode and carry no ordering
//! contract.

use crate::error::{Result, StorageError};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// A key type with an order-preserving, fixed-width byte encoding.
pub trait KeyCodec: Sized {
    /// Encoded width in bytes. Composite keys concatenate their
    /// components, so every component must be fixed-width.
    const ENCODED_LEN: usize;

    /// Append the encoded key to `buf`.
    fn encode_into(&self, buf: &mut Vec<u8>);

    /// Decode a key from exactly its encoded bytes.
    fn decode(bytes: &[u8]) -> Result<Self>;
}

impl KeyCodec for u64 {
    const ENCODED_LEN: usize = 8;

    fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.to_be_bytes());
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        let raw: [u8; 8] = bytes
            .try_into()
            .map_err(|_| StorageError::Corruption(format!("expected 8 key bytes, got {}", bytes.len())))?;
        Ok(u64::from_be_bytes(raw))
    }
}

impl KeyCodec for u32 {
    const ENCODED_LEN: usize = 4;

    fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.to_be_bytes());
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        let raw: [u8; 4] = bytes
            .try_into()
            .map_err(|_| StorageError::Corruption(format!("expected 4 key bytes, got {}", bytes.len())))?;
        Ok(u32::from_be_bytes(raw))
    }
}

/// The unit key, for single-row column families.
impl KeyCodec for () {
    const ENCODED_LEN: usize = 0;

    fn encode_into(&self, _buf: &mut Vec<u8>) {}

    fn decode(bytes: &[u8]) -> Result<Self> {
        if !bytes.is_empty() {
            return Err(StorageError::Corruption(format!(
                "expected empty key, got {} bytes",
                bytes.len()
            ))
            .into());
        }
        Ok(())
    }
}

impl<A: KeyCodec, B: KeyCodec> KeyCodec for (A, B) {
    const ENCODED_LEN: usize = A::ENCODED_LEN + B::ENCODED_LEN;

    fn encode_into(&self, buf: &mut Vec<u8>) {
        self.0.encode_into(buf);
        self.1.encode_into(buf);
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != Self::ENCODED_LEN {
            return Err(StorageError::Corruption(format!(
                "expected {} key bytes, got {}",
                Self::ENCODED_LEN,
                bytes.len()
            ))
            .into());
        }
        let (a, b) = bytes.split_at(A::ENCODED_LEN);
        Ok((A::decode(a)?, B::decode(b)?))
    }
}

impl<A: KeyCodec, B: KeyCodec, C: KeyCodec> KeyCodec for (A, B, C) {
    const ENCODED_LEN: usize = A::ENCODED_LEN + B::ENCODED_LEN + C::ENCODED_LEN;

    fn encode_into(&self, buf: &mut Vec<u8>) {
        self.0.encode_into(buf);
        self.1.encode_into(buf);
        self.2.encode_into(buf);
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != Self::ENCODED_LEN {
            return Err(StorageError::Corruption(format!(
                "expected {} key bytes, got {}",
                Self::ENCODED_LEN,
                bytes.len()
            ))
            .into());
        }
        let (a, rest) = bytes.split_at(A::ENCODED_LEN);
        let (b, c) = rest.split_at(B::ENCODED_LEN);
        Ok((A::decode(a)?, B::decode(b)?, C::decode(c)?))
    }
}

/// A value type that round-trips through bytes.
pub trait ValueCodec: Sized {
    /// Encode the value into `buf`, replacing its contents.
    fn encode_value(&self, buf: &mut Vec<u8>) -> Result<()>;

    /// Decode a value from its stored bytes.
    fn decode_value(bytes: &[u8]) -> Result<Self>;
}

impl<T> ValueCodec for T
where
    T: Serialize + DeserializeOwned,
{
    fn encode_value(&self, buf: &mut Vec<u8>) -> Result<()> {
        buf.clear();
        bincode::serialize_into(&mut *buf, self)
            .map_err(|e| StorageError::Corruption(format!("value encode failed: {e}")))?;
        Ok(())
    }

    fn decode_value(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes)
            .map_err(|e| StorageError::Corruption(format!("value decode failed: {e}")).into())
    }
}
