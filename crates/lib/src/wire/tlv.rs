//! Type-length-value records and lists.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::buf::{put_bytes16, take_bytes, take_u16};
use super::WireError;

/// TLV tags used by the BUCP login exchange and the BOS signon frame.
pub mod login_tag {
    pub const SCREEN_NAME: u16 = 0x0001;
    pub const RECONNECT_HERE: u16 = 0x0005;
    pub const AUTHORIZATION_COOKIE: u16 = 0x0006;
    pub const ERROR_SUBCODE: u16 = 0x0008;
    pub const PASSWORD_HASH: u16 = 0x0025;
    /// Signon-frame tag carrying the cookie issued by the auth service.
    pub const LOGIN_COOKIE: u16 = 0x0006;

    /// Error subcode for a bad screen name or password.
    pub const ERR_INVALID_USERNAME_OR_PASSWORD: u16 = 0x0001;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tlv {
    pub tag: u16,
    pub value: Bytes,
}

impl Tlv {
    pub fn new(tag: u16, value: impl Into<Bytes>) -> Self {
        Self {
            tag,
            value: value.into(),
        }
    }

    pub fn string(tag: u16, value: &str) -> Self {
        Self::new(tag, Bytes::copy_from_slice(value.as_bytes()))
    }

    pub fn uint16(tag: u16, value: u16) -> Self {
        Self::new(tag, Bytes::copy_from_slice(&value.to_be_bytes()))
    }

    fn encode(&self, buf: &mut BytesMut) -> Result<(), WireError> {
        buf.put_u16(self.tag);
        put_bytes16(buf, &self.value, "TLV value")
    }

    fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        let tag = take_u16(buf)?;
        let len = take_u16(buf)? as usize;
        let value = take_bytes(buf, len)?;
        Ok(Self { tag, value })
    }
}

/// Ordered TLV list. Lookups return the first record with a matching tag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlvList(Vec<Tlv>);

impl TlvList {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, tlv: Tlv) {
        self.0.push(tlv);
    }

    pub fn with(mut self, tlv: Tlv) -> Self {
        self.push(tlv);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tlv> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn has(&self, tag: u16) -> bool {
        self.bytes(tag).is_some()
    }

    pub fn bytes(&self, tag: u16) -> Option<&Bytes> {
        self.0.iter().find(|t| t.tag == tag).map(|t| &t.value)
    }

    pub fn string(&self, tag: u16) -> Option<String> {
        self.bytes(tag)
            .map(|b| String::from_utf8_lossy(b).into_owned())
    }

    pub fn uint16(&self, tag: u16) -> Option<u16> {
        let b = self.bytes(tag)?;
        (b.len() == 2).then(|| u16::from_be_bytes([b[0], b[1]]))
    }

    /// Write every TLV with no count prefix ("rest block").
    pub(crate) fn encode_rest(&self, buf: &mut BytesMut) -> Result<(), WireError> {
        for tlv in &self.0 {
            tlv.encode(buf)?;
        }
        Ok(())
    }

    /// Read TLVs until the buffer is exhausted.
    pub(crate) fn decode_rest(buf: &mut Bytes) -> Result<Self, WireError> {
        let mut list = Self::new();
        while buf.has_remaining() {
            list.push(Tlv::decode(buf)?);
        }
        Ok(list)
    }

    /// Write a `u16` record count followed by the TLVs.
    pub(crate) fn encode_block(&self, buf: &mut BytesMut) -> Result<(), WireError> {
        let count = u16::try_from(self.0.len()).map_err(|_| WireError::TooLong("TLV block"))?;
        buf.put_u16(count);
        self.encode_rest(buf)
    }

    pub(crate) fn decode_block(buf: &mut Bytes) -> Result<Self, WireError> {
        let count = take_u16(buf)?;
        let mut list = Self::new();
        for _ in 0..count {
            list.push(Tlv::decode(buf)?);
        }
        Ok(list)
    }
}

impl FromIterator<Tlv> for TlvList {
    fn from_iter<I: IntoIterator<Item = Tlv>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
