//! Checked big-endian reads and length-prefixed writes over `bytes` buffers.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::WireError;

fn ensure(buf: &Bytes, n: usize) -> Result<(), WireError> {
    if buf.remaining() < n {
        return Err(WireError::UnexpectedEof);
    }
    Ok(())
}

pub(crate) fn take_u8(buf: &mut Bytes) -> Result<u8, WireError> {
    ensure(buf, 1)?;
    Ok(buf.get_u8())
}

pub(crate) fn take_u16(buf: &mut Bytes) -> Result<u16, WireError> {
    ensure(buf, 2)?;
    Ok(buf.get_u16())
}

pub(crate) fn take_u32(buf: &mut Bytes) -> Result<u32, WireError> {
    ensure(buf, 4)?;
    Ok(buf.get_u32())
}

pub(crate) fn take_u64(buf: &mut Bytes) -> Result<u64, WireError> {
    ensure(buf, 8)?;
    Ok(buf.get_u64())
}

pub(crate) fn take_bytes(buf: &mut Bytes, n: usize) -> Result<Bytes, WireError> {
    ensure(buf, n)?;
    Ok(buf.split_to(n))
}

/// String with a `u8` length prefix (screen names).
pub(crate) fn take_str8(buf: &mut Bytes) -> Result<String, WireError> {
    let n = take_u8(buf)? as usize;
    let raw = take_bytes(buf, n)?;
    Ok(String::from_utf8_lossy(&raw).into_owned())
}

/// String with a `u16` length prefix (auth keys).
pub(crate) fn take_str16(buf: &mut Bytes) -> Result<String, WireError> {
    let n = take_u16(buf)? as usize;
    let raw = take_bytes(buf, n)?;
    Ok(String::from_utf8_lossy(&raw).into_owned())
}

pub(crate) fn put_str8(buf: &mut BytesMut, s: &str, what: &'static str) -> Result<(), WireError> {
    let len = u8::try_from(s.len()).map_err(|_| WireError::TooLong(what))?;
    buf.put_u8(len);
    buf.put_slice(s.as_bytes());
    Ok(())
}

pub(crate) fn put_bytes16(buf: &mut BytesMut, b: &[u8], what: &'static str) -> Result<(), WireError> {
    let len = u16::try_from(b.len()).map_err(|_| WireError::TooLong(what))?;
    buf.put_u16(len);
    buf.put_slice(b);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_reads_fail_without_panicking() {
        let mut buf = Bytes::from_static(&[0x01]);
        assert!(matches!(take_u16(&mut buf), Err(WireError::UnexpectedEof)));
        let mut buf = Bytes::from_static(&[0x05, b'a', b'b']);
        assert!(matches!(take_str8(&mut buf), Err(WireError::UnexpectedEof)));
    }

    #[test]
    fn str8_rejects_oversized_strings() {
        let mut buf = BytesMut::new();
        let long = "x".repeat(300);
        assert!(matches!(
            put_str8(&mut buf, &long, "screen name"),
            Err(WireError::TooLong("screen name"))
        ));
    }
}
