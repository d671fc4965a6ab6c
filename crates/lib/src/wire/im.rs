//! IM data fragments and the BUCP credential hash.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use md5::{Digest, Md5};

use super::buf::{put_bytes16, take_bytes, take_u16, take_u8};
use super::WireError;

const FRAGMENT_CAPABILITIES: u8 = 0x05;
const FRAGMENT_TEXT: u8 = 0x01;
const FRAGMENT_VERSION: u8 = 0x01;
const CAPABILITIES: &[u8] = &[0x01, 0x01, 0x02];

const AIM_HASH_SUFFIX: &[u8] = b"AOL Instant Messenger (SM)";

/// Build the AOL IM data payload for `text`: a capabilities fragment, then a text fragment with
/// ASCII charset and language 0.
pub fn compose_im_data(text: &str) -> Result<Bytes, WireError> {
    let mut payload = BytesMut::with_capacity(text.len() + 4);
    payload.put_u16(0x0000); // charset
    payload.put_u16(0x0000); // language
    payload.put_slice(text.as_bytes());

    let mut buf = BytesMut::new();
    buf.put_u8(FRAGMENT_CAPABILITIES);
    buf.put_u8(FRAGMENT_VERSION);
    put_bytes16(&mut buf, CAPABILITIES, "IM capabilities")?;
    buf.put_u8(FRAGMENT_TEXT);
    buf.put_u8(FRAGMENT_VERSION);
    put_bytes16(&mut buf, &payload, "IM text")?;
    if buf.len() > u16::MAX as usize {
        return Err(WireError::TooLong("IM data"));
    }
    Ok(buf.freeze())
}

/// Find the text fragment in an IM data payload and return its text.
pub fn extract_message_text(data: &Bytes) -> Result<String, WireError> {
    let mut buf = data.clone();
    while buf.has_remaining() {
        let id = take_u8(&mut buf)?;
        let _version = take_u8(&mut buf)?;
        let len = take_u16(&mut buf)? as usize;
        let mut payload = take_bytes(&mut buf, len)?;
        if id == FRAGMENT_TEXT {
            let _charset = take_u16(&mut payload)?;
            let _language = take_u16(&mut payload)?;
            return Ok(String::from_utf8_lossy(&payload).into_owned());
        }
    }
    Err(WireError::MissingMessageText)
}

/// MD5(auth key || MD5(password) || "AOL Instant Messenger (SM)").
pub fn strong_md5_password_hash(password: &str, auth_key: &str) -> Vec<u8> {
    let top = Md5::digest(password.as_bytes());
    let mut bottom = Md5::new();
    bottom.update(auth_key.as_bytes());
    bottom.update(top);
    bottom.update(AIM_HASH_SUFFIX);
    bottom.finalize().to_vec()
}
