//! OSCAR wire codec: FLAP framing, SNAC envelopes, TLVs, and the message bodies the bot speaks.
//!
//! Only the frames needed to log in and exchange instant messages are covered. Every body can be
//! encoded and decoded, so the same types serve the client and the scripted servers in tests.

mod buf;
mod flap;
mod im;
mod snac;
mod tlv;

pub use flap::{FlapClient, FlapFrame, FlapReader, FlapSignonFrame, FlapWriter, FrameType};
pub use im::{compose_im_data, extract_message_text, strong_md5_password_hash};
pub use snac::{
    bucp, food_group, food_group_name, icbm, oservice, sub_group_name, BucpChallengeRequest,
    BucpChallengeResponse, BucpLoginRequest, BucpLoginResponse, Decode, Encode, GroupVersion,
    IcbmChannelMsgToClient, IcbmChannelMsgToHost, IcbmClientEvent, IcbmEvilRequest,
    OServiceClientOnline, OServiceEvilNotification, OServiceHostOnline, OServiceNoop, SnacBody,
    SnacFrame, UserInfo,
};
pub use tlv::{login_tag, Tlv, TlvList};

/// Errors raised while reading, writing, or decoding OSCAR frames.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    /// The peer closed the connection on a frame boundary.
    #[error("connection closed")]
    Closed,
    #[error("unexpected end of payload")]
    UnexpectedEof,
    #[error("bad FLAP start marker 0x{0:02x}")]
    BadStartMarker(u8),
    #[error("unknown FLAP frame type {0}")]
    UnknownFrameType(u8),
    #[error("expected FLAP {expected:?} frame, got {got:?}")]
    UnexpectedFrameType { expected: FrameType, got: FrameType },
    #[error("expected SNAC {expected}, got {got}")]
    UnexpectedSnac { expected: SnacFrame, got: SnacFrame },
    #[error("{0} exceeds its length prefix")]
    TooLong(&'static str),
    #[error("IM data carries no message text")]
    MissingMessageText,
}
