//! Frames the session sends, and the fixed texts it sends in them.

use tokio::io::AsyncWrite;

use crate::wire::{
    icbm, FlapWriter, IcbmChannelMsgToClient, IcbmChannelMsgToHost, IcbmClientEvent,
    IcbmEvilRequest, OServiceNoop, SnacBody, SnacFrame, Tlv, TlvList, WireError,
};

pub const TOO_MANY_MESSAGES: &str = "You're sending me too many messages! Slow down!";
pub const MESSAGE_TOO_LONG: &str = "Your message is too long for me! I am but a simple bot!";

/// IM channel used for replies.
const CHANNEL_IM: u16 = 1;

/// Wrap reply text in the HTML envelope every outgoing IM carries.
pub fn wrap_html(text: &str) -> String {
    format!(r##"<HTML><BODY BGCOLOR="#ffffff">{}</BODY></HTML>"##, text)
}

/// Prompt asking the bot to react to the `warn_count`-th warning from a user.
pub fn warning_prompt(warn_count: u32) -> &'static str {
    match warn_count {
        0 | 1 => "Respond in a pleasant tone to me warning you for the first time.",
        2 => "Respond in a miffed tone to me warning you a second time.",
        3 => "Respond in an angry tone to me warning you a third time. You are going warn me back right now in retaliation.",
        _ => "Respond in an outraged tone to me warning you a fourth time.",
    }
}

/// True when the bot warns the user back after this warning.
pub fn retaliates(warn_count: u32) -> bool {
    warn_count == 3
}

/// One unit of work for the sender task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Message(IcbmChannelMsgToHost),
    Heartbeat,
    Typing(IcbmClientEvent),
    Warn(IcbmEvilRequest),
}

impl Outbound {
    /// An IM to `screen_name` with `text` wrapped in the HTML envelope.
    pub fn message(cookie: u64, screen_name: &str, text: &str) -> Result<Self, WireError> {
        let data = crate::wire::compose_im_data(&wrap_html(text))?;
        Ok(Self::Message(IcbmChannelMsgToHost {
            cookie,
            channel_id: CHANNEL_IM,
            screen_name: screen_name.to_string(),
            tlvs: TlvList::new().with(Tlv::new(icbm::TLV_AOL_IM_DATA, data)),
        }))
    }

    /// "Typing begun" for the conversation `msg` belongs to.
    pub fn typing(msg: &IcbmChannelMsgToClient) -> Self {
        Self::Typing(IcbmClientEvent {
            cookie: msg.cookie,
            channel_id: msg.channel_id,
            screen_name: msg.screen_name().to_string(),
            event: icbm::EVENT_TYPING_BEGUN,
        })
    }

    pub fn warn(screen_name: &str) -> Self {
        Self::Warn(IcbmEvilRequest {
            send_as: 0,
            screen_name: screen_name.to_string(),
        })
    }

    pub fn frame(&self) -> SnacFrame {
        match self {
            Self::Message(_) => IcbmChannelMsgToHost::frame(),
            Self::Heartbeat => OServiceNoop::frame(),
            Self::Typing(_) => IcbmClientEvent::frame(),
            Self::Warn(_) => IcbmEvilRequest::frame(),
        }
    }

    pub(crate) async fn write_to<W>(&self, writer: &mut FlapWriter<W>) -> Result<(), WireError>
    where
        W: AsyncWrite + Unpin + Send,
    {
        match self {
            Self::Message(body) => writer.send_snac(body).await,
            Self::Heartbeat => writer.send_snac(&OServiceNoop).await,
            Self::Typing(body) => writer.send_snac(body).await,
            Self::Warn(body) => writer.send_snac(body).await,
        }
    }

    /// Screen name this frame is addressed to, if any.
    pub fn recipient(&self) -> Option<&str> {
        match self {
            Self::Message(m) => Some(&m.screen_name),
            Self::Typing(e) => Some(&e.screen_name),
            Self::Warn(w) => Some(&w.screen_name),
            Self::Heartbeat => None,
        }
    }

    /// Text of an IM with the HTML envelope still on.
    pub fn text(&self) -> Option<String> {
        match self {
            Self::Message(m) => m.message_text().ok().flatten(),
            _ => None,
        }
    }
}
