//! SNAC envelope, classifications, and message bodies.

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::buf::{put_bytes16, put_str8, take_str16, take_str8, take_u16, take_u32, take_u64};
use super::tlv::TlvList;
use super::WireError;

pub mod food_group {
    pub const OSERVICE: u16 = 0x0001;
    pub const ICBM: u16 = 0x0004;
    pub const BUCP: u16 = 0x0017;
}

pub mod oservice {
    pub const CLIENT_ONLINE: u16 = 0x0002;
    pub const HOST_ONLINE: u16 = 0x0003;
    pub const EVIL_NOTIFICATION: u16 = 0x0010;
    pub const NOOP: u16 = 0x0016;
}

pub mod icbm {
    pub const CHANNEL_MSG_TO_HOST: u16 = 0x0006;
    pub const CHANNEL_MSG_TO_CLIENT: u16 = 0x0007;
    pub const EVIL_REQUEST: u16 = 0x0008;
    pub const CLIENT_EVENT: u16 = 0x0014;

    /// TLV holding the IM fragments.
    pub const TLV_AOL_IM_DATA: u16 = 0x0002;
    /// TLV present when the sender wants typing events.
    pub const TLV_WANT_EVENTS: u16 = 0x000B;

    /// Client event code for "typing begun".
    pub const EVENT_TYPING_BEGUN: u16 = 0x0002;
}

pub mod bucp {
    pub const LOGIN_REQUEST: u16 = 0x0002;
    pub const LOGIN_RESPONSE: u16 = 0x0003;
    pub const CHALLENGE_REQUEST: u16 = 0x0006;
    pub const CHALLENGE_RESPONSE: u16 = 0x0007;
}

pub fn food_group_name(food_group: u16) -> &'static str {
    match food_group {
        food_group::OSERVICE => "OService",
        food_group::ICBM => "ICBM",
        food_group::BUCP => "BUCP",
        _ => "unknown",
    }
}

pub fn sub_group_name(food_group: u16, sub_group: u16) -> &'static str {
    match (food_group, sub_group) {
        (food_group::OSERVICE, oservice::CLIENT_ONLINE) => "OServiceClientOnline",
        (food_group::OSERVICE, oservice::HOST_ONLINE) => "OServiceHostOnline",
        (food_group::OSERVICE, oservice::EVIL_NOTIFICATION) => "OServiceEvilNotification",
        (food_group::OSERVICE, oservice::NOOP) => "OServiceNoop",
        (food_group::ICBM, icbm::CHANNEL_MSG_TO_HOST) => "ICBMChannelMsgToHost",
        (food_group::ICBM, icbm::CHANNEL_MSG_TO_CLIENT) => "ICBMChannelMsgToClient",
        (food_group::ICBM, icbm::EVIL_REQUEST) => "ICBMEvilRequest",
        (food_group::ICBM, icbm::CLIENT_EVENT) => "ICBMClientEvent",
        (food_group::BUCP, bucp::LOGIN_REQUEST) => "BUCPLoginRequest",
        (food_group::BUCP, bucp::LOGIN_RESPONSE) => "BUCPLoginResponse",
        (food_group::BUCP, bucp::CHALLENGE_REQUEST) => "BUCPChallengeRequest",
        (food_group::BUCP, bucp::CHALLENGE_RESPONSE) => "BUCPChallengeResponse",
        _ => "unknown",
    }
}

pub trait Encode {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), WireError>;
}

pub trait Decode: Sized {
    fn decode(buf: &mut Bytes) -> Result<Self, WireError>;
}

/// A SNAC body type and the classification it travels under.
pub trait SnacBody: Encode + Decode {
    const FOOD_GROUP: u16;
    const SUB_GROUP: u16;

    fn frame() -> SnacFrame {
        SnacFrame::new(Self::FOOD_GROUP, Self::SUB_GROUP)
    }
}

/// SNAC header: classification plus flags and request id.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SnacFrame {
    pub food_group: u16,
    pub sub_group: u16,
    pub flags: u16,
    pub request_id: u32,
}

impl SnacFrame {
    pub fn new(food_group: u16, sub_group: u16) -> Self {
        Self {
            food_group,
            sub_group,
            ..Self::default()
        }
    }

    pub fn is(&self, food_group: u16, sub_group: u16) -> bool {
        self.food_group == food_group && self.sub_group == sub_group
    }
}

impl fmt::Display for SnacFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}",
            food_group_name(self.food_group),
            sub_group_name(self.food_group, self.sub_group)
        )
    }
}

impl Encode for SnacFrame {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), WireError> {
        buf.put_u16(self.food_group);
        buf.put_u16(self.sub_group);
        buf.put_u16(self.flags);
        buf.put_u32(self.request_id);
        Ok(())
    }
}

impl Decode for SnacFrame {
    fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        Ok(Self {
            food_group: take_u16(buf)?,
            sub_group: take_u16(buf)?,
            flags: take_u16(buf)?,
            request_id: take_u32(buf)?,
        })
    }
}

/// Bodies that are nothing but a TLV rest block.
macro_rules! tlv_body {
    ($(#[$meta:meta])* $name:ident, $fg:expr, $sg:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq, Eq)]
        pub struct $name {
            pub tlvs: TlvList,
        }

        impl Encode for $name {
            fn encode(&self, buf: &mut BytesMut) -> Result<(), WireError> {
                self.tlvs.encode_rest(buf)
            }
        }

        impl Decode for $name {
            fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
                Ok(Self {
                    tlvs: TlvList::decode_rest(buf)?,
                })
            }
        }

        impl SnacBody for $name {
            const FOOD_GROUP: u16 = $fg;
            const SUB_GROUP: u16 = $sg;
        }
    };
}

tlv_body!(
    /// SNAC(0x17,0x06): asks the auth service for a challenge key.
    BucpChallengeRequest,
    food_group::BUCP,
    bucp::CHALLENGE_REQUEST
);
tlv_body!(
    /// SNAC(0x17,0x02): screen name and credential hash.
    BucpLoginRequest,
    food_group::BUCP,
    bucp::LOGIN_REQUEST
);
tlv_body!(
    /// SNAC(0x17,0x03): error subcode, or relay host and cookie.
    BucpLoginResponse,
    food_group::BUCP,
    bucp::LOGIN_RESPONSE
);

/// SNAC(0x17,0x07)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BucpChallengeResponse {
    pub auth_key: String,
}

impl Encode for BucpChallengeResponse {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), WireError> {
        put_bytes16(buf, self.auth_key.as_bytes(), "auth key")
    }
}

impl Decode for BucpChallengeResponse {
    fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        Ok(Self {
            auth_key: take_str16(buf)?,
        })
    }
}

impl SnacBody for BucpChallengeResponse {
    const FOOD_GROUP: u16 = food_group::BUCP;
    const SUB_GROUP: u16 = bucp::CHALLENGE_RESPONSE;
}

/// SNAC(0x01,0x03): food groups the BOS host serves.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OServiceHostOnline {
    pub food_groups: Vec<u16>,
}

impl Encode for OServiceHostOnline {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), WireError> {
        for fg in &self.food_groups {
            buf.put_u16(*fg);
        }
        Ok(())
    }
}

impl Decode for OServiceHostOnline {
    fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        let mut food_groups = Vec::new();
        while buf.has_remaining() {
            food_groups.push(take_u16(buf)?);
        }
        Ok(Self { food_groups })
    }
}

impl SnacBody for OServiceHostOnline {
    const FOOD_GROUP: u16 = food_group::OSERVICE;
    const SUB_GROUP: u16 = oservice::HOST_ONLINE;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GroupVersion {
    pub food_group: u16,
    pub version: u16,
    pub tool_id: u16,
    pub tool_version: u16,
}

/// SNAC(0x01,0x02): the client is ready to chat.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OServiceClientOnline {
    pub group_versions: Vec<GroupVersion>,
}

impl Encode for OServiceClientOnline {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), WireError> {
        for gv in &self.group_versions {
            buf.put_u16(gv.food_group);
            buf.put_u16(gv.version);
            buf.put_u16(gv.tool_id);
            buf.put_u16(gv.tool_version);
        }
        Ok(())
    }
}

impl Decode for OServiceClientOnline {
    fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        let mut group_versions = Vec::new();
        while buf.has_remaining() {
            group_versions.push(GroupVersion {
                food_group: take_u16(buf)?,
                version: take_u16(buf)?,
                tool_id: take_u16(buf)?,
                tool_version: take_u16(buf)?,
            });
        }
        Ok(Self { group_versions })
    }
}

impl SnacBody for OServiceClientOnline {
    const FOOD_GROUP: u16 = food_group::OSERVICE;
    const SUB_GROUP: u16 = oservice::CLIENT_ONLINE;
}

/// SNAC(0x01,0x16): keep-alive with no payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OServiceNoop;

impl Encode for OServiceNoop {
    fn encode(&self, _buf: &mut BytesMut) -> Result<(), WireError> {
        Ok(())
    }
}

impl Decode for OServiceNoop {
    fn decode(_buf: &mut Bytes) -> Result<Self, WireError> {
        Ok(Self)
    }
}

impl SnacBody for OServiceNoop {
    const FOOD_GROUP: u16 = food_group::OSERVICE;
    const SUB_GROUP: u16 = oservice::NOOP;
}

/// Screen name, warning level, and attribute TLVs describing another user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserInfo {
    pub screen_name: String,
    pub warning_level: u16,
    pub tlvs: TlvList,
}

impl UserInfo {
    pub fn new(screen_name: impl Into<String>) -> Self {
        Self {
            screen_name: screen_name.into(),
            ..Self::default()
        }
    }
}

impl Encode for UserInfo {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), WireError> {
        put_str8(buf, &self.screen_name, "screen name")?;
        buf.put_u16(self.warning_level);
        self.tlvs.encode_block(buf)
    }
}

impl Decode for UserInfo {
    fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        Ok(Self {
            screen_name: take_str8(buf)?,
            warning_level: take_u16(buf)?,
            tlvs: TlvList::decode_block(buf)?,
        })
    }
}

/// SNAC(0x01,0x10): someone warned us. Anonymous warnings carry no user info.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OServiceEvilNotification {
    pub new_evil: u16,
    pub snitcher: Option<UserInfo>,
}

impl OServiceEvilNotification {
    /// Screen name of the warner, or `None` for an anonymous warning.
    pub fn sender(&self) -> Option<&str> {
        self.snitcher
            .as_ref()
            .map(|u| u.screen_name.as_str())
            .filter(|s| !s.is_empty())
    }
}

impl Encode for OServiceEvilNotification {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), WireError> {
        buf.put_u16(self.new_evil);
        if let Some(snitcher) = &self.snitcher {
            snitcher.encode(buf)?;
        }
        Ok(())
    }
}

impl Decode for OServiceEvilNotification {
    fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        // an empty body is an anonymous warning as well
        if !buf.has_remaining() {
            return Ok(Self::default());
        }
        let new_evil = take_u16(buf)?;
        let snitcher = if buf.has_remaining() {
            Some(UserInfo::decode(buf)?)
        } else {
            None
        };
        Ok(Self { new_evil, snitcher })
    }
}

impl SnacBody for OServiceEvilNotification {
    const FOOD_GROUP: u16 = food_group::OSERVICE;
    const SUB_GROUP: u16 = oservice::EVIL_NOTIFICATION;
}

/// SNAC(0x04,0x07): an IM delivered to us.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IcbmChannelMsgToClient {
    pub cookie: u64,
    pub channel_id: u16,
    pub sender: UserInfo,
    pub tlvs: TlvList,
}

impl IcbmChannelMsgToClient {
    pub fn screen_name(&self) -> &str {
        &self.sender.screen_name
    }

    pub fn wants_events(&self) -> bool {
        self.tlvs.has(icbm::TLV_WANT_EVENTS)
    }

    /// Plain text of the IM, or `None` when the message has no IM data TLV.
    pub fn message_text(&self) -> Result<Option<String>, WireError> {
        match self.tlvs.bytes(icbm::TLV_AOL_IM_DATA) {
            Some(data) => super::im::extract_message_text(data).map(Some),
            None => Ok(None),
        }
    }
}

impl Encode for IcbmChannelMsgToClient {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), WireError> {
        buf.put_u64(self.cookie);
        buf.put_u16(self.channel_id);
        self.sender.encode(buf)?;
        self.tlvs.encode_rest(buf)
    }
}

impl Decode for IcbmChannelMsgToClient {
    fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        Ok(Self {
            cookie: take_u64(buf)?,
            channel_id: take_u16(buf)?,
            sender: UserInfo::decode(buf)?,
            tlvs: TlvList::decode_rest(buf)?,
        })
    }
}

impl SnacBody for IcbmChannelMsgToClient {
    const FOOD_GROUP: u16 = food_group::ICBM;
    const SUB_GROUP: u16 = icbm::CHANNEL_MSG_TO_CLIENT;
}

/// SNAC(0x04,0x06): an IM we send.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IcbmChannelMsgToHost {
    pub cookie: u64,
    pub channel_id: u16,
    pub screen_name: String,
    pub tlvs: TlvList,
}

impl IcbmChannelMsgToHost {
    pub fn message_text(&self) -> Result<Option<String>, WireError> {
        match self.tlvs.bytes(icbm::TLV_AOL_IM_DATA) {
            Some(data) => super::im::extract_message_text(data).map(Some),
            None => Ok(None),
        }
    }
}

impl Encode for IcbmChannelMsgToHost {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), WireError> {
        buf.put_u64(self.cookie);
        buf.put_u16(self.channel_id);
        put_str8(buf, &self.screen_name, "screen name")?;
        self.tlvs.encode_rest(buf)
    }
}

impl Decode for IcbmChannelMsgToHost {
    fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        Ok(Self {
            cookie: take_u64(buf)?,
            channel_id: take_u16(buf)?,
            screen_name: take_str8(buf)?,
            tlvs: TlvList::decode_rest(buf)?,
        })
    }
}

impl SnacBody for IcbmChannelMsgToHost {
    const FOOD_GROUP: u16 = food_group::ICBM;
    const SUB_GROUP: u16 = icbm::CHANNEL_MSG_TO_HOST;
}

/// SNAC(0x04,0x08): warn another user. `send_as` 0 warns under our own name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IcbmEvilRequest {
    pub send_as: u16,
    pub screen_name: String,
}

impl Encode for IcbmEvilRequest {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), WireError> {
        buf.put_u16(self.send_as);
        put_str8(buf, &self.screen_name, "screen name")
    }
}

impl Decode for IcbmEvilRequest {
    fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        Ok(Self {
            send_as: take_u16(buf)?,
            screen_name: take_str8(buf)?,
        })
    }
}

impl SnacBody for IcbmEvilRequest {
    const FOOD_GROUP: u16 = food_group::ICBM;
    const SUB_GROUP: u16 = icbm::EVIL_REQUEST;
}

/// SNAC(0x04,0x14): typing notification.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IcbmClientEvent {
    pub cookie: u64,
    pub channel_id: u16,
    pub screen_name: String,
    pub event: u16,
}

impl Encode for IcbmClientEvent {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), WireError> {
        buf.put_u64(self.cookie);
        buf.put_u16(self.channel_id);
        put_str8(buf, &self.screen_name, "screen name")?;
        buf.put_u16(self.event);
        Ok(())
    }
}

impl Decode for IcbmClientEvent {
    fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        Ok(Self {
            cookie: take_u64(buf)?,
            channel_id: take_u16(buf)?,
            screen_name: take_str8(buf)?,
            event: take_u16(buf)?,
        })
    }
}

impl SnacBody for IcbmClientEvent {
    const FOOD_GROUP: u16 = food_group::ICBM;
    const SUB_GROUP: u16 = icbm::CLIENT_EVENT;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::Tlv;

    fn encoded<T: Encode>(body: &T) -> Bytes {
        let mut buf = BytesMut::new();
        body.encode(&mut buf).unwrap();
        buf.freeze()
    }

    #[test]
    fn snac_frame_layout_is_big_endian() {
        let frame = SnacFrame {
            food_group: food_group::ICBM,
            sub_group: icbm::CHANNEL_MSG_TO_HOST,
            flags: 0,
            request_id: 0x0102_0304,
        };
        assert_eq!(
            &encoded(&frame)[..],
            &[0x00, 0x04, 0x00, 0x06, 0x00, 0x00, 0x01, 0x02, 0x03, 0x04]
        );
        assert_eq!(frame.to_string(), "ICBM/ICBMChannelMsgToHost");
    }

    #[test]
    fn anonymous_evil_notification_has_no_sender() {
        let mut buf = Bytes::from_static(&[0x00, 0x21]);
        let notice = OServiceEvilNotification::decode(&mut buf).unwrap();
        assert_eq!(notice.new_evil, 0x21);
        assert_eq!(notice.sender(), None);

        let mut empty = Bytes::new();
        let notice = OServiceEvilNotification::decode(&mut empty).unwrap();
        assert_eq!(notice.sender(), None);
    }

    #[test]
    fn identified_evil_notification_names_sender() {
        let notice = OServiceEvilNotification {
            new_evil: 100,
            snitcher: Some(UserInfo::new("alice")),
        };
        let mut buf = encoded(&notice);
        let decoded = OServiceEvilNotification::decode(&mut buf).unwrap();
        assert_eq!(decoded.sender(), Some("alice"));
    }

    #[test]
    fn msg_to_client_exposes_flags_and_text() {
        let msg = IcbmChannelMsgToClient {
            cookie: 42,
            channel_id: 1,
            sender: UserInfo::new("alice"),
            tlvs: TlvList::new()
                .with(Tlv::new(icbm::TLV_AOL_IM_DATA, crate::wire::compose_im_data("hi").unwrap()))
                .with(Tlv::new(icbm::TLV_WANT_EVENTS, Bytes::new())),
        };
        let mut buf = encoded(&msg);
        let decoded = IcbmChannelMsgToClient::decode(&mut buf).unwrap();
        assert_eq!(decoded.screen_name(), "alice");
        assert_eq!(decoded.cookie, 42);
        assert!(decoded.wants_events());
        assert_eq!(decoded.message_text().unwrap().as_deref(), Some("hi"));
    }

    #[test]
    fn msg_to_client_without_im_data_has_no_text() {
        let msg = IcbmChannelMsgToClient {
            sender: UserInfo::new("bob"),
            ..Default::default()
        };
        assert_eq!(msg.message_text().unwrap(), None);
        assert!(!msg.wants_events());
    }
}
