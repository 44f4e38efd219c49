//! Gateway packet framing.
//!
//! Every gateway frame is a JSON object `{op, d, s, t}`. `s` and `t` are only
//! populated on dispatch packets; all four keys are always written, with
//! `null` where absent.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::disguise::{ClientProperties, Disguise};
use crate::error::ProtoError;

/// Gateway operation codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum OpCode {
    /// A named event (server → client).
    Dispatch,
    /// Liveness ping (both directions).
    Heartbeat,
    /// Start a new session.
    Identify,
    /// Update the client's presence.
    PresenceUpdate,
    /// Join, move or leave voice channels.
    VoiceStateUpdate,
    /// Continue a previous session.
    Resume,
    /// Server asks the client to reconnect and resume.
    Reconnect,
    /// Request the member list of a guild.
    RequestGuildMembers,
    /// The session is invalid; `d` says whether it may be resumed.
    InvalidSession,
    /// First packet after connecting, carries the heartbeat interval.
    Hello,
    /// Acknowledges a heartbeat.
    HeartbeatAck,
}

impl OpCode {
    /// The numeric value sent on the wire.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Dispatch => 0,
            Self::Heartbeat => 1,
            Self::Identify => 2,
            Self::PresenceUpdate => 3,
            Self::VoiceStateUpdate => 4,
            Self::Resume => 6,
            Self::Reconnect => 7,
            Self::RequestGuildMembers => 8,
            Self::InvalidSession => 9,
            Self::Hello => 10,
            Self::HeartbeatAck => 11,
        }
    }

    /// Whether this op is part of connection upkeep rather than application data.
    #[must_use]
    pub const fn is_control(self) -> bool {
        matches!(
            self,
            Self::Heartbeat
                | Self::Identify
                | Self::Resume
                | Self::Reconnect
                | Self::InvalidSession
                | Self::Hello
                | Self::HeartbeatAck
        )
    }
}

impl TryFrom<u8> for OpCode {
    type Error = ProtoError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::Dispatch,
            1 => Self::Heartbeat,
            2 => Self::Identify,
            3 => Self::PresenceUpdate,
            4 => Self::VoiceStateUpdate,
            6 => Self::Resume,
            7 => Self::Reconnect,
            8 => Self::RequestGuildMembers,
            9 => Self::InvalidSession,
            10 => Self::Hello,
            11 => Self::HeartbeatAck,
            other => return Err(ProtoError::InvalidOpcode(other)),
        })
    }
}

impl From<OpCode> for u8 {
    fn from(op: OpCode) -> Self {
        op.code()
    }
}

impl std::fmt::Display for OpCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}({})", self.code())
    }
}

/// A single gateway frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayPacket {
    /// Operation.
    pub op: OpCode,
    /// Event payload.
    #[serde(default)]
    pub d: Option<Value>,
    /// Sequence number, dispatch only.
    #[serde(default)]
    pub s: Option<u64>,
    /// Event name, dispatch only.
    #[serde(default)]
    pub t: Option<String>,
}

impl GatewayPacket {
    /// A non-dispatch packet with the given payload.
    #[must_use]
    pub const fn new(op: OpCode, d: Option<Value>) -> Self {
        Self {
            op,
            d,
            s: None,
            t: None,
        }
    }

    /// A dispatch packet.
    #[must_use]
    pub fn dispatch(event: impl Into<String>, seq: u64, d: Value) -> Self {
        Self {
            op: OpCode::Dispatch,
            d: Some(d),
            s: Some(seq),
            t: Some(event.into()),
        }
    }

    /// Heartbeat carrying the last sequence number seen, if any.
    #[must_use]
    pub fn heartbeat(seq: Option<u64>) -> Self {
        Self::new(OpCode::Heartbeat, Some(seq.map_or(Value::Null, Value::from)))
    }

    /// Identify with the given token and disguise.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be encoded.
    pub fn identify(token: &str, disguise: &Disguise) -> Result<Self, ProtoError> {
        let identify = Identify::new(token, disguise);
        Ok(Self::new(OpCode::Identify, Some(to_value(&identify)?)))
    }

    /// Resume a previous session.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be encoded.
    pub fn resume(token: &str, session_id: &str, seq: Option<u64>) -> Result<Self, ProtoError> {
        let resume = Resume {
            token: token.to_string(),
            session_id: session_id.to_string(),
            seq,
        };
        Ok(Self::new(OpCode::Resume, Some(to_value(&resume)?)))
    }

    /// The event name of a dispatch packet.
    #[must_use]
    pub fn event_name(&self) -> Option<&str> {
        self.t.as_deref()
    }

    /// Decode the payload into `T`.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is absent or has the wrong shape.
    pub fn payload<T: serde::de::DeserializeOwned>(&self) -> Result<T, ProtoError> {
        let d = self.d.clone().ok_or(ProtoError::MissingField("d"))?;
        serde_json::from_value(d).map_err(|e| ProtoError::Decoding(e.to_string()))
    }

    /// Serialize to a JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, ProtoError> {
        serde_json::to_string(self).map_err(|e| ProtoError::Encoding(e.to_string()))
    }

    /// Parse a JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is not a valid packet.
    pub fn from_json(json: &str) -> Result<Self, ProtoError> {
        serde_json::from_str(json).map_err(|e| ProtoError::Decoding(e.to_string()))
    }
}

fn to_value<T: Serialize>(value: &T) -> Result<Value, ProtoError> {
    serde_json::to_value(value).map_err(|e| ProtoError::Encoding(e.to_string()))
}

/// Payload of [`OpCode::Hello`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hello {
    /// Milliseconds between heartbeats.
    pub heartbeat_interval: u64,
}

/// Payload of [`OpCode::Identify`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identify {
    /// Authentication token.
    pub token: String,
    /// Client capability bitmask.
    pub capabilities: u64,
    /// Client identity.
    pub properties: ClientProperties,
    /// Initial presence.
    pub presence: Presence,
    /// Whether payload compression is requested.
    pub compress: bool,
    /// Gateway intents; user sessions leave this unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intents: Option<u64>,
}

impl Identify {
    /// Build an identify payload from a token and disguise.
    #[must_use]
    pub fn new(token: &str, disguise: &Disguise) -> Self {
        Self {
            token: token.to_string(),
            capabilities: disguise.capabilities,
            properties: disguise.properties(),
            presence: Presence::default(),
            compress: false,
            intents: None,
        }
    }
}

/// Presence sent with identify.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Presence {
    /// `online`, `idle`, `dnd` or `invisible`.
    pub status: String,
    /// Idle since, in unix milliseconds.
    pub since: u64,
    /// Activities.
    pub activities: Vec<Value>,
    /// Whether the client is away from keyboard.
    pub afk: bool,
}

impl Default for Presence {
    fn default() -> Self {
        Self {
            status: "online".to_string(),
            since: 0,
            activities: Vec::new(),
            afk: false,
        }
    }
}

/// Payload of [`OpCode::Resume`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resume {
    /// Authentication token.
    pub token: String,
    /// Session being resumed.
    pub session_id: String,
    /// Last sequence number received.
    pub seq: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(0, OpCode::Dispatch ; "dispatch")]
    #[test_case(1, OpCode::Heartbeat ; "heartbeat")]
    #[test_case(2, OpCode::Identify ; "identify")]
    #[test_case(6, OpCode::Resume ; "resume")]
    #[test_case(7, OpCode::Reconnect ; "reconnect")]
    #[test_case(9, OpCode::InvalidSession ; "invalid session")]
    #[test_case(10, OpCode::Hello ; "hello")]
    #[test_case(11, OpCode::HeartbeatAck ; "heartbeat ack")]
    fn test_opcode_from_wire(code: u8, expected: OpCode) {
        assert_eq!(OpCode::try_from(code).unwrap(), expected);
        assert_eq!(u8::from(expected), code);
    }

    #[test_case(5 ; "gap")]
    #[test_case(12 ; "past end")]
    fn test_opcode_rejects_unknown(code: u8) {
        assert!(matches!(
            OpCode::try_from(code),
            Err(ProtoError::InvalidOpcode(c)) if c == code
        ));
    }

    #[test]
    fn test_packet_writes_all_keys() {
        let json = GatewayPacket::heartbeat(None).to_json().unwrap();
        let value: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["op"], 1);
        assert!(value["d"].is_null());
        assert!(value["s"].is_null());
        assert!(value["t"].is_null());
    }

    #[test]
    fn test_heartbeat_carries_sequence() {
        let packet = GatewayPacket::heartbeat(Some(42));
        assert_eq!(packet.d, Some(Value::from(42)));
    }

    #[test]
    fn test_decode_dispatch() {
        let packet =
            GatewayPacket::from_json(r#"{"op":0,"d":{"x":1},"s":3,"t":"MESSAGE_CREATE"}"#)
                .unwrap();
        assert_eq!(packet.op, OpCode::Dispatch);
        assert_eq!(packet.s, Some(3));
        assert_eq!(packet.event_name(), Some("MESSAGE_CREATE"));
    }

    #[test]
    fn test_decode_unknown_op_fails() {
        let err = GatewayPacket::from_json(r#"{"op":42,"d":null}"#).unwrap_err();
        assert!(matches!(err, ProtoError::Decoding(_)));
    }

    #[test]
    fn test_hello_payload() {
        let packet = GatewayPacket::from_json(r#"{"op":10,"d":{"heartbeat_interval":41250}}"#)
            .unwrap();
        let hello: Hello = packet.payload().unwrap();
        assert_eq!(hello.heartbeat_interval, 41250);
    }

    #[test]
    fn test_payload_missing() {
        let packet = GatewayPacket::new(OpCode::Hello, None);
        assert!(matches!(
            packet.payload::<Hello>(),
            Err(ProtoError::MissingField("d"))
        ));
    }

    #[test]
    fn test_identify_uses_disguise() {
        let disguise = Disguise::default();
        let packet = GatewayPacket::identify("tok", &disguise).unwrap();
        let identify: Identify = packet.payload().unwrap();
        assert_eq!(identify.token, "tok");
        assert_eq!(identify.capabilities, 125);
        assert_eq!(identify.properties.os, "Mac OS X");
        assert!(identify.intents.is_none());

        let raw = packet.d.unwrap();
        assert!(raw.get("intents").is_none());
    }

    #[test]
    fn test_resume_payload() {
        let packet = GatewayPacket::resume("tok", "abc", Some(17)).unwrap();
        assert_eq!(packet.op, OpCode::Resume);
        let resume: Resume = packet.payload().unwrap();
        assert_eq!(resume.session_id, "abc");
        assert_eq!(resume.seq, Some(17));
    }

    #[test]
    fn test_control_ops() {
        assert!(OpCode::Hello.is_control());
        assert!(!OpCode::Dispatch.is_control());
        assert!(!OpCode::PresenceUpdate.is_control());
    }
}
