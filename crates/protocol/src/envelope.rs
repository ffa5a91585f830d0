//! The fixed-shape message unit exchanged over a session connection.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Envelope discriminator.  Closed set: any other value fails decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    /// Server → client: a fresh session was created for this connection.
    NewSession,
    /// Server → client: the carried session id was recovered.
    RecoveredSession,
    /// Either direction: ask the far end to run `target`.
    Request,
    /// Either direction: outcome of a `REQUEST`.
    Response,
    /// Server → client: progress notification.
    Info,
    /// Either direction: reception acknowledgment for nonce `ack`.
    Ack,
}

/// Wire envelope.
///
/// Only `type` is mandatory.  Fields that are not meaningful for a given
/// type are carried through untouched and ignored by the receiver, so newer
/// peers can add fields without breaking older ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: MessageType,

    /// Correlates a reply with one specific send attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ack: Option<u64>,

    /// Routing key (`REQUEST` and `RESPONSE`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,

    /// Outcome flag (`RESPONSE`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,

    /// Failure message (`RESPONSE` with `success = false`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Failure class, HTTP-style (`RESPONSE` with `success = false`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,

    /// Handler output (`RESPONSE` with `success = true`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    /// Session id (`NEW_SESSION` and `RECOVERED_SESSION`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,

    /// Request argument (`REQUEST`) or notification body (`INFO`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl Envelope {
    /// An envelope of the given type with every optional field unset.
    pub fn new(kind: MessageType) -> Self {
        Self {
            kind,
            ack: None,
            target: None,
            success: None,
            error: None,
            code: None,
            result: None,
            sid: None,
            payload: None,
        }
    }

    pub fn new_session(sid: impl Into<String>) -> Self {
        Self {
            sid: Some(sid.into()),
            ack: Some(0),
            ..Self::new(MessageType::NewSession)
        }
    }

    pub fn recovered_session(sid: impl Into<String>) -> Self {
        Self {
            sid: Some(sid.into()),
            ack: Some(0),
            ..Self::new(MessageType::RecoveredSession)
        }
    }

    pub fn request(target: impl Into<String>, payload: Value) -> Self {
        Self {
            target: Some(target.into()),
            payload: Some(payload),
            ..Self::new(MessageType::Request)
        }
    }

    pub fn response_ok(target: impl Into<String>, result: Value) -> Self {
        Self {
            target: Some(target.into()),
            success: Some(true),
            result: Some(result),
            ..Self::new(MessageType::Response)
        }
    }

    pub fn response_err(target: impl Into<String>, code: u16, error: impl Into<String>) -> Self {
        Self {
            target: Some(target.into()),
            success: Some(false),
            code: Some(code),
            error: Some(error.into()),
            ..Self::new(MessageType::Response)
        }
    }

    pub fn info(payload: Value) -> Self {
        Self {
            payload: Some(payload),
            ..Self::new(MessageType::Info)
        }
    }

    pub fn ack(nonce: u64) -> Self {
        Self {
            ack: Some(nonce),
            ..Self::new(MessageType::Ack)
        }
    }

    /// Copy of `self` stamped with `nonce`.
    pub fn with_ack(&self, nonce: u64) -> Self {
        Self {
            ack: Some(nonce),
            ..self.clone()
        }
    }

    /// The nonce the receiver must acknowledge, if any.  `ACK` envelopes are
    /// never acknowledged themselves.
    pub fn ack_requested(&self) -> Option<u64> {
        match self.kind {
            MessageType::Ack => None,
            _ => self.ack,
        }
    }

    /// Whether this is the `ACK` for `nonce`.
    pub fn acknowledges(&self, nonce: u64) -> bool {
        self.kind == MessageType::Ack && self.ack == Some(nonce)
    }

    /// Whether this is a `RESPONSE` for `target`.
    pub fn is_response_to(&self, target: &str) -> bool {
        self.kind == MessageType::Response && self.target.as_deref() == Some(target)
    }

    /// Routing key of a `REQUEST`, if this is one.
    pub fn request_target(&self) -> Option<&str> {
        match self.kind {
            MessageType::Request => self.target.as_deref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn type_uses_screaming_snake_case() {
        let v = serde_json::to_value(Envelope::recovered_session("s1")).unwrap();
        assert_eq!(v, json!({"type": "RECOVERED_SESSION", "ack": 0, "sid": "s1"}));
    }

    #[test]
    fn unset_fields_are_omitted() {
        let v = serde_json::to_value(Envelope::ack(7)).unwrap();
        assert_eq!(v, json!({"type": "ACK", "ack": 7}));
    }

    #[test]
    fn unknown_type_is_rejected() {
        let err = serde_json::from_value::<Envelope>(json!({"type": "HELLO"}));
        assert!(err.is_err());
    }

    #[test]
    fn foreign_fields_are_ignored() {
        let env: Envelope = serde_json::from_value(json!({
            "type": "ACK",
            "ack": 3,
            "target": "ECHO",
            "extension": "v2",
        }))
        .unwrap();
        assert!(env.acknowledges(3));
        assert_eq!(env.target.as_deref(), Some("ECHO"));
    }

    #[test]
    fn ack_is_never_acknowledged() {
        assert_eq!(Envelope::ack(4).ack_requested(), None);
        assert_eq!(Envelope::info(json!({})).with_ack(4).ack_requested(), Some(4));
        assert_eq!(Envelope::info(json!({})).ack_requested(), None);
    }

    #[test]
    fn response_matching_requires_type_and_target() {
        let ok = Envelope::response_ok("ECHO", json!(1));
        assert!(ok.is_response_to("ECHO"));
        assert!(!ok.is_response_to("BUILD"));
        assert!(!Envelope::request("ECHO", json!(1)).is_response_to("ECHO"));
    }

    #[test]
    fn request_target_only_for_requests() {
        assert_eq!(Envelope::request("ECHO", json!(null)).request_target(), Some("ECHO"));
        assert_eq!(Envelope::response_ok("ECHO", json!(null)).request_target(), None);
    }
}
