//! JSON message document.
//!
//! A [`Message`] is always a JSON object. Byte fields travel as upper-case
//! hex strings. Accessors fail with [`ProtocolError::JsonAccessFailure`]
//! naming the field, so handlers can propagate with `?`.

use serde_json::{Map, Value};

use crate::error::ProtocolError;
use devauth_common::field;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Message {
    root: Map<String, Value>,
}

impl Message {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a serialized document. Anything but a JSON object is rejected.
    pub fn parse(data: &[u8]) -> Result<Self, ProtocolError> {
        match serde_json::from_slice::<Value>(data) {
            Ok(Value::Object(root)) => Ok(Self { root }),
            Ok(_) => Err(ProtocolError::bad_message("document is not an object")),
            Err(e) => Err(ProtocolError::bad_message(format!("invalid json: {e}"))),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(&self.root).map_err(|e| ProtocolError::alloc(e.to_string()))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.root.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    pub fn get_int(&self, key: &str) -> Result<i64, ProtocolError> {
        self.root
            .get(key)
            .and_then(Value::as_i64)
            .ok_or_else(|| ProtocolError::json(key))
    }

    /// `Ok(None)` when absent; malformed values are still errors.
    pub fn get_opt_int(&self, key: &str) -> Result<Option<i64>, ProtocolError> {
        match self.root.get(key) {
            None => Ok(None),
            Some(v) => v.as_i64().map(Some).ok_or_else(|| ProtocolError::json(key)),
        }
    }

    pub fn get_string(&self, key: &str) -> Result<&str, ProtocolError> {
        self.root
            .get(key)
            .and_then(Value::as_str)
            .ok_or_else(|| ProtocolError::json(key))
    }

    pub fn get_bytes(&self, key: &str) -> Result<Vec<u8>, ProtocolError> {
        let text = self.get_string(key)?;
        hex::decode(text).map_err(|_| ProtocolError::json(key))
    }

    /// Hex field that must decode to exactly `N` bytes.
    pub fn get_array<const N: usize>(&self, key: &str) -> Result<[u8; N], ProtocolError> {
        let bytes = self.get_bytes(key)?;
        bytes.try_into().map_err(|_| ProtocolError::json(key))
    }

    pub fn get_object(&self, key: &str) -> Result<Message, ProtocolError> {
        match self.root.get(key) {
            Some(Value::Object(map)) => Ok(Message { root: map.clone() }),
            _ => Err(ProtocolError::json(key)),
        }
    }

    /// The nested `payload` object.
    pub fn payload(&self) -> Result<Message, ProtocolError> {
        self.get_object(field::PAYLOAD)
    }

    pub fn add_int(&mut self, key: &str, value: i64) -> &mut Self {
        self.root.insert(key.to_string(), Value::from(value));
        self
    }

    pub fn add_bytes(&mut self, key: &str, value: &[u8]) -> &mut Self {
        self.root
            .insert(key.to_string(), Value::String(hex::encode_upper(value)));
        self
    }

    pub fn add_string(&mut self, key: &str, value: &str) -> &mut Self {
        self.root
            .insert(key.to_string(), Value::String(value.to_string()));
        self
    }

    pub fn add_object(&mut self, key: &str, value: Message) -> &mut Self {
        self.root.insert(key.to_string(), Value::Object(value.root));
        self
    }

    /// Merge `extra` into this message's `payload`, creating it if needed.
    pub fn merge_payload(&mut self, extra: Message) -> &mut Self {
        let payload = self
            .root
            .entry(field::PAYLOAD.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(map) = payload {
            map.extend(extra.root);
        } else {
            *payload = Value::Object(extra.root);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_are_upper_hex() {
        let mut msg = Message::new();
        msg.add_bytes("salt", &[0xab, 0x01]);
        let raw = String::from_utf8(msg.to_bytes().unwrap()).unwrap();
        assert_eq!(raw, r#"{"salt":"AB01"}"#);
        assert_eq!(msg.get_bytes("salt").unwrap(), vec![0xab, 0x01]);
    }

    #[test]
    fn test_lower_hex_is_accepted() {
        let msg = Message::parse(br#"{"token":"ab01"}"#).unwrap();
        assert_eq!(msg.get_array::<2>("token").unwrap(), [0xab, 0x01]);
    }

    #[test]
    fn test_wrong_length_array_is_json_error() {
        let msg = Message::parse(br#"{"token":"AB01"}"#).unwrap();
        assert_eq!(
            msg.get_array::<16>("token").unwrap_err(),
            ProtocolError::json("token")
        );
    }

    #[test]
    fn test_non_object_rejected() {
        assert!(matches!(
            Message::parse(b"[1,2,3]"),
            Err(ProtocolError::BadMessage(_))
        ));
        assert!(matches!(
            Message::parse(b"\xff\xfe"),
            Err(ProtocolError::BadMessage(_))
        ));
    }

    #[test]
    fn test_missing_and_mistyped_fields() {
        let msg = Message::parse(br#"{"message":"one","payload":5}"#).unwrap();
        assert_eq!(msg.get_int("message").unwrap_err(), ProtocolError::json("message"));
        assert_eq!(msg.payload().unwrap_err(), ProtocolError::json("payload"));
        assert_eq!(msg.get_opt_int("keyLength").unwrap(), None);
        assert!(msg.get_opt_int("message").is_err());
    }

    #[test]
    fn test_merge_payload() {
        let mut outer = Message::new();
        let mut first = Message::new();
        first.add_int("a", 1);
        outer.add_object(field::PAYLOAD, first);

        let mut extra = Message::new();
        extra.add_int("b", 2);
        outer.merge_payload(extra);

        let payload = outer.payload().unwrap();
        assert_eq!(payload.get_int("a").unwrap(), 1);
        assert_eq!(payload.get_int("b").unwrap(), 2);
    }
}
