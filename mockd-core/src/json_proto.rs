//! Canonical JSON proto encoding helpers. Dynamic messages never get their own
//! generated Rust type; matching and response-building both go through a
//! round-trip via the documented protobuf/JSON mapping that
//! `prost-reflect` implements for us.

use prost_reflect::{DeserializeOptions, DynamicMessage, MessageDescriptor, SerializeOptions};

use crate::error::{CoreError, Result};

/// Project a dynamic message to a generic JSON object for matching
///: serialize with the canonical JSON mapping, then
/// parse back into a generic `serde_json::Value` tree.
pub fn message_to_json(msg: &DynamicMessage) -> Result<serde_json::Value> {
    let options = SerializeOptions::new().stringify_64_bit_integers(true);
    let mut buf = Vec::new();
    let mut serializer = serde_json::Serializer::new(&mut buf);
    msg.serialize_with_options(&mut serializer, &options)
        .map_err(|e| CoreError::MessageEncode(format!("failed to project message to JSON: {e}")))?;
    serde_json::from_slice(&buf)
        .map_err(|e| CoreError::MessageEncode(format!("projected JSON is malformed: {e}")))
}

/// Build a dynamic message from a generic JSON value, using the same
/// canonical mapping in reverse.
pub fn message_from_json(desc: &MessageDescriptor, value: serde_json::Value) -> Result<DynamicMessage> {
    let options = DeserializeOptions::new().deny_unknown_fields(false);
    DynamicMessage::deserialize_with_options(desc.clone(), value, &options)
        .map_err(|e| CoreError::MessageEncode(format!("failed to build message from JSON: {e}")))
}

/// Numeric-coercing, boolean-stringifying equality check used by the
/// gRPC request-field matcher.
pub fn values_equal(a: &serde_json::Value, b: &serde_json::Value) -> bool {
    match (a, b) {
        (serde_json::Value::Number(x), serde_json::Value::Number(y)) => {
            x.as_f64() == y.as_f64()
        }
        (serde_json::Value::String(x), serde_json::Value::String(y)) => x == y,
        (serde_json::Value::Bool(x), serde_json::Value::Bool(y)) => x == y,
        (serde_json::Value::Number(n), serde_json::Value::String(s))
        | (serde_json::Value::String(s), serde_json::Value::Number(n)) => {
            n.as_f64().map(|f| f.to_string() == *s).unwrap_or(false)
                || s.parse::<f64>().ok() == n.as_f64()
        }
        (serde_json::Value::Bool(b), serde_json::Value::String(s))
        | (serde_json::Value::String(s), serde_json::Value::Bool(b)) => b.to_string() == *s,
        (serde_json::Value::Null, serde_json::Value::Null) => true,
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost_reflect::DescriptorPool;
    use prost_types::{DescriptorProto, FieldDescriptorProto, FileDescriptorProto, FileDescriptorSet};

    fn fixture_desc() -> MessageDescriptor {
        let field = |name: &str, number: i32| FieldDescriptorProto {
            name: Some(name.into()),
            number: Some(number),
            r#type: Some(9), // TYPE_STRING
            label: Some(1),
            ..Default::default()
        };
        let message = DescriptorProto {
            name: Some("GetUserResponse".into()),
            field: vec![field("id", 1), field("name", 2)],
            ..Default::default()
        };
        let file = FileDescriptorProto {
            name: Some("fixture.proto".into()),
            package: Some("fixture".into()),
            message_type: vec![message],
            syntax: Some("proto3".into()),
            ..Default::default()
        };
        let pool = DescriptorPool::from_file_descriptor_set(FileDescriptorSet { file: vec![file] }).unwrap();
        pool.get_message_by_name("fixture.GetUserResponse").unwrap()
    }

    #[test]
    fn message_round_trips_through_canonical_json() {
        let desc = fixture_desc();
        let value = serde_json::json!({"id": "user-123", "name": "Test User"});
        let msg = message_from_json(&desc, value).unwrap();
        let projected = message_to_json(&msg).unwrap();
        assert_eq!(projected["id"], "user-123");
        assert_eq!(projected["name"], "Test User");
    }

    #[test]
    fn numeric_equality_crosses_representations() {
        assert!(values_equal(
            &serde_json::json!(42.0),
            &serde_json::json!("42")
        ));
        assert!(values_equal(&serde_json::json!(true), &serde_json::json!("true")));
        assert!(!values_equal(&serde_json::json!(1), &serde_json::json!("2")));
    }
}
