use super::{Decoder, RawRecord};
use anyhow::Context;
use async_trait::async_trait;
use protofish::context::Context as ProtoContext;
use protofish::decode::{EnumValue, MessageValue, Value as ProtoValue};
use serde_json::{Map, Value as JsonValue};
use std::path::Path;

/// Decodes a binary Protobuf message, loading the message descriptor from a `.proto` file on
/// disk at construction time and converting every decoded message into JSON.
pub struct ProtobufDecoder {
    context: ProtoContext,
    message_type: String,
}

impl ProtobufDecoder {
    pub fn new(path: &str, file_name: &str, message_type: &str) -> anyhow::Result<Self> {
        let full_path = Path::new(path).join(file_name);

        let source = std::fs::read_to_string(&full_path)
            .with_context(|| format!("read protobuf schema file {}", full_path.display()))?;

        let context = ProtoContext::parse([source]).context("parse protobuf schema")?;

        let fully_qualified = if message_type.starts_with('.') {
            message_type.to_string()
        } else {
            format!(".{message_type}")
        };

        context
            .get_message(&fully_qualified)
            .with_context(|| format!("message type {message_type} not found in schema"))?;

        Ok(Self {
            context,
            message_type: fully_qualified,
        })
    }
}

#[async_trait]
impl Decoder for ProtobufDecoder {
    async fn decode(&self, record: &RawRecord) -> anyhow::Result<Vec<u8>> {
        let message_info = self
            .context
            .get_message(&self.message_type)
            .context("message type resolved at construction is missing")?;

        let decoded = message_info.decode(&record.value, &self.context);

        let json = message_value_to_json(&decoded, &self.context);

        serde_json::to_vec(&json).context("serialize decoded protobuf value to JSON")
    }
}

fn message_value_to_json(message: &MessageValue, context: &ProtoContext) -> JsonValue {
    let mut out = Map::new();

    for field in &message.fields {
        let Some(info) = context
            .resolve_message(message.msg_ref)
            .get_field(field.number)
        else {
            continue;
        };

        out.insert(info.name.clone(), proto_value_to_json(&field.value, context));
    }

    JsonValue::Object(out)
}

fn proto_value_to_json(value: &ProtoValue, context: &ProtoContext) -> JsonValue {
    match value {
        ProtoValue::Double(v) => serde_json::json!(v),
        ProtoValue::Float(v) => serde_json::json!(v),
        ProtoValue::Int32(v) => serde_json::json!(v),
        ProtoValue::Int64(v) => serde_json::json!(v),
        ProtoValue::UInt32(v) => serde_json::json!(v),
        ProtoValue::UInt64(v) => serde_json::json!(v),
        ProtoValue::SInt32(v) => serde_json::json!(v),
        ProtoValue::SInt64(v) => serde_json::json!(v),
        ProtoValue::Fixed32(v) => serde_json::json!(v),
        ProtoValue::Fixed64(v) => serde_json::json!(v),
        ProtoValue::SFixed32(v) => serde_json::json!(v),
        ProtoValue::SFixed64(v) => serde_json::json!(v),
        ProtoValue::Bool(v) => serde_json::json!(v),
        ProtoValue::String(v) => serde_json::json!(v),
        ProtoValue::Bytes(v) => serde_json::json!(base64_encode(v)),
        ProtoValue::Message(m) => message_value_to_json(m, context),
        ProtoValue::Enum(EnumValue { value, .. }) => {
            serde_json::json!(context.resolve_enum(*value).name)
        }
        ProtoValue::Packed(items) => {
            JsonValue::Array(items.iter().map(|v| proto_value_to_json(v, context)).collect())
        }
        _ => JsonValue::Null,
    }
}

fn base64_encode(bytes: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(bytes)
}
