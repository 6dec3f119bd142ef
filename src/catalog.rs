use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The full dataset catalog: the declarative configuration driving both engines. Mirrors
/// `internal/conf/configuration.go`'s `KafkaConfig`.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Catalog {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub producers: Vec<ProducerConfig>,
    #[serde(default)]
    pub consumers: Vec<ConsumerConfig>,
}

impl Catalog {
    /// Looks up a producer dataset by name.
    pub fn producer(&self, dataset: &str) -> Option<&ProducerConfig> {
        self.producers.iter().find(|p| p.dataset == dataset)
    }

    /// Looks up a consumer dataset by name.
    pub fn consumer(&self, dataset: &str) -> Option<&ConsumerConfig> {
        self.consumers.iter().find(|c| c.dataset == dataset)
    }
}

/// Key derivation policy applied to produced records. Any `key` value other than `"id"` or
/// `"uuid"` — including absence of the field — falls back to [`KeyPolicy::None`], mirroring
/// `determineKey`'s `default: return nil` case rather than rejecting the unrecognized literal.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum KeyPolicy {
    Id,
    Uuid,
    #[serde(other)]
    None,
}

/// Declarative producer-side dataset configuration.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerConfig {
    pub dataset: String,
    pub topic: String,
    #[serde(default)]
    pub create_topic: bool,
    #[serde(default)]
    pub topic_settings: Option<TopicSettings>,
    #[serde(default)]
    pub strip_props: bool,
    #[serde(default)]
    pub key: Option<KeyPolicy>,
}

/// Topic creation parameters applied when `create_topic` is set.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicSettings {
    pub partitions: i32,
    pub replicas: i32,
    #[serde(default)]
    pub config: Option<HashMap<String, String>>,
}

/// Declarative consumer-side dataset configuration.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerConfig {
    pub dataset: String,
    pub topic: String,
    pub group_id: String,
    #[serde(default)]
    pub value_decoder: Option<ValueDecoderKind>,
    #[serde(default)]
    pub position: Option<String>,
    pub name_space: String,
    pub base_name_space: String,
    #[serde(default)]
    pub include_headers: bool,
    pub entity_id_constructor: String,
    #[serde(default)]
    pub types: Vec<String>,
    #[serde(default)]
    pub field_mappings: Vec<FieldMapping>,
    #[serde(default)]
    pub schema_registry: Option<SchemaRegistryConfig>,
    #[serde(default)]
    pub protobuf_schema: Option<ProtobufSchemaConfig>,
}

/// Selects which [`crate::decoder::Decoder`] variant is used for a consumer dataset. Any value
/// other than `"avro"` or `"protobuf"` falls back to [`ValueDecoderKind::Raw`], mirroring
/// `NewDecoder`'s switch, which only special-cases those two literals and otherwise falls through
/// to the passthrough decoder.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ValueDecoderKind {
    Avro,
    Protobuf,
    #[default]
    #[serde(other)]
    Raw,
}

/// Schema registry location for an `avro` consumer dataset.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaRegistryConfig {
    pub location: String,
}

/// Protobuf descriptor location for a `protobuf` consumer dataset.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtobufSchemaConfig {
    pub path: String,
    pub file_name: String,
    #[serde(rename = "type")]
    pub message_type: String,
}

/// A single declarative mapping from a decoded JSON field to an entity property, reference,
/// identifier, or deletion flag.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldMapping {
    pub path: String,
    pub field_name: String,
    #[serde(default)]
    pub property_name: Option<String>,
    #[serde(default)]
    pub is_id_field: bool,
    #[serde(default)]
    pub is_deleted_field: bool,
    #[serde(default)]
    pub is_reference: bool,
    #[serde(default)]
    pub reference_template: Option<String>,
    #[serde(default)]
    pub ignore_field: bool,
}
