pub mod avro;
pub mod protobuf;

use crate::catalog::ConsumerConfig;
use anyhow::Context;
use async_trait::async_trait;

/// A single consumed record, trimmed to the fields the decoder/encoder pipeline needs.
#[derive(Clone, Debug)]
pub struct RawRecord {
    pub key: Option<Vec<u8>>,
    pub value: Vec<u8>,
    pub headers: Vec<(String, Vec<u8>)>,
}

/// Turns a raw broker record's value into a JSON byte sequence ready for the entity encoder.
/// Implementations are constructed once per consumer request and may hold per-request state
/// (e.g. the Avro decoder's schema cache).
#[async_trait]
pub trait Decoder: Send + Sync {
    async fn decode(&self, record: &RawRecord) -> anyhow::Result<Vec<u8>>;
}

/// Passthrough decoder: the record value is already JSON.
pub struct RawDecoder;

#[async_trait]
impl Decoder for RawDecoder {
    async fn decode(&self, record: &RawRecord) -> anyhow::Result<Vec<u8>> {
        Ok(record.value.clone())
    }
}

/// Constructs the [`Decoder`] named by a consumer dataset's configuration. Fails when the
/// required configuration for the selected variant is absent, mirroring
/// `internal/coder/decoder.go`'s `NewDecoder`.
pub async fn build(config: &ConsumerConfig) -> anyhow::Result<Box<dyn Decoder>> {
    use crate::catalog::ValueDecoderKind::*;

    match config.value_decoder.unwrap_or_default() {
        Raw => Ok(Box::new(RawDecoder)),
        Avro => {
            let registry = config
                .schema_registry
                .as_ref()
                .context("avro decoder requires schemaRegistry configuration")?;
            Ok(Box::new(avro::AvroDecoder::new(&registry.location)?))
        }
        Protobuf => {
            let schema = config
                .protobuf_schema
                .as_ref()
                .context("protobuf decoder requires protobufSchema configuration")?;
            Ok(Box::new(protobuf::ProtobufDecoder::new(
                &schema.path,
                &schema.file_name,
                &schema.message_type,
            )?))
        }
    }
}
