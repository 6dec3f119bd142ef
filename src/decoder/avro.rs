use super::{Decoder, RawRecord};
use anyhow::Context;
use apache_avro::{Schema as AvroSchema, from_avro_datum, types::Value as AvroValue};
use async_trait::async_trait;
use schema_registry_client::rest::{
    client_config::ClientConfig,
    schema_registry_client::{Client, SchemaRegistryClient},
};
use tokio::sync::Mutex;
use std::collections::HashMap;

/// Decodes Confluent wire-format Avro records by reading the 4-byte big-endian schema id embedded
/// after the leading magic byte, fetching (and memoizing) the schema from the registry, and
/// re-serializing the decoded value as JSON.
pub struct AvroDecoder {
    client: SchemaRegistryClient,
    cache: Mutex<HashMap<u32, AvroSchema>>,
}

impl AvroDecoder {
    pub fn new(registry_location: &str) -> anyhow::Result<Self> {
        let client_config = ClientConfig::new(vec![registry_location.to_string()]);
        let client = SchemaRegistryClient::new(client_config);

        Ok(Self {
            client,
            cache: Mutex::new(HashMap::new()),
        })
    }

    async fn schema_for(&self, schema_id: u32) -> anyhow::Result<AvroSchema> {
        if let Some(schema) = self.cache.lock().await.get(&schema_id) {
            return Ok(schema.clone());
        }

        let registered = self
            .client
            .get_by_id(schema_id, None)
            .await
            .with_context(|| format!("fetch schema {schema_id} from registry"))?;

        let raw = registered
            .schema
            .context("registered schema has no definition")?;

        let parsed = AvroSchema::parse_str(&raw).context("parse Avro schema definition")?;

        self.cache.lock().await.insert(schema_id, parsed.clone());

        Ok(parsed)
    }
}

#[async_trait]
impl Decoder for AvroDecoder {
    async fn decode(&self, record: &RawRecord) -> anyhow::Result<Vec<u8>> {
        let value = &record.value;

        if value.len() < 5 {
            anyhow::bail!("Avro wire value too short to contain a schema id");
        }

        let schema_id = u32::from_be_bytes([value[1], value[2], value[3], value[4]]);

        let schema = self.schema_for(schema_id).await?;

        let mut body = &value[5..];
        let decoded = from_avro_datum(&schema, &mut body, None)
            .context("decode Avro binary payload")?;

        let json = avro_value_to_json(decoded)?;

        serde_json::to_vec(&json).context("serialize decoded Avro value to JSON")
    }
}

fn avro_value_to_json(value: AvroValue) -> anyhow::Result<serde_json::Value> {
    serde_json::to_value(
        apache_avro::from_value::<serde_json::Value>(&value)
            .context("convert Avro value to JSON")?,
    )
    .context("serialize Avro-derived JSON")
}
