use crate::catalog::{Catalog, KeyPolicy, ProducerConfig};
use crate::entity::Entity;
use anyhow::Context;
use rdkafka::{
    ClientConfig,
    admin::{AdminClient, AdminOptions, NewTopic, TopicReplication},
    producer::{FutureProducer, FutureRecord},
    util::Timeout,
};
use serde_json::{Map, Value};
use std::{collections::HashMap, time::Duration};
use tokio::sync::Mutex;
use uuid::Uuid;

/// Records are batched to the broker in chunks of this size.
const BATCH_SIZE: usize = 10_000;

/// Timeout applied to admin create-topics calls.
const ADMIN_TIMEOUT: Duration = Duration::from_secs(60);

/// Default `retention.ms` applied to a created topic when the dataset config does not specify
/// one.
const DEFAULT_RETENTION_MS: &str = "-1";

/// Writes entity batches to Kafka topics on behalf of producer datasets, deriving record keys
/// and optionally projecting entities down to a namespace-stripped shape before serialization.
pub struct ProducerEngine {
    bootstrap_servers: String,
    writers: Mutex<HashMap<String, FutureProducer>>,
}

impl ProducerEngine {
    pub fn new(bootstrap_servers: impl Into<String>) -> Self {
        Self {
            bootstrap_servers: bootstrap_servers.into(),
            writers: Mutex::new(HashMap::new()),
        }
    }

    /// Ensures every producer dataset configured with `create_topic = true` has its topic
    /// created on the broker. Already-exists responses are not treated as failures.
    pub async fn ensure_topics(&self, catalog: &Catalog) -> anyhow::Result<()> {
        let to_create: Vec<&ProducerConfig> = catalog
            .producers
            .iter()
            .filter(|p| p.create_topic)
            .collect();

        if to_create.is_empty() {
            return Ok(());
        }

        let admin: AdminClient<_> = ClientConfig::new()
            .set("bootstrap.servers", &self.bootstrap_servers)
            .create()
            .context("create Kafka admin client")?;

        let mut new_topics = Vec::with_capacity(to_create.len());
        // owns each topic's config entries so NewTopic (which borrows) can reference them
        let mut topic_configs: Vec<Vec<(String, String)>> = Vec::with_capacity(to_create.len());

        for producer in &to_create {
            let settings = producer.topic_settings.as_ref();

            let mut config: HashMap<String, String> = settings
                .and_then(|s| s.config.clone())
                .unwrap_or_default();

            config
                .entry("retention.ms".to_string())
                .or_insert_with(|| DEFAULT_RETENTION_MS.to_string());

            topic_configs.push(config.into_iter().collect());
        }

        for (producer, config) in to_create.iter().zip(topic_configs.iter()) {
            let settings = producer.topic_settings.as_ref();
            let partitions = settings.map(|s| s.partitions).unwrap_or(1);
            let replicas = settings.map(|s| s.replicas).unwrap_or(1);

            let mut topic = NewTopic::new(
                &producer.topic,
                partitions,
                TopicReplication::Fixed(replicas),
            );
            for (k, v) in config {
                topic = topic.set(k, v);
            }
            new_topics.push(topic);
        }

        let options = AdminOptions::new().request_timeout(Some(Timeout::After(ADMIN_TIMEOUT)));

        let results = admin
            .create_topics(&new_topics, &options)
            .await
            .context("create topics")?;

        for result in results {
            match result {
                Ok(topic) => tracing::info!(topic, "topic created"),
                Err((topic, err)) if is_topic_exists(&err) => {
                    tracing::debug!(topic, "topic already exists");
                }
                Err((topic, err)) => {
                    return Err(anyhow::anyhow!("create topic {topic} failed: {err:?}"));
                }
            }
        }

        Ok(())
    }

    /// Writes `entities` to `config.topic`, deriving each record's key per `config.key` and
    /// projecting the value per `config.strip_props`, in one batched write.
    pub async fn produce_entities(
        &self,
        config: &ProducerConfig,
        entities: &[Entity],
    ) -> anyhow::Result<()> {
        let producer = self.writer_for(&config.dataset).await?;

        for chunk in entities.chunks(BATCH_SIZE) {
            let mut sends = Vec::with_capacity(chunk.len());

            for entity in chunk {
                let key = derive_key(config.key, entity);
                let value = if config.strip_props {
                    serde_json::to_vec(&strip_props(entity))
                } else {
                    serde_json::to_vec(&entity.to_json())
                }
                .context("serialize producer record value")?;

                let mut record = FutureRecord::to(&config.topic).payload(&value);
                if let Some(key) = key.as_deref() {
                    record = record.key(key);
                }

                sends.push(producer.send(record, Duration::from_secs(0)));
            }

            for result in futures::future::join_all(sends).await {
                result.map_err(|(e, _)| anyhow::anyhow!("produce record: {e}"))?;
            }
        }

        Ok(())
    }

    async fn writer_for(&self, dataset: &str) -> anyhow::Result<FutureProducer> {
        let mut writers = self.writers.lock().await;

        if let Some(producer) = writers.get(dataset) {
            return Ok(producer.clone());
        }

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &self.bootstrap_servers)
            .set("partitioner", "murmur2_random")
            .create()
            .context("create Kafka producer")?;

        writers.insert(dataset.to_string(), producer.clone());

        Ok(producer)
    }
}

/// Derives the record key per the dataset's key policy.
fn derive_key(policy: Option<KeyPolicy>, entity: &Entity) -> Option<Vec<u8>> {
    match policy {
        Some(KeyPolicy::Id) => Some(entity.id.clone().into_bytes()),
        Some(KeyPolicy::Uuid) => Some(Uuid::new_v4().to_string().into_bytes()),
        Some(KeyPolicy::None) | None => None,
    }
}

/// Projects an entity to the namespace-stripped shape used when `strip_props = true`: the
/// namespace prefix (everything up to and including the first `:`) is removed from the id and
/// from every property key.
fn strip_props(entity: &Entity) -> Value {
    let mut stripped = Map::new();

    stripped.insert("id".to_string(), Value::String(strip_prefix(&entity.id)));
    stripped.insert("deleted".to_string(), Value::Bool(entity.deleted));

    let mut props = Map::new();
    for (key, value) in &entity.properties {
        props.insert(strip_prefix(key), value.clone());
    }
    stripped.insert("props".to_string(), Value::Object(props));

    Value::Object(stripped)
}

/// Returns the substring after the first `:`, or the whole string if there is no `:`.
fn strip_prefix(value: &str) -> String {
    match value.split_once(':') {
        Some((_, tail)) => tail.to_string(),
        None => value.to_string(),
    }
}

fn is_topic_exists(error: &rdkafka::error::RDKafkaErrorCode) -> bool {
    matches!(error, rdkafka::error::RDKafkaErrorCode::TopicAlreadyExists)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity_with(id: &str, props: &[(&str, &str)]) -> Entity {
        let mut properties = Map::new();
        for (k, v) in props {
            properties.insert(k.to_string(), Value::String(v.to_string()));
        }
        Entity {
            id: id.to_string(),
            deleted: false,
            properties,
            references: Map::new(),
            namespaces: None,
        }
    }

    #[test]
    fn strip_props_removes_namespace_prefixes() {
        let entity = entity_with("ns0:howdy", &[("ns0:line", "How are all y'all doing!")]);
        let stripped = strip_props(&entity);
        assert_eq!(stripped["id"], "howdy");
        assert_eq!(stripped["props"]["line"], "How are all y'all doing!");
        assert_eq!(stripped["deleted"], false);
    }

    #[test]
    fn strip_prefix_is_noop_without_colon() {
        assert_eq!(strip_prefix("no-colon-here"), "no-colon-here");
    }

    #[test]
    fn derive_key_variants() {
        let entity = entity_with("ns0:id-1", &[]);
        assert_eq!(derive_key(Some(KeyPolicy::Id), &entity), Some(b"ns0:id-1".to_vec()));
        assert_eq!(derive_key(Some(KeyPolicy::None), &entity), None);
        assert_eq!(derive_key(None, &entity), None);
        assert!(derive_key(Some(KeyPolicy::Uuid), &entity).is_some());
    }
}
