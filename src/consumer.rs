use crate::catalog::ConsumerConfig;
use crate::decoder::{self, RawRecord};
use crate::encoder;
use crate::entity::Entity;
use crate::{cursor, cursor::Offsets};
use anyhow::Context;
use futures::StreamExt;
use rdkafka::{
    ClientConfig, Message, Offset as KafkaOffset, TopicPartitionList,
    consumer::{CommitMode, Consumer as RDConsumer, StreamConsumer},
    message::Headers,
};
use std::{
    collections::HashMap,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

/// Poll deadline per iteration of the consume loop.
const POLL_TIMEOUT: Duration = Duration::from_millis(500);

/// Consecutive nil polls tolerated while no message has been seen yet, before concluding the
/// topic is empty.
const WARMUP_NIL_TOLERANCE: u32 = 10;

const WARMUP_SLEEP: Duration = Duration::from_secs(1);

const SESSION_TIMEOUT_MS: &str = "6000";

/// Key identifying a single-flight consumer run slot.
type RunKey = (String, String);

/// A registered run: its cancellation handle plus a unique id so a run can tell, at cleanup
/// time, whether it is still the current holder of its slot.
struct RunSlot {
    id: u64,
    token: CancellationToken,
}

/// Runs per-request log consumption, enforcing at most one active run per `(topic, group)` pair
/// and emitting decoded, flattened entities through a channel.
pub struct ConsumerEngine {
    bootstrap_servers: String,
    runs: Mutex<HashMap<RunKey, RunSlot>>,
    next_run_id: AtomicU64,
}

impl ConsumerEngine {
    pub fn new(bootstrap_servers: impl Into<String>) -> Self {
        Self {
            bootstrap_servers: bootstrap_servers.into(),
            runs: Mutex::new(HashMap::new()),
            next_run_id: AtomicU64::new(0),
        }
    }

    /// Runs one change-set request to completion, streaming entities (and, at the end, a
    /// continuation entity when applicable) into `tx`. Returns once the run has ended, whatever
    /// the cause — depletion, limit reached, cancellation by a subsequent request, or error.
    pub async fn change_set(
        &self,
        config: ConsumerConfig,
        since: String,
        limit: i64,
        tx: mpsc::Sender<Entity>,
    ) -> anyhow::Result<()> {
        let key: RunKey = (config.topic.clone(), config.group_id.clone());
        let (id, token) = self.claim_run_slot(key.clone()).await;

        let result = self.run(&config, &since, limit, &tx, &token).await;

        self.release_run_slot(&key, id).await;

        result
    }

    /// Atomically cancels any prior run registered under `key` and installs a fresh token for
    /// this run, all under one lock acquisition so two concurrent callers can never both observe
    /// "no prior run".
    async fn claim_run_slot(&self, key: RunKey) -> (u64, CancellationToken) {
        let mut runs = self.runs.lock().await;

        if let Some(prior) = runs.remove(&key) {
            tracing::info!(topic = %key.0, group = %key.1, "cancelling prior consumer run");
            prior.token.cancel();
        }

        let id = self.next_run_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        runs.insert(key, RunSlot { id, token: token.clone() });
        (id, token)
    }

    /// Removes this run's slot from the index, but only if it is still the current holder (a
    /// later run may already have replaced it).
    async fn release_run_slot(&self, key: &RunKey, id: u64) {
        let mut runs = self.runs.lock().await;
        if runs.get(key).is_some_and(|slot| slot.id == id) {
            runs.remove(key);
        }
    }

    async fn run(
        &self,
        config: &ConsumerConfig,
        since: &str,
        limit: i64,
        tx: &mpsc::Sender<Entity>,
        token: &CancellationToken,
    ) -> anyhow::Result<()> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &self.bootstrap_servers)
            .set("group.id", &config.group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .set("session.timeout.ms", SESSION_TIMEOUT_MS)
            .create()
            .context("create Kafka consumer")?;

        let decoder = decoder::build(config).await?;

        let since_map = cursor::decode(since);
        self.reset_offsets(&consumer, &config.topic, &since_map)
            .await?;

        consumer
            .subscribe(&[config.topic.as_str()])
            .context("subscribe to topic")?;

        let namespace_uri = format!("{}{}/", config.base_name_space, config.name_space);
        tx.send(Entity::context(&namespace_uri)).await.ok();

        let mut stream = consumer.stream();

        let mut delivered: i64 = 0;
        let mut nil_count: u32 = 0;
        let mut is_beginning = true;
        let mut live_offsets: Offsets = Offsets::new();

        loop {
            if token.is_cancelled() {
                break;
            }

            let next = tokio::select! {
                _ = token.cancelled() => break,
                next = tokio::time::timeout(POLL_TIMEOUT, stream.next()) => next,
            };

            match next {
                Err(_elapsed) => {
                    if is_beginning {
                        nil_count += 1;
                        if nil_count >= WARMUP_NIL_TOLERANCE {
                            tracing::debug!(topic = %config.topic, "no records seen during warmup, treating topic as empty");
                            break;
                        }
                        tokio::time::sleep(WARMUP_SLEEP).await;
                    } else {
                        tracing::debug!(topic = %config.topic, "subscription depleted");
                        break;
                    }
                }
                Ok(None) => break,
                Ok(Some(Err(e))) => {
                    tracing::warn!("Kafka consumer error: {}", e);
                    if is_all_brokers_down(&e) {
                        break;
                    }
                }
                Ok(Some(Ok(message))) => {
                    is_beginning = false;
                    nil_count = 0;

                    if limit > -1 && delivered >= limit {
                        break;
                    }

                    let partition = message.partition();
                    let offset = message.offset();
                    let key = message.key().map(|k| k.to_vec());
                    let value = message.payload().unwrap_or(&[]).to_vec();
                    let headers = extract_headers(&message);

                    let raw = RawRecord {
                        key: key.clone(),
                        value,
                        headers: headers.clone(),
                    };

                    let decoded = decoder.decode(&raw).await?;
                    let entity = encoder::encode(key.as_deref(), &decoded, &headers, config);

                    live_offsets.insert(partition, offset);

                    if tx.send(entity).await.is_err() {
                        break;
                    }

                    delivered += 1;
                }
            }
        }

        self.emit_continuation(since, &since_map, &live_offsets, delivered, tx)
            .await;

        Ok(())
    }

    async fn reset_offsets(
        &self,
        consumer: &StreamConsumer,
        topic: &str,
        since_map: &Offsets,
    ) -> anyhow::Result<()> {
        let mut tpl = TopicPartitionList::new();

        if !since_map.is_empty() {
            for (partition, offset) in since_map {
                tpl.add_partition_offset(topic, *partition, KafkaOffset::Offset(offset + 1))
                    .context("add partition offset for resume")?;
            }
        } else {
            let metadata = consumer
                .fetch_metadata(Some(topic), Duration::from_secs(10))
                .context("fetch topic metadata")?;

            let topic_metadata = metadata
                .topics()
                .first()
                .context("topic metadata missing from broker response")?;

            for partition in topic_metadata.partitions() {
                tpl.add_partition_offset(topic, partition.id(), KafkaOffset::Offset(0))
                    .context("add partition offset for fresh start")?;
            }
        }

        consumer
            .commit(&tpl, CommitMode::Sync)
            .context("commit reset offsets")
    }

    async fn emit_continuation(
        &self,
        since: &str,
        since_map: &Offsets,
        live_offsets: &Offsets,
        delivered: i64,
        tx: &mpsc::Sender<Entity>,
    ) {
        if delivered > 0 {
            let mut merged = since_map.clone();
            for (partition, offset) in live_offsets {
                merged.insert(*partition, *offset);
            }
            let token = cursor::encode(&merged);
            tx.send(Entity::continuation(&token)).await.ok();
        } else if !since.is_empty() {
            tx.send(Entity::continuation(since)).await.ok();
        }
    }
}

fn extract_headers(message: &impl Message) -> Vec<(String, Vec<u8>)> {
    let Some(headers) = message.headers() else {
        return Vec::new();
    };

    (0..headers.count())
        .map(|i| {
            let header = headers.get(i);
            (header.key.to_string(), header.value.map(|v| v.to_vec()).unwrap_or_default())
        })
        .collect()
}

fn is_all_brokers_down(error: &rdkafka::error::KafkaError) -> bool {
    error
        .rdkafka_error_code()
        .is_some_and(|code| code == rdkafka::types::RDKafkaErrorCode::AllBrokersDown)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn single_flight_cancels_prior_run() {
        let engine = ConsumerEngine::new("localhost:9092");
        let key = ("topic-a".to_string(), "group-a".to_string());

        let (_first_id, first_token) = engine.claim_run_slot(key.clone()).await;
        assert!(!first_token.is_cancelled());

        let (second_id, second_token) = engine.claim_run_slot(key.clone()).await;
        assert!(first_token.is_cancelled());
        assert!(!second_token.is_cancelled());

        engine.release_run_slot(&key, second_id).await;
        assert!(!engine.runs.lock().await.contains_key(&key));
    }

    #[tokio::test]
    async fn stale_release_does_not_evict_newer_run() {
        let engine = ConsumerEngine::new("localhost:9092");
        let key = ("topic-b".to_string(), "group-b".to_string());

        let (first_id, _first_token) = engine.claim_run_slot(key.clone()).await;
        let (_second_id, _second_token) = engine.claim_run_slot(key.clone()).await;

        engine.release_run_slot(&key, first_id).await;
        assert!(engine.runs.lock().await.contains_key(&key));
    }
}
