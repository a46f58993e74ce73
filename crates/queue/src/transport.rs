//! Broker transport capability.
//!
//! `StreamTransport` is the narrow seam the broker talks through: publish,
//! declare-topology, blocking group read, ack, close. Production uses
//! `RedisTransport` over Redis streams; tests substitute `MemoryTransport`.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::{AsyncCommands, Client};

use crate::broker::QueueError;

/// Attempts made to establish the initial broker connection.
const CONNECT_MAX_ATTEMPTS: u32 = 5;

/// Fixed delay between connection attempts.
const CONNECT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Entries fetched per group read.
const READ_BATCH: usize = 16;

/// Field under which the serialized job travels in a stream entry.
pub(crate) const PAYLOAD_FIELD: &str = "payload";

/// One entry read from a stream: the broker-assigned id plus the raw payload.
#[derive(Debug, Clone)]
pub struct StreamEntry {
    pub id: String,
    pub payload: Vec<u8>,
}

/// Narrow capability interface over the broker transport.
#[async_trait]
pub trait StreamTransport: Send + Sync {
    /// Append an entry to a stream, returning the broker-assigned id.
    async fn publish(&self, stream: &str, fields: &[(String, Vec<u8>)])
    -> Result<String, QueueError>;

    /// Idempotently declare a consumer group on a stream, creating the
    /// stream if it does not exist yet.
    async fn ensure_group(&self, stream: &str, group: &str) -> Result<(), QueueError>;

    /// Read the next batch of entries for a consumer. With `pending` set,
    /// returns entries delivered to this consumer but never acknowledged
    /// (crash recovery); otherwise blocks up to `block` for new entries.
    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        block: Duration,
        pending: bool,
    ) -> Result<Vec<StreamEntry>, QueueError>;

    /// Acknowledge an entry and remove it from the stream.
    async fn ack(&self, stream: &str, group: &str, id: &str) -> Result<(), QueueError>;

    /// Release the underlying connection.
    async fn close(&self) -> Result<(), QueueError>;
}

/// Redis streams transport.
#[derive(Clone)]
pub struct RedisTransport {
    manager: ConnectionManager,
}

impl RedisTransport {
    /// Connect to Redis with a bounded retry budget. Startup concern only:
    /// once established, the `ConnectionManager` re-dials dropped
    /// connections on its own.
    pub async fn connect(redis_url: &str) -> Result<Self, QueueError> {
        let client = Client::open(redis_url)?;

        let mut attempt = 1;
        loop {
            match ConnectionManager::new(client.clone()).await {
                Ok(manager) => {
                    tracing::info!("Connected to Redis");
                    return Ok(Self { manager });
                }
                Err(e) if attempt >= CONNECT_MAX_ATTEMPTS => {
                    tracing::error!(
                        attempts = CONNECT_MAX_ATTEMPTS,
                        error = %e,
                        "Giving up on Redis connection"
                    );
                    return Err(QueueError::Transport(e));
                }
                Err(e) => {
                    tracing::warn!(
                        attempt,
                        max_attempts = CONNECT_MAX_ATTEMPTS,
                        error = %e,
                        "Failed to connect to Redis, retrying..."
                    );
                    attempt += 1;
                    tokio::time::sleep(CONNECT_RETRY_DELAY).await;
                }
            }
        }
    }
}

#[async_trait]
impl StreamTransport for RedisTransport {
    async fn publish(
        &self,
        stream: &str,
        fields: &[(String, Vec<u8>)],
    ) -> Result<String, QueueError> {
        let mut conn = self.manager.clone();
        let id: String = conn.xadd(stream, "*", fields).await?;
        Ok(id)
    }

    async fn ensure_group(&self, stream: &str, group: &str) -> Result<(), QueueError> {
        let mut conn = self.manager.clone();
        // Start the group at 0 so entries enqueued before the first consumer
        // came up are still delivered.
        let created: Result<(), redis::RedisError> =
            conn.xgroup_create_mkstream(stream, group, "0").await;
        match created {
            Ok(()) => Ok(()),
            // BUSYGROUP: group already declared, which is the idempotent case.
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(QueueError::Transport(e)),
        }
    }

    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        block: Duration,
        pending: bool,
    ) -> Result<Vec<StreamEntry>, QueueError> {
        let mut conn = self.manager.clone();

        let opts = StreamReadOptions::default()
            .group(group, consumer)
            .count(READ_BATCH)
            .block(block.as_millis() as usize);

        // ">" asks for never-delivered entries; "0" replays this consumer's
        // unacknowledged backlog.
        let cursor = if pending { "0" } else { ">" };
        let reply: StreamReadReply = conn.xread_options(&[stream], &[cursor], &opts).await?;

        let mut entries = Vec::new();
        for key in reply.keys {
            for item in key.ids {
                let payload = item.get::<Vec<u8>>(PAYLOAD_FIELD).unwrap_or_default();
                entries.push(StreamEntry {
                    id: item.id,
                    payload,
                });
            }
        }
        Ok(entries)
    }

    async fn ack(&self, stream: &str, group: &str, id: &str) -> Result<(), QueueError> {
        let mut conn = self.manager.clone();
        let _: i64 = conn.xack(stream, group, &[id]).await?;
        let _: i64 = conn.xdel(stream, &[id]).await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), QueueError> {
        // The connection manager tears down its connection on drop; there is
        // no explicit close handshake to report errors from.
        tracing::debug!("Redis transport released");
        Ok(())
    }
}

/// In-memory transport used by tests.
///
/// Entries are delivered FIFO in one batch per read. A drained stream reads
/// as a closed subscription, so `consume` returns after processing
/// everything seeded into it.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    state: Arc<Mutex<MemoryState>>,
}

#[derive(Default)]
struct MemoryState {
    undelivered: HashMap<String, VecDeque<StreamEntry>>,
    unacked: HashMap<String, Vec<StreamEntry>>,
    acked: HashMap<String, Vec<String>>,
    groups: Vec<(String, String)>,
    closed: bool,
    next_id: u64,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Entries currently retained in a stream (delivered or not).
    pub fn entries(&self, stream: &str) -> Vec<StreamEntry> {
        let state = self.lock();
        let mut all: Vec<StreamEntry> = state
            .unacked
            .get(stream)
            .map(|v| v.to_vec())
            .unwrap_or_default();
        if let Some(queue) = state.undelivered.get(stream) {
            all.extend(queue.iter().cloned());
        }
        all
    }

    /// Ids acknowledged on a stream, in order.
    pub fn acked(&self, stream: &str) -> Vec<String> {
        self.lock().acked.get(stream).cloned().unwrap_or_default()
    }

    /// Consumer groups declared so far.
    pub fn groups(&self) -> Vec<(String, String)> {
        self.lock().groups.clone()
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

#[async_trait]
impl StreamTransport for MemoryTransport {
    async fn publish(
        &self,
        stream: &str,
        fields: &[(String, Vec<u8>)],
    ) -> Result<String, QueueError> {
        let mut state = self.lock();
        let payload = fields
            .iter()
            .find(|(k, _)| k == PAYLOAD_FIELD)
            .map(|(_, v)| v.clone())
            .unwrap_or_default();
        let id = format!("{}-0", state.next_id);
        state.next_id += 1;
        state
            .undelivered
            .entry(stream.to_string())
            .or_default()
            .push_back(StreamEntry {
                id: id.clone(),
                payload,
            });
        Ok(id)
    }

    async fn ensure_group(&self, stream: &str, group: &str) -> Result<(), QueueError> {
        let mut state = self.lock();
        let key = (stream.to_string(), group.to_string());
        if !state.groups.contains(&key) {
            state.groups.push(key);
        }
        Ok(())
    }

    async fn read_group(
        &self,
        stream: &str,
        _group: &str,
        _consumer: &str,
        _block: Duration,
        pending: bool,
    ) -> Result<Vec<StreamEntry>, QueueError> {
        if pending {
            return Ok(Vec::new());
        }
        let mut state = self.lock();
        let batch: Vec<StreamEntry> = match state.undelivered.get_mut(stream) {
            Some(queue) if !queue.is_empty() => queue.drain(..).collect(),
            _ => {
                return Err(QueueError::Transport(redis::RedisError::from((
                    redis::ErrorKind::IoError,
                    "stream closed",
                ))));
            }
        };
        state
            .unacked
            .entry(stream.to_string())
            .or_default()
            .extend(batch.iter().cloned());
        Ok(batch)
    }

    async fn ack(&self, stream: &str, _group: &str, id: &str) -> Result<(), QueueError> {
        let mut state = self.lock();
        if let Some(unacked) = state.unacked.get_mut(stream) {
            unacked.retain(|e| e.id != id);
        }
        state
            .acked
            .entry(stream.to_string())
            .or_default()
            .push(id.to_string());
        Ok(())
    }

    async fn close(&self) -> Result<(), QueueError> {
        self.lock().closed = true;
        Ok(())
    }
}
