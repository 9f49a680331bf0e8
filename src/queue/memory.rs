//! Shared work queue

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tracing::debug;

use super::{QueueRecord, decode, encode};
use crate::errors::EngineResult;

/// Highest net profit first; records that expired while queued are dropped
/// on pop.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    async fn push(&self, record: QueueRecord) -> EngineResult<()>;
    async fn pop_at(&self, now: DateTime<Utc>) -> EngineResult<Option<QueueRecord>>;
    async fn len(&self) -> usize;

    async fn pop(&self) -> EngineResult<Option<QueueRecord>> {
        self.pop_at(Utc::now()).await
    }

    async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

struct Stored {
    net_profit_usd: Decimal,
    expires_at: DateTime<Utc>,
    seq: u64,
    payload: String,
}

/// In-process queue holding encoded records.
pub struct MemoryQueue {
    name: String,
    inner: Mutex<(Vec<Stored>, u64)>,
}

impl MemoryQueue {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new((Vec::new(), 0)),
        }
    }
}

#[async_trait]
impl WorkQueue for MemoryQueue {
    async fn push(&self, record: QueueRecord) -> EngineResult<()> {
        let payload = encode(&record)?;
        let mut guard = self.inner.lock().await;
        let (items, seq) = &mut *guard;
        *seq += 1;
        items.push(Stored {
            net_profit_usd: record.opportunity.net_profit_usd,
            expires_at: record.opportunity.expires_at,
            seq: *seq,
            payload,
        });
        Ok(())
    }

    async fn pop_at(&self, now: DateTime<Utc>) -> EngineResult<Option<QueueRecord>> {
        let mut guard = self.inner.lock().await;
        let (items, _) = &mut *guard;

        let before = items.len();
        items.retain(|s| now < s.expires_at);
        if items.len() < before {
            debug!("{}: dropped {} expired records", self.name, before - items.len());
        }

        // Ties go to the oldest record.
        let best = items
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.net_profit_usd.cmp(&b.net_profit_usd).then(b.seq.cmp(&a.seq)))
            .map(|(idx, _)| idx);
        match best {
            Some(idx) => {
                let stored = items.swap_remove(idx);
                decode(&stored.payload).map(Some)
            }
            None => Ok(None),
        }
    }

    async fn len(&self) -> usize {
        self.inner.lock().await.0.len()
    }
}
