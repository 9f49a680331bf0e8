//! Wire format of queue records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    errors::{EngineError, EngineResult},
    types::ArbitrageOpportunity,
};

pub const QUEUE_RECORD_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueRecord {
    pub version: u32,
    pub opportunity: ArbitrageOpportunity,
    pub enqueued_at: DateTime<Utc>,
}

impl QueueRecord {
    pub fn new(opportunity: ArbitrageOpportunity) -> Self {
        Self {
            version: QUEUE_RECORD_VERSION,
            opportunity,
            enqueued_at: Utc::now(),
        }
    }
}

pub fn encode(record: &QueueRecord) -> EngineResult<String> {
    serde_json::to_string(record).map_err(|e| EngineError::parsing("encode queue record", e))
}

pub fn decode(text: &str) -> EngineResult<QueueRecord> {
    let record: QueueRecord =
        serde_json::from_str(text).map_err(|e| EngineError::parsing("decode queue record", e))?;
    if record.version != QUEUE_RECORD_VERSION {
        return Err(EngineError::parsing(
            "decode queue record",
            anyhow::anyhow!("unsupported record version {}", record.version),
        ));
    }
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::testing::opportunity;
    use rust_decimal_macros::dec;

    #[test]
    fn opportunity_survives_the_wire() {
        let record = QueueRecord::new(opportunity(dec!(12.5)));
        let decoded = decode(&encode(&record).unwrap()).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn rejects_unknown_versions_and_garbage() {
        let mut record = QueueRecord::new(opportunity(dec!(1)));
        record.version = 99;
        assert!(decode(&encode(&record).unwrap()).is_err());
        assert!(decode("{not json").is_err());
    }
}
