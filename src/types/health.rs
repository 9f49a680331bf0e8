//! Health monitoring types

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct SystemHealth {
    pub rpc_reachable: bool,
    pub contract_ok: bool,
    pub price_feed_reachable: bool,
    pub block_number: Option<u64>,
    pub checked_at: DateTime<Utc>,
    pub problems: Vec<String>,
}

impl SystemHealth {
    pub fn is_healthy(&self) -> bool {
        self.rpc_reachable && self.contract_ok && self.price_feed_reachable
    }
}
