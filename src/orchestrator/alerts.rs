//! Operator alerts

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// Fire-and-forget alert delivery. Implementations must not block the caller
/// on a slow channel and never report failure back.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn send_alert(&self, severity: Severity, message: &str, context: serde_json::Value);
}

/// Writes alerts to the log. Webhook or chat delivery lives outside the engine.
pub struct TracingAlertSink;

#[async_trait]
impl AlertSink for TracingAlertSink {
    async fn send_alert(&self, severity: Severity, message: &str, context: serde_json::Value) {
        match severity {
            Severity::Info => info!(%context, "📣 {}", message),
            Severity::Warning => warn!(%context, "📣 {}", message),
            Severity::Critical => error!(%context, "🚨 {}", message),
        }
    }
}
