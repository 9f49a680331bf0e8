//! File IPC between the orchestrator and worker processes
//!
//! Per worker, in the IPC directory:
//! - `<worker>.command.json`, written by the orchestrator, one [`WorkerCommand`].
//! - `<worker>.heartbeat.json`, written by the worker, one [`Heartbeat`].
//!
//! Both are replaced atomically (temp file then rename), so a reader never
//! sees a partial document. A command is pending until the worker's
//! heartbeat names its id in `last_command_id`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::path::{Path, PathBuf};

use crate::{
    errors::{EngineError, EngineResult},
    types::ArbitrageOpportunity,
};

const RESET_MARKER: &str = "breaker.reset";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CommandKind {
    Execute { opportunity: Box<ArbitrageOpportunity> },
    Stop,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerCommand {
    pub id: String,
    pub issued_at: DateTime<Utc>,
    pub kind: CommandKind,
}

impl WorkerCommand {
    pub fn new(kind: CommandKind) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            issued_at: Utc::now(),
            kind,
        }
    }

    pub fn execute(opportunity: ArbitrageOpportunity) -> Self {
        Self::new(CommandKind::Execute {
            opportunity: Box::new(opportunity),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub worker: String,
    pub pid: u32,
    pub timestamp: DateTime<Utc>,
    pub sequence: u64,
    pub total_executions: u64,
    pub successful_executions: u64,
    #[serde(default)]
    pub last_command_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct IpcDir {
    dir: PathBuf,
}

impl IpcDir {
    pub fn new(dir: &Path) -> EngineResult<Self> {
        std::fs::create_dir_all(dir).map_err(|e| EngineError::io(format!("create {}", dir.display()), e))?;
        Ok(Self { dir: dir.to_path_buf() })
    }

    pub fn command_path(&self, worker: &str) -> PathBuf {
        self.dir.join(format!("{}.command.json", worker))
    }

    pub fn heartbeat_path(&self, worker: &str) -> PathBuf {
        self.dir.join(format!("{}.heartbeat.json", worker))
    }

    /// The command the worker has not yet acknowledged, if any.
    pub fn pending_command(&self, worker: &str) -> EngineResult<Option<WorkerCommand>> {
        let Some(command) = self.read_command(worker)? else {
            return Ok(None);
        };
        let acked = self
            .read_heartbeat(worker)?
            .and_then(|hb| hb.last_command_id)
            .is_some_and(|id| id == command.id);
        Ok(if acked { None } else { Some(command) })
    }

    /// Write `command` unless an earlier one is still unacknowledged.
    /// Returns whether it was written.
    pub fn send_command(&self, worker: &str, command: &WorkerCommand) -> EngineResult<bool> {
        if self.pending_command(worker)?.is_some() {
            return Ok(false);
        }
        write_atomic(&self.command_path(worker), command)?;
        Ok(true)
    }

    pub fn read_command(&self, worker: &str) -> EngineResult<Option<WorkerCommand>> {
        read_json(&self.command_path(worker))
    }

    pub fn write_heartbeat(&self, heartbeat: &Heartbeat) -> EngineResult<()> {
        write_atomic(&self.heartbeat_path(&heartbeat.worker), heartbeat)
    }

    pub fn read_heartbeat(&self, worker: &str) -> EngineResult<Option<Heartbeat>> {
        read_json(&self.heartbeat_path(worker))
    }

    /// Drop the files a previous run of `worker` left behind.
    pub fn clear(&self, worker: &str) -> EngineResult<()> {
        for path in [self.command_path(worker), self.heartbeat_path(worker)] {
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(EngineError::io(format!("remove {}", path.display()), e)),
            }
        }
        Ok(())
    }

    pub fn request_breaker_reset(&self) -> EngineResult<PathBuf> {
        let path = self.dir.join(RESET_MARKER);
        std::fs::write(&path, Utc::now().to_rfc3339())
            .map_err(|e| EngineError::io(format!("write {}", path.display()), e))?;
        Ok(path)
    }

    /// Consume the reset marker. True if one was present.
    pub fn take_breaker_reset(&self) -> EngineResult<bool> {
        let path = self.dir.join(RESET_MARKER);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(EngineError::io(format!("remove {}", path.display()), e)),
        }
    }
}

fn write_atomic<T: Serialize>(path: &Path, value: &T) -> EngineResult<()> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| EngineError::parsing(format!("serialize {}", path.display()), e))?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, text).map_err(|e| EngineError::io(format!("write {}", tmp.display()), e))?;
    std::fs::rename(&tmp, path).map_err(|e| EngineError::io(format!("rename {}", tmp.display()), e))
}

fn read_json<T: DeserializeOwned>(path: &Path) -> EngineResult<Option<T>> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(EngineError::io(format!("read {}", path.display()), e)),
    };
    serde_json::from_str(&text)
        .map(Some)
        .map_err(|e| EngineError::parsing(format!("parse {}", path.display()), e))
}
