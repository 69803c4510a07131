use std::collections::HashMap;
use std::sync::Mutex as SyncMutex;

use async_std::sync::{Arc, RwLock};
use serde::{Deserialize, Serialize};

use crate::common::CancelToken;
use crate::mirror::{ItemState, MirrorReport};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Running,
    Finished,
    Failed,
}

/// Bookkeeping of one mirror job started through the API.
pub struct JobRecord {
    pub status: JobStatus,
    pub report: Option<MirrorReport>,
    pub error: Option<String>,
    /// Filled by the job's status sink while it runs.
    pub messages: Arc<SyncMutex<Vec<String>>>,
    pub cancel: CancelToken,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct JobView {
    pub id: String,
    pub status: JobStatus,
    pub saved: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<MirrorReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub messages: Vec<String>,
}

impl JobRecord {
    pub fn new() -> Self {
        Self {
            status: JobStatus::Running,
            report: None,
            error: None,
            messages: Arc::new(SyncMutex::new(Vec::new())),
            cancel: CancelToken::new(),
        }
    }

    pub fn saved(&self) -> usize {
        self.report.as_ref().map_or(0, |x| x.count(ItemState::Saved))
    }

    pub fn view(&self, id: &str) -> JobView {
        let messages = match self.messages.lock() {
            Ok(x) => x.clone(),
            Err(_) => Vec::new(),
        };
        JobView {
            id: id.to_owned(),
            status: self.status,
            saved: self.saved(),
            report: self.report.clone(),
            error: self.error.clone(),
            messages,
        }
    }
}

impl Default for JobRecord {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Default)]
pub struct State {
    pub jobs: Arc<RwLock<HashMap<String, JobRecord>>>,
}

impl State {
    pub fn new() -> Self {
        Self {
            jobs: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}
