// src/pipeline/incident_log.rs
//
// Append-only incident log. Alerts are staged during a tick and published
// on flush as a fresh `Arc<Vec<IncidentRecord>>`, so readers holding an
// older Arc keep a consistent view.

use crate::analysis::anomaly::{Alert, AlertKind, Severity};
use crate::analysis::lane_assigner::LaneId;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;
use uuid::Uuid;

/// Points an incident at the snapshot published on the tick that raised it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRef {
    pub sequence: u64,
    /// Base64 of the encoded frame, when one was supplied for that tick
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame: Option<String>,
}

impl SnapshotRef {
    pub fn new(sequence: u64, frame: Option<&[u8]>) -> Self {
        Self {
            sequence,
            frame: frame.map(|bytes| BASE64.encode(bytes)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentRecord {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: AlertKind,
    pub severity: Severity,
    /// Stream time, seconds
    pub timestamp: f64,
    pub description: String,
    pub lane: Option<LaneId>,
    pub snapshot: Option<SnapshotRef>,
    pub recorded_at: DateTime<Utc>,
}

impl IncidentRecord {
    pub fn from_alert(alert: &Alert, snapshot: Option<SnapshotRef>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: alert.kind,
            severity: alert.severity,
            timestamp: alert.timestamp,
            description: alert.message.clone(),
            lane: alert.lane.clone(),
            snapshot,
            recorded_at: Utc::now(),
        }
    }
}

pub type IncidentList = Arc<Vec<IncidentRecord>>;

pub struct IncidentLog {
    records: IncidentList,
    pending: Vec<IncidentRecord>,
    tx: watch::Sender<IncidentList>,
}

impl Default for IncidentLog {
    fn default() -> Self {
        Self::new()
    }
}

impl IncidentLog {
    pub fn new() -> Self {
        let records: IncidentList = Arc::new(Vec::new());
        let (tx, _rx) = watch::channel(Arc::clone(&records));
        Self {
            records,
            pending: Vec::new(),
            tx,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<IncidentList> {
        self.tx.subscribe()
    }

    /// Stage a record; it becomes visible on the next `flush`.
    pub fn append(&mut self, record: IncidentRecord) {
        self.pending.push(record);
    }

    /// Publish staged records. Returns how many were added.
    pub fn flush(&mut self) -> usize {
        if self.pending.is_empty() {
            return 0;
        }
        let added = self.pending.len();
        Arc::make_mut(&mut self.records).append(&mut self.pending);
        self.tx.send_replace(Arc::clone(&self.records));
        debug!("📝 Incident log: +{} ({} total)", added, self.records.len());
        added
    }

    pub fn records(&self) -> IncidentList {
        Arc::clone(&self.records)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn count_at_least(&self, severity: Severity) -> usize {
        self.records
            .iter()
            .filter(|r| r.severity >= severity)
            .count()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self.records.as_ref())
    }
}
