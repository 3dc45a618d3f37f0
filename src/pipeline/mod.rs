// src/pipeline/mod.rs

pub mod event_bus;
pub mod frame_context;
pub mod incident_log;
pub mod invariants;
pub mod metrics;
pub mod orchestrator;
pub mod snapshot;
pub mod state;

pub use event_bus::{EventBus, PipelineEvent};
pub use frame_context::TickContext;
pub use incident_log::{IncidentList, IncidentLog, IncidentRecord, SnapshotRef};
pub use metrics::{MetricsSummary, PipelineMetrics};
pub use orchestrator::{
    PipelineCommand, PipelineHandle, PipelineOrchestrator, PipelineReport, TickReport,
};
pub use snapshot::{PublishedSnapshot, SnapshotPublisher};
pub use state::PipelineState;
