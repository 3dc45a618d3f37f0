// src/lib.rs

pub mod analysis;
pub mod config;
pub mod control;
pub mod error;
pub mod pipeline;
pub mod types;

pub use error::{PipelineError, Result};
pub use pipeline::{PipelineHandle, PipelineOrchestrator};
pub use types::{Config, Detection, FrameInput, ObjectClass};
