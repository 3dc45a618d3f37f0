// src/control/mod.rs
//
// Signal control. One controller serves every lane group of the merged
// layout; all groups conflict with each other (single ring).

pub mod signal_controller;
pub mod timing;

pub use signal_controller::{
    ControllerEvent, ControllerSummary, LaneGroupConfig, Phase, RotationPolicy, SelectionReason,
    SignalConfig, SignalController, SignalState,
};
pub use timing::SignalTiming;
