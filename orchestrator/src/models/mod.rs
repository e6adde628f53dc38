//! Data models for devices, capabilities, intents, tasks and reports

pub mod capability;
pub mod device;
pub mod intent;
pub mod report;
pub mod task;
