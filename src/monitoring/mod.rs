//! Monitoring Collector (C9): system/task metrics sampling, dependency
//! health probes, and the alert threshold engine.

pub mod alerts;
pub mod collector;

pub use alerts::AlertStore;
pub use collector::MonitoringCollector;
