//! Observability for the storage facade
//!
//! - [`TransformMetrics`]: timings of a single encode/decode
//! - [`OperationWindow`]: bounded history of facade operations
//! - [`MetricsCollector`]: periodic snapshots, thresholds and trend checks

pub mod collector;
pub mod operation;
pub mod window;

pub use collector::{MemoryTrend, MetricsCollector, PerformanceMetrics, ThresholdBreach};
pub use operation::TransformMetrics;
pub use window::{OperationKind, OperationRecord, OperationWindow, WindowStats, DEFAULT_WINDOW_SIZE};
