//! Audio quality metrics, classification, and the periodic monitor.

pub mod metrics;
pub mod monitor;

pub use metrics::{
    QualityMetrics, QualityStatus, QualityThresholds, QualityTrend, classify, failure_reason,
    trend,
};
pub use monitor::{Clock, QualityMonitor, QualityTick, SystemClock, calculate_rms};
