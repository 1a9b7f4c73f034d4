//! Metrics definitions for the storage backends.

use shared::metrics_defs::{MetricDef, MetricType};

pub const STORAGE_REQUEST_DURATION: MetricDef = MetricDef {
    name: "storage.request.duration",
    metric_type: MetricType::Histogram,
    description: "Time spent on a storage service request in seconds, tagged by service and operation",
};

pub const STORAGE_REQUEST_ERRORS: MetricDef = MetricDef {
    name: "storage.request.errors",
    metric_type: MetricType::Counter,
    description: "Number of storage service requests that failed, tagged by service and operation",
};

pub const ALL_METRICS: &[MetricDef] = &[STORAGE_REQUEST_DURATION, STORAGE_REQUEST_ERRORS];
