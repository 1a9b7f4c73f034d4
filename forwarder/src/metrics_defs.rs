use shared::metrics_defs::{MetricDef, MetricType};

pub const REQUEST_DURATION: MetricDef = MetricDef {
    name: "request.duration",
    metric_type: MetricType::Histogram,
    description: "Request duration in seconds. Tagged with status, route.",
};

pub const EVENTS_RECEIVED: MetricDef = MetricDef {
    name: "events.received",
    metric_type: MetricType::Counter,
    description: "Delivery events received. Tagged with trigger.",
};

pub const EVENTS_SKIPPED: MetricDef = MetricDef {
    name: "events.skipped",
    metric_type: MetricType::Counter,
    description: "Delivery events not flagged for forwarding",
};

pub const DELIVERIES_SUCCEEDED: MetricDef = MetricDef {
    name: "deliveries.succeeded",
    metric_type: MetricType::Counter,
    description: "Flows accepted by the conversion API",
};

pub const DELIVERIES_FAILED: MetricDef = MetricDef {
    name: "deliveries.failed",
    metric_type: MetricType::Counter,
    description: "Failed delivery attempts. Tagged with error_type, terminal.",
};

pub const DOWNSTREAM_REQUEST_DURATION: MetricDef = MetricDef {
    name: "downstream.request.duration",
    metric_type: MetricType::Histogram,
    description: "Duration of conversion API calls in seconds",
};

pub const DEAD_LETTER_WRITES: MetricDef = MetricDef {
    name: "dead_letter.writes",
    metric_type: MetricType::Counter,
    description: "Rows written to the dead-letter table",
};

pub const DEAD_LETTER_WRITE_FAILURES: MetricDef = MetricDef {
    name: "dead_letter.write_failures",
    metric_type: MetricType::Counter,
    description: "Dead-letter rows that could not be written",
};

pub const ALERTS_RAISED: MetricDef = MetricDef {
    name: "alerts.raised",
    metric_type: MetricType::Counter,
    description: "Last-retry alerts raised",
};

pub const RETRY_REQUESTS: MetricDef = MetricDef {
    name: "retry.requests",
    metric_type: MetricType::Counter,
    description: "Manual redeliveries. Tagged with scope, outcome.",
};

pub const ALL_METRICS: &[MetricDef] = &[
    REQUEST_DURATION,
    EVENTS_RECEIVED,
    EVENTS_SKIPPED,
    DELIVERIES_SUCCEEDED,
    DELIVERIES_FAILED,
    DOWNSTREAM_REQUEST_DURATION,
    DEAD_LETTER_WRITES,
    DEAD_LETTER_WRITE_FAILURES,
    ALERTS_RAISED,
    RETRY_REQUESTS,
];
