use crate::alert::{Alert, AlertDetails, AlertSink};
use crate::client::Downstream;
use crate::codec::{self, PayloadForm};
use crate::dead_letter::{DeadLetterRecorder, Failure, RecordOutcome};
use crate::decision::{FailureDecision, RetryPolicy};
use crate::errors::{DeliveryError, format_error_chain};
use crate::event::DeliveryEvent;
use crate::metrics_defs::{
    ALERTS_RAISED, DELIVERIES_FAILED, DELIVERIES_SUCCEEDED, EVENTS_SKIPPED,
};
use shared::counter;
use std::sync::Arc;
use thiserror::Error;

/// How a handled event ended when nothing went wrong.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
    /// Not flagged for forwarding. Not an error.
    Skipped,
    Delivered,
}

impl Delivery {
    pub fn processed(&self) -> bool {
        matches!(self, Delivery::Delivered)
    }
}

/// The downstream call failed. Returned on every failed attempt, including
/// the last one, so the runtime's own failure accounting stays accurate.
#[derive(Error, Debug)]
#[error("{error}")]
pub struct DeliveryFailure {
    pub error: DeliveryError,
    pub decision: FailureDecision,
    pub retry_index: Option<u32>,
}

impl DeliveryFailure {
    pub fn is_terminal(&self) -> bool {
        self.decision.should_record()
    }
}

pub struct DeliveryHandler {
    downstream: Arc<dyn Downstream>,
    recorder: DeadLetterRecorder,
    alerts: Arc<dyn AlertSink>,
    policy: RetryPolicy,
    api_key: String,
    payload_form: PayloadForm,
    container: String,
}

impl DeliveryHandler {
    pub fn new(
        downstream: Arc<dyn Downstream>,
        recorder: DeadLetterRecorder,
        alerts: Arc<dyn AlertSink>,
        policy: RetryPolicy,
        api_key: String,
        payload_form: PayloadForm,
        container: String,
    ) -> Self {
        DeliveryHandler {
            downstream,
            recorder,
            alerts,
            policy,
            api_key,
            payload_form,
            container,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub async fn handle(&self, event: &DeliveryEvent) -> Result<Delivery, DeliveryFailure> {
        tracing::info!(
            blob = %event.source_name,
            retry_index = ?event.retry_index,
            metadata = ?event.metadata,
            "Triggered"
        );

        if !event.should_forward() {
            tracing::info!(blob = %event.source_name, "Skipped, flow is not flagged for conversion");
            counter!(EVENTS_SKIPPED).increment(1);
            return Ok(Delivery::Skipped);
        }

        match self.attempt(event).await {
            Ok(()) => {
                tracing::info!(blob = %event.source_name, "Successful conversion call to FdR1");
                counter!(DELIVERIES_SUCCEEDED).increment(1);
                Ok(Delivery::Delivered)
            }
            Err(error) => {
                let decision = self.policy.decide(event.retry_index, &error);
                tracing::error!(
                    blob = %event.source_name,
                    retry_index = ?event.retry_index,
                    error_type = %decision.kind,
                    terminal = decision.should_record(),
                    error = %format_error_chain(&error),
                    "Conversion call to FdR1 failed"
                );
                let terminal = if decision.should_record() { "true" } else { "false" };
                counter!(DELIVERIES_FAILED, "error_type" => decision.kind.as_str(), "terminal" => terminal)
                    .increment(1);

                if decision.should_record() {
                    self.on_last_retry(event, &error, decision).await;
                }

                Err(DeliveryFailure {
                    error,
                    decision,
                    retry_index: event.retry_index,
                })
            }
        }
    }

    async fn attempt(&self, event: &DeliveryEvent) -> Result<(), DeliveryError> {
        let payload = codec::encode(self.payload_form, &event.payload)?;
        self.downstream.send(&self.api_key, payload).await
    }

    async fn on_last_retry(
        &self,
        event: &DeliveryEvent,
        error: &DeliveryError,
        decision: FailureDecision,
    ) {
        tracing::warn!(
            blob = %event.source_name,
            retry_index = ?event.retry_index,
            "[ALERT][FdR3-to-FdR1][LAST_RETRY][DEAD-LETTER] Performed last retry for event ingestion"
        );

        let message = error.to_string();
        let stack_trace = format_error_chain(error);
        let failure = Failure {
            kind: decision.kind,
            message: &message,
            http_response_body: error.response_body(),
            stack_trace: &stack_trace,
        };

        match self.recorder.record(event, &failure).await {
            RecordOutcome::Written {
                partition_key,
                row_key,
            } => {
                tracing::info!(
                    blob = %event.source_name,
                    partition_key = %partition_key,
                    row_key = %row_key,
                    "Dead-letter row written"
                );
            }
            RecordOutcome::WriteFailed {
                partition_key,
                row_key,
                error,
            } => {
                tracing::warn!(
                    blob = %event.source_name,
                    partition_key = %partition_key,
                    row_key = %row_key,
                    error = %error,
                    "Dead-letter write failed"
                );
            }
        }

        let alert = Alert::last_retry(
            message,
            AlertDetails {
                blob_name: event.source_name.clone(),
                blob_container: self.container.clone(),
                blob_session_id: event.session_id().map(String::from),
                retry_index: event.retry_index,
            },
        );
        self.alerts.raise(&alert);
        counter!(ALERTS_RAISED).increment(1);
    }
}
