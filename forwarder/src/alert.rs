use serde::Serialize;

pub const ALERT_TYPE: &str = "FDR3_CONVERSION_ALERT";

/// Correlation data attached to a last-retry alert.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertDetails {
    pub blob_name: String,
    pub blob_container: String,
    pub blob_session_id: Option<String>,
    pub retry_index: Option<u32>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Alert {
    pub alert_type: &'static str,
    pub title: String,
    pub cause: String,
    pub details: AlertDetails,
}

impl Alert {
    pub fn last_retry(cause: String, details: AlertDetails) -> Self {
        Alert {
            alert_type: ALERT_TYPE,
            title: format!("Last retry failed for blob {}", details.blob_name),
            cause,
            details,
        }
    }

    pub fn details_json(&self) -> String {
        serde_json::to_string(&self.details).unwrap_or_default()
    }
}

/// Where last-retry alerts go.
pub trait AlertSink: Send + Sync {
    fn raise(&self, alert: &Alert);
}

/// Emits alerts as error-level events. The Sentry tracing layer turns
/// these into Sentry events when a DSN is configured.
pub struct TracingAlertSink;

impl AlertSink for TracingAlertSink {
    fn raise(&self, alert: &Alert) {
        tracing::error!(
            alert_type = alert.alert_type,
            details = %alert.details_json(),
            cause = %alert.cause,
            "[ALERT][FdR3-to-FdR1][LAST_RETRY] {}",
            alert.title
        );
    }
}
