//! `/errors/{name}/retry` and `/errors/retry`.

use crate::api::events::failure_response;
use crate::api::utils::{ResponseBody, json_error, json_response};
use crate::decision::RetryPolicy;
use crate::retry::{Redriver, RetryError, RetryOutcome};
use hyper::{Response, StatusCode};
use serde::Serialize;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RedeliveredBody<'a> {
    blob_name: &'a str,
    redelivered: bool,
    removed_rows: usize,
}

pub async fn retry_one(
    redriver: &Redriver,
    policy: &RetryPolicy,
    blob_name: &str,
) -> Response<ResponseBody> {
    tracing::info!(blob = blob_name, "Manual retry requested");
    match redriver.retry_one(blob_name).await {
        Ok(RetryOutcome::Redelivered { removed_rows }) => json_response(
            StatusCode::OK,
            &RedeliveredBody {
                blob_name,
                redelivered: true,
                removed_rows,
            },
        ),
        Ok(RetryOutcome::NotFound) => {
            json_error(StatusCode::NOT_FOUND, &format!("blob {blob_name} not found"))
        }
        Err(RetryError::Delivery(failure)) => {
            let mut response = failure_response(policy, &failure);
            // a manual retry is never rescheduled by the runtime
            response.headers_mut().remove(hyper::header::RETRY_AFTER);
            response
        }
        Err(e) => {
            tracing::error!(blob = blob_name, error = %e, "Manual retry failed");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string())
        }
    }
}

pub async fn retry_all(redriver: &Redriver) -> Response<ResponseBody> {
    match redriver.retry_all().await {
        Ok(summary) => json_response(StatusCode::OK, &summary),
        Err(e) => {
            tracing::error!(error = %e, "Could not list dead-letter rows");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string())
        }
    }
}
