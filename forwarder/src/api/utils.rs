use crate::errors::ForwarderError;
use http_body_util::BodyExt;
use http_body_util::combinators::BoxBody;
use hyper::body::Bytes;
use hyper::header::CONTENT_TYPE;
use hyper::{Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use shared::http::{full_body, make_error_response};

pub type ResponseBody = BoxBody<Bytes, ForwarderError>;

#[derive(thiserror::Error, Debug)]
pub enum BodyError {
    #[error("could not read request body: {0}")]
    Read(String),

    #[error("invalid JSON body: {0}")]
    Json(#[from] serde_json::Error),
}

/// Collects a request body and deserializes it as JSON.
pub async fn deserialize_body<T, B>(body: B) -> Result<T, BodyError>
where
    T: DeserializeOwned,
    B: hyper::body::Body,
    B::Error: std::fmt::Display,
{
    let bytes = body
        .collect()
        .await
        .map_err(|e| BodyError::Read(e.to_string()))?
        .to_bytes();
    Ok(serde_json::from_slice(&bytes)?)
}

/// JSON response with the given status.
pub fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Response<ResponseBody> {
    match serde_json::to_vec(value) {
        Ok(bytes) => {
            let mut response = Response::new(full_body(bytes));
            *response.status_mut() = status;
            response
                .headers_mut()
                .insert(CONTENT_TYPE, hyper::header::HeaderValue::from_static("application/json"));
            response
        }
        Err(e) => {
            tracing::error!(error = %e, "could not serialize response");
            make_error_response(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
}

pub fn json_error(status: StatusCode, message: &str) -> Response<ResponseBody> {
    json_response(status, &ErrorBody { error: message })
}

#[cfg(test)]
pub async fn body_json(response: Response<ResponseBody>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
