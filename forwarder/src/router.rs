use crate::api::events::{BlobEventRequest, QueueEventRequest, handle_blob_event, handle_queue_event};
use crate::api::retry::{retry_all, retry_one};
use crate::api::utils::{ResponseBody, deserialize_body, json_error};
use crate::handler::DeliveryHandler;
use crate::metrics_defs::REQUEST_DURATION;
use crate::retry::Redriver;
use hyper::{Method, Request, Response, StatusCode};
use percent_encoding::percent_decode_str;
use shared::histogram;
use shared::http::make_error_response;
use std::sync::Arc;
use std::time::Instant;

/// Endpoints served on the main listener
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Endpoint {
    /// `POST /events/blob`
    BlobEvent,
    /// `POST /events/queue`
    QueueEvent,
    /// `GET|POST /errors/{name}/retry`
    RetryOne(String),
    /// `GET /errors/retry`
    RetryAll,
}

impl Endpoint {
    fn name(&self) -> &'static str {
        match self {
            Endpoint::BlobEvent => "events_blob",
            Endpoint::QueueEvent => "events_queue",
            Endpoint::RetryOne(_) => "errors_retry_one",
            Endpoint::RetryAll => "errors_retry_all",
        }
    }

    fn allows(&self, method: &Method) -> bool {
        match self {
            Endpoint::BlobEvent | Endpoint::QueueEvent => method == Method::POST,
            Endpoint::RetryOne(_) => method == Method::GET || method == Method::POST,
            Endpoint::RetryAll => method == Method::GET,
        }
    }

    /// Matches a request path. Blob names are percent-decoded and may
    /// contain `/`.
    pub fn from_path(path: &str) -> Option<Endpoint> {
        let path = match path.trim_end_matches('/') {
            "" => "/",
            trimmed => trimmed,
        };

        match path {
            "/events/blob" => return Some(Endpoint::BlobEvent),
            "/events/queue" => return Some(Endpoint::QueueEvent),
            "/errors/retry" => return Some(Endpoint::RetryAll),
            _ => {}
        }

        let raw_name = path.strip_prefix("/errors/")?.strip_suffix("/retry")?;
        if raw_name.is_empty() {
            return None;
        }
        let name = percent_decode_str(raw_name).decode_utf8_lossy().into_owned();
        Some(Endpoint::RetryOne(name))
    }
}

/// Dispatches requests on the main listener to the trigger and retry endpoints
#[derive(Clone)]
pub struct Router {
    handler: Arc<DeliveryHandler>,
    redriver: Arc<Redriver>,
}

impl Router {
    pub fn new(handler: Arc<DeliveryHandler>, redriver: Arc<Redriver>) -> Self {
        Self { handler, redriver }
    }

    pub async fn route<B>(&self, req: Request<B>) -> Response<ResponseBody>
    where
        B: hyper::body::Body,
        B::Error: std::fmt::Display,
    {
        let start = Instant::now();

        let Some(endpoint) = Endpoint::from_path(req.uri().path()) else {
            tracing::debug!(method = %req.method(), path = %req.uri().path(), "No route matched");
            return make_error_response(StatusCode::NOT_FOUND);
        };
        if !endpoint.allows(req.method()) {
            return make_error_response(StatusCode::METHOD_NOT_ALLOWED);
        }

        let response = self.dispatch(&endpoint, req).await;

        histogram!(
            REQUEST_DURATION,
            "route" => endpoint.name(),
            "status" => response.status().as_str().to_string()
        )
        .record(start.elapsed().as_secs_f64());
        response
    }

    async fn dispatch<B>(&self, endpoint: &Endpoint, req: Request<B>) -> Response<ResponseBody>
    where
        B: hyper::body::Body,
        B::Error: std::fmt::Display,
    {
        match endpoint {
            Endpoint::BlobEvent => match deserialize_body::<BlobEventRequest, _>(req.into_body()).await {
                Ok(request) => handle_blob_event(&self.handler, request).await,
                Err(e) => json_error(StatusCode::BAD_REQUEST, &e.to_string()),
            },
            Endpoint::QueueEvent => match deserialize_body::<QueueEventRequest, _>(req.into_body()).await {
                Ok(request) => handle_queue_event(&self.handler, request).await,
                Err(e) => json_error(StatusCode::BAD_REQUEST, &e.to_string()),
            },
            Endpoint::RetryOne(name) => retry_one(&self.redriver, self.handler.policy(), name).await,
            Endpoint::RetryAll => retry_all(&self.redriver).await,
        }
    }
}
