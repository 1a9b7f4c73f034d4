pub mod alert;
pub mod api;
pub mod client;
pub mod codec;
pub mod config;
pub mod dead_letter;
pub mod decision;
pub mod errors;
pub mod event;
pub mod handler;
pub mod metrics_defs;
pub mod retry;
pub mod router;

#[cfg(test)]
mod testutils;

use crate::alert::{AlertSink, TracingAlertSink};
use crate::api::utils::ResponseBody;
use crate::client::{ConversionClient, Downstream};
use crate::config::Config;
use crate::dead_letter::DeadLetterRecorder;
use crate::decision::RetryPolicy;
use crate::errors::ForwarderError;
use crate::handler::DeliveryHandler;
use crate::retry::Redriver;
use crate::router::Router;
use hyper::body::Incoming;
use hyper::service::Service;
use hyper::{Request, Response};
use shared::admin_service::AdminService;
use shared::http::run_http_service;
use std::pin::Pin;
use std::sync::Arc;
use storage::{BlobStore, TableStore};

/// Runs the forwarder on the main listener and the probes on the admin
/// listener until either of them fails.
pub async fn run(config: Config) -> Result<(), ForwarderError> {
    let deps = Dependencies::from_config(&config).await?;
    let service = ForwarderService::new(build_router(&config, deps));

    let main_task = run_http_service(&config.listener.host, config.listener.port, service);
    let admin_task = run_http_service(
        &config.admin_listener.host,
        config.admin_listener.port,
        AdminService::<_, ForwarderError>::new(|| true),
    );

    tokio::try_join!(main_task, admin_task)?;
    Ok(())
}

/// Outbound collaborators of the forwarder.
pub struct Dependencies {
    pub downstream: Arc<dyn Downstream>,
    pub blobs: Arc<dyn BlobStore>,
    pub dead_letter: Arc<dyn TableStore>,
    pub alerts: Arc<dyn AlertSink>,
}

impl Dependencies {
    pub async fn from_config(config: &Config) -> Result<Self, ForwarderError> {
        let downstream = ConversionClient::new(&config.downstream)?;
        tracing::info!(url = %downstream.url(), "Conversion API client ready");

        let blobs = storage::get_blob_store(&config.blob_store)?;
        let dead_letter = storage::get_table_store(&config.dead_letter).await?;

        Ok(Dependencies {
            downstream: Arc::new(downstream),
            blobs,
            dead_letter,
            alerts: Arc::new(TracingAlertSink),
        })
    }
}

/// Wires the delivery handler and the redriver behind one router.
pub fn build_router(config: &Config, deps: Dependencies) -> Router {
    let handler = Arc::new(DeliveryHandler::new(
        deps.downstream,
        DeadLetterRecorder::new(deps.dead_letter.clone()),
        deps.alerts,
        RetryPolicy::new(&config.retry),
        config.downstream.api_key.clone(),
        config.downstream.payload_form,
        config.blob_store.container.clone(),
    ));
    let redriver = Arc::new(Redriver::new(
        deps.blobs,
        handler.clone(),
        DeadLetterRecorder::new(deps.dead_letter),
        config.retry.manual_retry,
    ));
    Router::new(handler, redriver)
}

struct ForwarderService {
    router: Router,
}

impl ForwarderService {
    fn new(router: Router) -> Self {
        Self { router }
    }
}

impl Service<Request<Incoming>> for ForwarderService {
    type Response = Response<ResponseBody>;
    type Error = ForwarderError;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let router = self.router.clone();
        Box::pin(async move { Ok(router.route(req).await) })
    }
}
