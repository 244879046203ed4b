//! # Item API & Healthcheck
//!
//! This crate provides the http api in front of the [`ResourceStore`] along
//! with healthcheck and metrics endpoints.
//! It exposes the following endpoints:
//!
//! /
//! /health
//! /ping
//! /metrics
//! /metrics-text
//! /items            GET (list), POST (create)
//! /items/:id        GET, PUT (partial update), DELETE
//!
//! The item routes are also served under `/api/v1`.
//!
//! [`ResourceStore`]: resource_store::ResourceStore
#![warn(
    missing_debug_implementations,
    missing_docs,
    rust_2018_idioms,
    unreachable_pub,
    non_snake_case,
    non_upper_case_globals
)]
#![deny(rustdoc::broken_intra_doc_links)]
#![allow(clippy::cognitive_complexity, clippy::too_many_arguments)]

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Result;
use axum::{Router, extract::Extension, routing};
use resource_store::ResourceStore;
use store_core::config::cli::DEFAULT_REQUEST_TIMEOUT;
use tokio::{net::TcpListener, sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::CorsLayer,
    timeout::TimeoutLayer,
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{Level, error, info, info_span, trace};
use tracing_futures::Instrument;

pub use crate::models::{Health, ServiceInfo, State};

/// The task runner for the [`ExternalApi`]
///
/// [`ExternalApi`]: crate::ExternalApi
#[derive(Debug)]
pub struct ExternalApiGuard {
    task_handle: JoinHandle<()>,
}

impl Drop for ExternalApiGuard {
    fn drop(&mut self) {
        trace!("ExternalApiGuard drop called");
        self.task_handle.abort();
    }
}

/// Listens for health changes and serves the item store over HTTP
#[derive(Debug)]
pub struct ExternalApi {
    tx: mpsc::Sender<Health>,
    rx: mpsc::Receiver<Health>,
    addr: SocketAddr,
    state: State,
    store: ResourceStore,
    info: Arc<ServiceInfo>,
    request_timeout: Duration,
}

impl ExternalApi {
    /// Create a new ExternalApi instance. Health starts out `Bad` until a
    /// `Good` is sent over [`sender`].
    ///
    /// [`sender`]: crate::ExternalApi::sender
    pub fn new(addr: SocketAddr, store: ResourceStore, info: ServiceInfo) -> Self {
        trace!("starting external api");
        let (tx, rx) = mpsc::channel(10);
        let state = models::blank_health();
        Self {
            tx,
            rx,
            addr,
            state,
            store,
            info: Arc::new(info),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT),
        }
    }

    /// set the per request timeout
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// clone the health sender channel
    pub fn sender(&self) -> mpsc::Sender<Health> {
        self.tx.clone()
    }

    /// Set the health
    pub fn set_health(&self, health: Health) {
        *self.state.lock() = health;
    }

    /// Listen to Health changes over the channel
    async fn listen_status(&mut self, token: CancellationToken) -> Result<()> {
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    *self.state.lock() = Health::Bad;
                    break;
                }
                health = self.rx.recv() => match health {
                    Some(health) => {
                        let mut guard = self.state.lock();
                        if *guard != health {
                            info!(%health, "health changed");
                            *guard = health;
                        }
                    }
                    None => break,
                },
            }
        }
        info!("listen health exited");
        Ok(())
    }

    /// serve the HTTP external api until `token` is cancelled
    async fn run(addr: SocketAddr, app: Router, token: CancellationToken) -> Result<()> {
        let tcp = TcpListener::bind(&addr).await?;
        info!(%addr, "external API listening");
        axum::serve(tcp, app)
            .with_graceful_shutdown(token.cancelled_owned())
            .await?;
        info!("external API stopped");
        Ok(())
    }

    /// Kick off the HTTP service and start listening on the health channel.
    /// Both stop once `token` is cancelled.
    pub fn start(mut self, token: CancellationToken) -> JoinHandle<()> {
        let app = router(
            self.state.clone(),
            self.store.clone(),
            self.info.clone(),
            self.request_timeout,
        );
        let addr = self.addr;
        // if tx is not cloned, health listen will never update since ExternalApi is owner

        tokio::spawn(
            async move {
                if let Err(err) = tokio::try_join!(
                    ExternalApi::run(addr, app, token.clone()),
                    self.listen_status(token.clone())
                ) {
                    error!(?err, "external api task returning with error");
                }
            }
            .instrument(info_span!("external_api")),
        )
    }

    /// Start the api, aborting the task when the guard is dropped
    pub fn serve(self, token: CancellationToken) -> ExternalApiGuard {
        ExternalApiGuard {
            task_handle: self.start(token),
        }
    }
}

fn item_routes() -> Router {
    Router::new()
        .route(
            "/items",
            routing::get(handlers::list_items).post(handlers::create_item),
        )
        .route(
            "/items/:id",
            routing::get(handlers::get_item)
                .put(handlers::update_item)
                .delete(handlers::delete_item),
        )
}

/// Build the full application router. Exposed so the api can be mounted on a
/// listener the caller already owns.
pub fn router(
    state: State,
    store: ResourceStore,
    info: Arc<ServiceInfo>,
    request_timeout: Duration,
) -> Router {
    Router::new()
        .route("/", routing::get(handlers::index))
        .route("/health", routing::get(handlers::health))
        .route("/ping", routing::get(handlers::ping))
        .route("/metrics", routing::get(handlers::metrics))
        .route("/metrics-text", routing::get(handlers::metrics_text))
        .merge(item_routes())
        .nest("/api/v1", item_routes())
        .layer(Extension(state))
        .layer(Extension(store))
        .layer(Extension(info))
        .layer(CatchPanicLayer::custom(models::panic_response))
        .layer(TimeoutLayer::new(request_timeout))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http().on_response(DefaultOnResponse::new().level(Level::INFO)))
}

mod handlers {

    use std::sync::Arc;

    use anyhow::Context;
    use axum::{
        Json,
        body::Body,
        extract::{Extension, Path, rejection::JsonRejection},
        http::header,
        http::{Response, StatusCode},
        response::IntoResponse,
    };
    use prometheus::{Encoder, ProtobufEncoder, TextEncoder};
    use resource_store::{Resource, ResourceStore};
    use store_core::metrics::{ITEMS_TOTAL, START_TIME, UPTIME, record_request};
    use tracing::{Span, error, field, info, instrument, warn};

    use crate::models::{
        ApiError, DeleteResponse, Health, HealthResponse, IndexResponse, ItemList, ItemRequest,
        ServerResult, ServiceInfo, State,
    };

    /// record the outcome of `res` for `operation` and attach the success status
    fn observed<T>(
        operation: &str,
        ok: StatusCode,
        res: ServerResult<T>,
    ) -> ServerResult<(StatusCode, T)> {
        let status = match &res {
            Ok(_) => ok,
            Err(err) => err.status(),
        };
        record_request(operation, status.as_u16());
        res.map(|body| (ok, body))
    }

    fn set_item_gauge(store: &ResourceStore) {
        ITEMS_TOTAL.set(store.count() as i64);
    }

    pub(crate) async fn index(Extension(info): Extension<Arc<ServiceInfo>>) -> impl IntoResponse {
        Json(IndexResponse {
            service: info.service.clone(),
            version: info.version.clone(),
            status: "running",
        })
    }

    pub(crate) async fn health(
        Extension(state): Extension<State>,
        Extension(store): Extension<ResourceStore>,
        Extension(info): Extension<Arc<ServiceInfo>>,
    ) -> ServerResult<impl IntoResponse> {
        let health = *state.lock();
        observed(
            "health",
            StatusCode::OK,
            match health {
                Health::Good => Ok(Json(HealthResponse {
                    status: "healthy",
                    item_count: store.count(),
                    service: info.service.clone(),
                })),
                Health::Bad => {
                    warn!("health check failed, service not ready");
                    Err(ApiError::Unavailable("storage unavailable".to_owned()))
                }
            },
        )
    }

    #[instrument(name = "handler.list", skip_all)]
    pub(crate) async fn list_items(
        Extension(store): Extension<ResourceStore>,
    ) -> ServerResult<impl IntoResponse> {
        let items = store.list();
        info!(items_count = items.len(), "items retrieved");
        observed(
            "list",
            StatusCode::OK,
            Ok(Json(ItemList {
                count: items.len(),
                items,
            })),
        )
    }

    #[instrument(
        name = "handler.create",
        skip_all,
        fields(item_id = field::Empty, item_name = field::Empty)
    )]
    pub(crate) async fn create_item(
        Extension(store): Extension<ResourceStore>,
        body: Result<Json<ItemRequest>, JsonRejection>,
    ) -> ServerResult<impl IntoResponse> {
        observed("create", StatusCode::CREATED, create(&store, body))
    }

    fn create(
        store: &ResourceStore,
        body: Result<Json<ItemRequest>, JsonRejection>,
    ) -> ServerResult<Json<Resource>> {
        let Json(req) = body?;
        let item = store.create(
            req.name.as_deref().unwrap_or_default(),
            req.description.as_deref().unwrap_or_default(),
        )?;
        set_item_gauge(store);
        Span::current()
            .record("item_id", item.id.as_str())
            .record("item_name", item.name.as_str());
        info!(item_id = %item.id, item_name = %item.name, "item created");
        Ok(Json(item))
    }

    #[instrument(name = "handler.get", skip_all, fields(item_id = %id))]
    pub(crate) async fn get_item(
        Extension(store): Extension<ResourceStore>,
        Path(id): Path<String>,
    ) -> ServerResult<impl IntoResponse> {
        let res = store.get(&id).map(Json).map_err(ApiError::from);
        if let Ok(Json(item)) = &res {
            info!(item_id = %id, item_name = %item.name, "item retrieved");
        }
        observed("get", StatusCode::OK, res)
    }

    #[instrument(
        name = "handler.update",
        skip_all,
        fields(item_id = %id, item_name = field::Empty)
    )]
    pub(crate) async fn update_item(
        Extension(store): Extension<ResourceStore>,
        Path(id): Path<String>,
        body: Result<Json<ItemRequest>, JsonRejection>,
    ) -> ServerResult<impl IntoResponse> {
        observed("update", StatusCode::OK, update(&store, &id, body))
    }

    fn update(
        store: &ResourceStore,
        id: &str,
        body: Result<Json<ItemRequest>, JsonRejection>,
    ) -> ServerResult<Json<Resource>> {
        let Json(req) = body?;
        let item = store.update(id, req.name.as_deref(), req.description.as_deref())?;
        Span::current().record("item_name", item.name.as_str());
        info!(item_id = %id, item_name = %item.name, "item updated");
        Ok(Json(item))
    }

    #[instrument(name = "handler.delete", skip_all, fields(item_id = %id))]
    pub(crate) async fn delete_item(
        Extension(store): Extension<ResourceStore>,
        Path(id): Path<String>,
    ) -> ServerResult<impl IntoResponse> {
        let res = store.delete(&id).map_err(ApiError::from).map(|()| {
            set_item_gauge(&store);
            info!(item_id = %id, "item deleted");
            Json(DeleteResponse {
                message: "Item deleted successfully",
            })
        });
        observed("delete", StatusCode::OK, res)
    }

    pub(crate) async fn metrics() -> ServerResult<impl IntoResponse> {
        UPTIME.set(START_TIME.elapsed().as_secs() as i64);
        let encoder = ProtobufEncoder::new();
        let mut buf = Vec::new();
        let mf = prometheus::gather();
        let resp = Response::builder().header(header::CONTENT_TYPE, encoder.format_type());

        match encoder.encode(&mf, &mut buf) {
            Err(err) => {
                error!(?err, "error protobuf encoding prometheus metrics");
                Ok(resp
                    .status(StatusCode::INTERNAL_SERVER_ERROR)
                    .body(Body::empty())
                    .context("building metrics response")?)
            }
            Ok(_) => Ok(resp
                .status(StatusCode::OK)
                .body(Body::from(buf))
                .context("building metrics response")?),
        }
    }

    pub(crate) async fn metrics_text() -> ServerResult<impl IntoResponse> {
        UPTIME.set(START_TIME.elapsed().as_secs() as i64);
        let encoder = TextEncoder::new();
        let mut buf = String::new();
        let mf = prometheus::gather();
        let resp = Response::builder().header(header::CONTENT_TYPE, encoder.format_type());

        match encoder.encode_utf8(&mf, &mut buf) {
            Err(err) => {
                error!(?err, "error text encoding prometheus metrics");
                Ok(resp
                    .status(StatusCode::INTERNAL_SERVER_ERROR)
                    .body(Body::empty())
                    .context("building metrics response")?)
            }
            Ok(_) => Ok(resp
                .status(StatusCode::OK)
                .body(Body::from(buf))
                .context("building metrics response")?),
        }
    }

    pub(crate) async fn ping() -> impl IntoResponse {
        StatusCode::OK
    }
}

/// Various models for API requests & responses
pub mod models {
    use std::{any::Any, fmt, sync::Arc};

    use axum::{
        Json,
        extract::rejection::JsonRejection,
        http::StatusCode,
        response::{IntoResponse, Response},
    };
    use parking_lot::Mutex;
    use resource_store::{Resource, StoreError};
    use serde::{Deserialize, Serialize};
    use tracing::{error, warn};

    /// The overall health of the system
    pub type State = Arc<Mutex<Health>>;
    /// Health is binary Good/Bad at the moment
    #[derive(Serialize, Deserialize, Debug, PartialEq, Copy, Clone, Eq)]
    #[serde(rename_all = "UPPERCASE")]
    pub enum Health {
        /// Report good health
        Good,
        /// Report bad health
        Bad,
    }

    impl fmt::Display for Health {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(
                f,
                "{}",
                match *self {
                    Health::Good => "GOOD",
                    Health::Bad => "BAD",
                }
            )
        }
    }

    /// health starts out bad until startup checks pass
    pub fn blank_health() -> State {
        Arc::new(Mutex::new(Health::Bad))
    }

    /// name & version reported by `/` and `/health`
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct ServiceInfo {
        /// service name
        pub service: String,
        /// service version
        pub version: String,
    }

    impl ServiceInfo {
        /// new service info with the given name
        pub fn new(service: impl Into<String>, version: impl Into<String>) -> Self {
            Self {
                service: service.into(),
                version: version.into(),
            }
        }
    }

    /// body of create & update requests. Absent or empty fields are left
    /// unchanged on update; `name` is required on create.
    #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
    pub struct ItemRequest {
        /// item name
        pub name: Option<String>,
        /// item description
        pub description: Option<String>,
    }

    /// list response
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct ItemList {
        /// every item at the time of the request
        pub items: Vec<Resource>,
        /// `items.len()`
        pub count: usize,
    }

    /// delete response
    #[derive(Debug, Clone, Serialize)]
    pub struct DeleteResponse {
        /// confirmation message
        pub message: &'static str,
    }

    /// good health response
    #[derive(Debug, Clone, Serialize)]
    pub struct HealthResponse {
        /// always "healthy"
        pub status: &'static str,
        /// number of stored items
        pub item_count: usize,
        /// service name
        pub service: String,
    }

    /// response for `/`
    #[derive(Debug, Clone, Serialize)]
    pub struct IndexResponse {
        /// service name
        pub service: String,
        /// service version
        pub version: String,
        /// always "running"
        pub status: &'static str,
    }

    /// json error body
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct ErrorResponse {
        /// set to "unhealthy" on 503s
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub status: Option<String>,
        /// human readable message
        pub error: String,
    }

    /// Errors returned from handlers, rendered as an [`ErrorResponse`]
    #[derive(Debug)]
    pub enum ApiError {
        /// store errors map 1:1 to 400/404
        Store(StoreError),
        /// the body could not be read as json
        BadRequest(String),
        /// health is bad
        Unavailable(String),
        /// anything else
        Internal(anyhow::Error),
    }

    /// return error result
    pub type ServerResult<T> = Result<T, ApiError>;

    impl ApiError {
        /// http status for this error
        pub fn status(&self) -> StatusCode {
            match self {
                ApiError::Store(StoreError::Validation(_)) | ApiError::BadRequest(_) => {
                    StatusCode::BAD_REQUEST
                }
                ApiError::Store(StoreError::NotFound(_)) => StatusCode::NOT_FOUND,
                ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            }
        }

        fn message(&self) -> String {
            match self {
                ApiError::Store(StoreError::Validation(msg)) => {
                    format!("Invalid request payload: {msg}")
                }
                ApiError::Store(StoreError::NotFound(_)) => "Item not found".to_owned(),
                ApiError::BadRequest(msg) => format!("Invalid request payload: {msg}"),
                ApiError::Unavailable(msg) => msg.clone(),
                ApiError::Internal(err) => format!("{err}"),
            }
        }
    }

    impl IntoResponse for ApiError {
        fn into_response(self) -> Response {
            let status = self.status();
            if status.is_server_error() {
                error!(err = ?self, "request failed");
            } else {
                warn!(err = ?self, "request rejected");
            }
            (
                status,
                Json(ErrorResponse {
                    status: matches!(self, ApiError::Unavailable(_)).then(|| "unhealthy".to_owned()),
                    error: self.message(),
                }),
            )
                .into_response()
        }
    }

    impl From<StoreError> for ApiError {
        fn from(err: StoreError) -> Self {
            Self::Store(err)
        }
    }

    impl From<JsonRejection> for ApiError {
        fn from(err: JsonRejection) -> Self {
            Self::BadRequest(err.body_text())
        }
    }

    impl From<anyhow::Error> for ApiError {
        fn from(err: anyhow::Error) -> Self {
            Self::Internal(err)
        }
    }

    /// a panicking handler is answered with a 500 rather than a dropped connection
    pub(crate) fn panic_response(err: Box<dyn Any + Send + 'static>) -> Response {
        let detail = if let Some(s) = err.downcast_ref::<String>() {
            s.clone()
        } else if let Some(s) = err.downcast_ref::<&str>() {
            s.to_string()
        } else {
            "unknown panic".to_owned()
        };
        error!(%detail, "panic recovered in http handler");
        ApiError::Internal(anyhow::anyhow!("internal server error")).into_response()
    }
}
