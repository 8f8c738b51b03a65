use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use metrics_exporter_prometheus::PrometheusHandle;

use volja_commerce::{CommerceClient, SendGridClient};
use volja_core::invoice::Seller;
use volja_storage::Database;

use crate::auth::{admin_cors, require_admin, AdminTokenValidator};
use crate::notifier::Notifier;
use crate::problem::ProblemResponse;
use crate::workflow::CustomFromProductWorkflow;
use crate::{events, hooks, telemetry, widgets};

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Template ids and the internal mailbox used by the subscribers.
#[derive(Debug, Clone)]
pub struct NotificationTemplates {
    pub order_placed: String,
    pub shipping: String,
    pub internal_order_email: String,
}

/// Everything [`AppState::new`] needs, resolved by `main` from the config.
pub struct StateOptions {
    pub metrics: PrometheusHandle,
    pub storage: Database,
    pub commerce: CommerceClient,
    pub mailer: SendGridClient,
    pub event_secret: Arc<[u8]>,
    pub jwt_secret: Vec<u8>,
    pub admin_cors: Vec<String>,
    pub templates: NotificationTemplates,
    pub seller: Seller,
    pub timezone: Tz,
}

#[derive(Clone)]
pub struct AppState {
    metrics: PrometheusHandle,
    storage: Database,
    commerce: CommerceClient,
    notifier: Notifier,
    workflow: CustomFromProductWorkflow,
    event_secret: Arc<[u8]>,
    admin_tokens: AdminTokenValidator,
    admin_cors: Arc<[String]>,
    templates: Arc<NotificationTemplates>,
    seller: Arc<Seller>,
    timezone: Tz,
    clock: Clock,
}

impl AppState {
    pub fn new(options: StateOptions) -> Self {
        let clock: Clock = Arc::new(Utc::now);
        let notifier = Notifier::new(options.mailer, options.storage.notifications());
        let workflow = CustomFromProductWorkflow::new(options.storage.clone(), clock.clone());
        Self {
            metrics: options.metrics,
            storage: options.storage,
            commerce: options.commerce,
            notifier,
            workflow,
            event_secret: options.event_secret,
            admin_tokens: AdminTokenValidator::new(&options.jwt_secret),
            admin_cors: options.admin_cors.into(),
            templates: Arc::new(options.templates),
            seller: Arc::new(options.seller),
            timezone: options.timezone,
            clock,
        }
    }

    #[cfg(test)]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.workflow = CustomFromProductWorkflow::new(self.storage.clone(), clock.clone());
        self.clock = clock;
        self
    }

    pub fn metrics(&self) -> &PrometheusHandle {
        &self.metrics
    }

    pub fn storage(&self) -> &Database {
        &self.storage
    }

    pub fn commerce(&self) -> &CommerceClient {
        &self.commerce
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub fn workflow(&self) -> &CustomFromProductWorkflow {
        &self.workflow
    }

    pub fn event_secret(&self) -> Arc<[u8]> {
        self.event_secret.clone()
    }

    pub fn admin_tokens(&self) -> &AdminTokenValidator {
        &self.admin_tokens
    }

    pub fn admin_origin_allowed(&self, origin: &str) -> bool {
        self.admin_cors.iter().any(|allowed| allowed == origin)
    }

    pub fn templates(&self) -> &NotificationTemplates {
        &self.templates
    }

    pub fn seller(&self) -> &Seller {
        &self.seller
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }
}

pub fn app_router(state: AppState) -> Router {
    let admin = widgets::router()
        .route_layer(middleware::from_fn_with_state(state.clone(), require_admin))
        .layer(middleware::from_fn_with_state(state.clone(), admin_cors));

    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .route("/events", post(events::handle))
        .route("/hooks/product-created", post(hooks::product_created))
        .nest("/admin", admin)
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn metrics(State(state): State<AppState>) -> Result<Response, ProblemResponse> {
    let body = telemetry::render_metrics(state.metrics());
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/plain; version=0.0.4")
        .body(Body::from(body))
        .map(IntoResponse::into_response)
        .map_err(|err| ProblemResponse::internal("metrics_unavailable", err.to_string()))
}
