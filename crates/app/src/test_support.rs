use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, HeaderMap, HeaderValue, Method, Request},
    response::Response,
    Router,
};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use http_body_util::BodyExt;
use httpmock::MockServer;
use jsonwebtoken::{encode, EncodingKey, Header};
use reqwest::Client;
use serde_json::{json, Value};
use sha2::Sha256;
use url::Url;

use volja_commerce::{CommerceClient, SendGridClient, Sender};
use volja_core::invoice::Seller;
use volja_storage::Database;

use crate::auth::AdminClaims;
use crate::router::{app_router, AppState, NotificationTemplates, StateOptions};
use crate::signature::{HEADER_EVENT_ID, HEADER_SIGNATURE, HEADER_TIMESTAMP};
use crate::telemetry;

pub const FIXED_NOW: &str = "2025-03-14T10:00:00Z";
pub const EVENT_SECRET: &str = "test-secret";
pub const JWT_SECRET: &[u8] = b"jwt-secret";
pub const ADMIN_ORIGIN: &str = "https://admin.ateljevolja.si";
pub const INTERNAL_EMAIL: &str = "orders@ateljevolja.si";

/// App state wired to an in-memory database and two mock upstreams.
pub struct TestContext {
    pub state: AppState,
    pub database: Database,
    pub commerce: MockServer,
    pub mailer: MockServer,
}

impl TestContext {
    pub async fn new() -> Self {
        let metrics = telemetry::init_metrics().expect("metrics init");
        let database = Database::connect("sqlite::memory:")
            .await
            .expect("connect");
        database.run_migrations().await.expect("migrations");

        let commerce = MockServer::start_async().await;
        let mailer = MockServer::start_async().await;
        let http = Client::new();

        let commerce_client = CommerceClient::new(
            "commerce-token",
            Url::parse(&commerce.base_url()).expect("commerce url"),
            http.clone(),
        );
        let sendgrid = SendGridClient::new(
            "sg-key",
            Sender {
                email: "info@ateljevolja.si".into(),
                name: Some("Atelje Volja".into()),
            },
            Url::parse(&mailer.base_url()).expect("mailer url"),
            http,
        );

        let state = AppState::new(StateOptions {
            metrics,
            storage: database.clone(),
            commerce: commerce_client,
            mailer: sendgrid,
            event_secret: Arc::from(EVENT_SECRET.as_bytes().to_vec().into_boxed_slice()),
            jwt_secret: JWT_SECRET.to_vec(),
            admin_cors: vec![ADMIN_ORIGIN.to_string()],
            templates: NotificationTemplates {
                order_placed: "d-order".into(),
                shipping: "d-shipping".into(),
                internal_order_email: INTERNAL_EMAIL.into(),
            },
            seller: Seller {
                name: "Atelje Volja".into(),
                address_lines: vec!["Trubarjeva 1".into(), "1000 Ljubljana".into()],
                vat_id: Some("SI12345678".into()),
                iban: Some("SI56 0000 0000 0000 000".into()),
                email: "info@ateljevolja.si".into(),
            },
            timezone: chrono_tz::Europe::Ljubljana,
        });
        let now = fixed_now();
        let state = state.with_clock(Arc::new(move || now));

        Self {
            state,
            database,
            commerce,
            mailer,
        }
    }

    pub fn router(&self) -> Router {
        app_router(self.state.clone())
    }
}

pub fn fixed_now() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(FIXED_NOW)
        .expect("fixed now")
        .with_timezone(&Utc)
}

pub fn sign(secret: &str, message_id: &str, timestamp: &str, body: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("hmac key");
    mac.update(message_id.as_bytes());
    mac.update(timestamp.as_bytes());
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

pub fn signed_headers(secret: &str, message_id: &str, timestamp: &str, body: &[u8]) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(HEADER_EVENT_ID, HeaderValue::from_str(message_id).expect("id"));
    headers.insert(HEADER_TIMESTAMP, HeaderValue::from_str(timestamp).expect("ts"));
    headers.insert(
        HEADER_SIGNATURE,
        HeaderValue::from_str(&sign(secret, message_id, timestamp, body)).expect("signature"),
    );
    headers
}

/// A `POST` signed with the test secret at [`FIXED_NOW`].
pub fn signed_request(path: &str, message_id: &str, body: &str) -> Request<Body> {
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri(path)
        .header(header::CONTENT_TYPE, "application/json");
    for (name, value) in signed_headers(EVENT_SECRET, message_id, FIXED_NOW, body.as_bytes()).iter()
    {
        builder = builder.header(name, value);
    }
    builder.body(Body::from(body.to_string())).expect("request")
}

pub fn admin_token(actor_type: &str) -> String {
    let claims = AdminClaims {
        actor_id: "user_01".into(),
        actor_type: actor_type.into(),
        auth_identity_id: Some("authid_01".into()),
        exp: Some(fixed_now().timestamp() + 3600),
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(JWT_SECRET)).expect("token")
}

/// An authorised admin request with an optional JSON body.
pub fn admin_request(method: Method, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", admin_token("user")));
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("request"),
        None => builder.body(Body::empty()).expect("request"),
    }
}

pub async fn read_json(response: Response) -> Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body should read")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("json body")
}

pub fn order_body() -> Value {
    json!({
        "order": {
            "id": "order_01",
            "display_id": 42,
            "email": "ana@example.com",
            "currency_code": "eur",
            "created_at": "2025-03-14T09:30:00.000Z",
            "total": 90,
            "shipping_total": "10.00",
            "customer": {"first_name": "", "last_name": null},
            "shipping_address": {
                "first_name": "Ana",
                "last_name": "Novak",
                "address_1": "Trubarjeva 1",
                "address_2": "",
                "postal_code": "1000",
                "city": "Ljubljana",
                "country_code": "si"
            },
            "items": [
                {
                    "id": "item_01",
                    "title": "Linen Dress",
                    "variant_title": "M",
                    "quantity": 1,
                    "unit_price": 50,
                    "thumbnail": "https://cdn.example.com/dress.jpg"
                },
                {
                    "id": "item_02",
                    "title": "Silk Scarf",
                    "quantity": 2,
                    "unit_price": 15
                }
            ]
        }
    })
}

pub fn fulfillment_body() -> Value {
    json!({
        "fulfillment": {
            "id": "ful_01",
            "order_id": "order_01",
            "labels": [{"tracking_number": "RR123456789SI"}],
            "order": {"customer": {"email": "ana@example.com"}},
            "delivery_address": {"first_name": "Ana"},
            "created_at": "2025-03-15T08:00:00Z"
        }
    })
}

pub fn product_body(metadata: Value) -> Value {
    json!({
        "product": {
            "id": "prod_1",
            "title": "Linen Dress",
            "metadata": metadata
        }
    })
}
