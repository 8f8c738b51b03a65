mod auth;
mod events;
mod hooks;
mod notifier;
mod problem;
mod router;
mod signature;
mod subscribers;
mod telemetry;
mod widgets;
mod workflow;

#[cfg(test)]
mod test_support;

use std::{net::SocketAddr, sync::Arc};

use reqwest::Client;
use tracing::info;
use url::Url;

use volja_commerce::{CommerceClient, SendGridClient, Sender};
use volja_core::invoice::Seller;
use volja_storage::Database;
use volja_util::{load_env_file, AppConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    load_env_file();
    let config = AppConfig::from_env()?;

    telemetry::init_tracing(&config)?;
    let metrics = telemetry::init_metrics()?;

    let storage = Database::connect(&config.database_url).await?;
    storage.run_migrations().await?;

    let http = Client::new();
    let commerce = CommerceClient::new(
        config.commerce_api_token.clone(),
        Url::parse(&config.commerce_api_url)?,
        http.clone(),
    );
    let mailer = SendGridClient::new(
        config.sendgrid_api_key.clone(),
        Sender {
            email: config.email_from.email.clone(),
            name: config.email_from.name.clone(),
        },
        Url::parse(&config.sendgrid_api_url)?,
        http,
    );

    let seller = Seller {
        name: config.seller.name.clone(),
        address_lines: config.seller.address_lines.clone(),
        vat_id: config.seller.vat_id.clone(),
        iban: config.seller.iban.clone(),
        email: config.seller.email.clone(),
    };

    let state = router::AppState::new(router::StateOptions {
        metrics,
        storage,
        commerce,
        mailer,
        event_secret: Arc::from(config.event_webhook_secret.as_bytes()),
        jwt_secret: config.jwt_secret.as_bytes().to_vec(),
        admin_cors: config.admin_cors.clone(),
        templates: router::NotificationTemplates {
            order_placed: config.order_placed_template_id.clone(),
            shipping: config.shipping_template_id.clone(),
            internal_order_email: config.internal_order_email.clone(),
        },
        seller,
        timezone: config.store_timezone,
    });

    let addr: SocketAddr = config.bind_addr;
    info!(
        stage = "app",
        %addr,
        env = %config.environment.as_str(),
        timezone = %config.store_timezone,
        "starting HTTP server"
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router::app_router(state))
        .await
        .map_err(|err| err.into())
}
