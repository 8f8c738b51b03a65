use std::{fmt, net::SocketAddr};

use chrono_tz::Tz;

use super::{
    list_var, optional_var, required_var, server_bind_address, var_or, with_trailing_slash,
};

pub const DEFAULT_DATABASE_URL: &str = "sqlite://volja.db?mode=rwc";
pub const DEFAULT_COMMERCE_API_URL: &str = "http://localhost:9000/";
pub const DEFAULT_SENDGRID_API_URL: &str = "https://api.sendgrid.com/";
pub const DEFAULT_EMAIL_FROM: &str = "Atelje Volja <info@ateljevolja.si>";
pub const DEFAULT_INTERNAL_ORDER_EMAIL: &str = "info@ateljevolja.si";
pub const DEFAULT_JWT_SECRET: &str = "supersecret";
pub const DEFAULT_STORE_TIMEZONE: &str = "Europe/Ljubljana";
pub const DEFAULT_SELLER_NAME: &str = "Atelje Volja";

/// Application runtime environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
    Test,
}

impl Environment {
    fn from_str(value: &str) -> Result<Self, ConfigError> {
        match value {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            "test" => Ok(Self::Test),
            other => Err(ConfigError::InvalidEnvironment(other.to_string())),
        }
    }

    /// Returns the canonical name used for logging/metrics labels.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Test => "test",
        }
    }
}

/// A display name plus address, parsed from `Name <user@example.com>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mailbox {
    pub name: Option<String>,
    pub email: String,
}

impl Mailbox {
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if let Some((name, rest)) = raw.split_once('<') {
            let email = rest.strip_suffix('>')?.trim();
            if !email.contains('@') {
                return None;
            }
            let name = name.trim().trim_matches('"').trim();
            return Some(Self {
                name: (!name.is_empty()).then(|| name.to_string()),
                email: email.to_string(),
            });
        }
        raw.contains('@').then(|| Self {
            name: None,
            email: raw.to_string(),
        })
    }
}

/// Seller identity printed on invoices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SellerProfile {
    pub name: String,
    pub address_lines: Vec<String>,
    pub vat_id: Option<String>,
    pub iban: Option<String>,
    pub email: String,
}

impl SellerProfile {
    fn from_env() -> Self {
        Self {
            name: var_or("SELLER_NAME", DEFAULT_SELLER_NAME),
            address_lines: list_var("SELLER_ADDRESS", '|'),
            vat_id: optional_var("SELLER_VAT_ID"),
            iban: optional_var("SELLER_IBAN"),
            email: var_or("SELLER_EMAIL", DEFAULT_INTERNAL_ORDER_EMAIL),
        }
    }
}

/// Runtime configuration resolved from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub environment: Environment,
    pub database_url: String,
    pub commerce_api_url: String,
    pub commerce_api_token: String,
    pub sendgrid_api_url: String,
    pub sendgrid_api_key: String,
    pub email_from: Mailbox,
    pub order_placed_template_id: String,
    pub shipping_template_id: String,
    pub internal_order_email: String,
    pub event_webhook_secret: String,
    pub jwt_secret: String,
    pub admin_cors: Vec<String>,
    pub store_timezone: Tz,
    pub seller: SellerProfile,
}

impl AppConfig {
    /// Constructs the configuration by reading and validating environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let environment = Environment::from_str(&var_or("APP_ENV", "development"))?;
        let bind_addr = server_bind_address().map_err(ConfigError::BindAddress)?;

        let email_from_raw = var_or("EMAIL_FROM", DEFAULT_EMAIL_FROM);
        let email_from = Mailbox::parse(&email_from_raw)
            .ok_or_else(|| ConfigError::InvalidValue("EMAIL_FROM", email_from_raw.clone()))?;

        let internal_order_email = var_or("INTERNAL_ORDER_EMAIL", DEFAULT_INTERNAL_ORDER_EMAIL);
        if !internal_order_email.contains('@') {
            return Err(ConfigError::InvalidValue(
                "INTERNAL_ORDER_EMAIL",
                internal_order_email,
            ));
        }

        let timezone_raw = var_or("STORE_TIMEZONE", DEFAULT_STORE_TIMEZONE);
        let store_timezone = timezone_raw
            .trim()
            .parse::<Tz>()
            .map_err(|_| ConfigError::InvalidValue("STORE_TIMEZONE", timezone_raw.clone()))?;

        Ok(Self {
            bind_addr,
            environment,
            database_url: var_or("DATABASE_URL", DEFAULT_DATABASE_URL),
            commerce_api_url: with_trailing_slash(var_or(
                "COMMERCE_API_URL",
                DEFAULT_COMMERCE_API_URL,
            )),
            commerce_api_token: required_var("COMMERCE_API_TOKEN")?,
            sendgrid_api_url: with_trailing_slash(var_or(
                "SENDGRID_API_URL",
                DEFAULT_SENDGRID_API_URL,
            )),
            sendgrid_api_key: required_var("SENDGRID_API_KEY")?,
            email_from,
            order_placed_template_id: var_or("ORDER_PLACED_TEMPLATE_ID", ""),
            shipping_template_id: var_or("SHIPPING_TEMPLATE_ID", ""),
            internal_order_email,
            event_webhook_secret: required_var("EVENT_WEBHOOK_SECRET")?,
            jwt_secret: var_or("JWT_SECRET", DEFAULT_JWT_SECRET),
            admin_cors: list_var("ADMIN_CORS", ','),
            store_timezone,
            seller: SellerProfile::from_env(),
        })
    }
}

/// Errors that can occur during configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    InvalidEnvironment(String),
    BindAddress(std::net::AddrParseError),
    Missing(&'static str),
    InvalidValue(&'static str, String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidEnvironment(value) => write!(
                f,
                "APP_ENV must be one of 'development', 'production', or 'test' (got {value})"
            ),
            Self::BindAddress(err) => write!(f, "invalid APP_BIND_ADDR value: {err}"),
            Self::Missing(name) => write!(f, "{name} must be set"),
            Self::InvalidValue(name, value) => write!(f, "invalid {name} value: {value}"),
        }
    }
}

impl std::error::Error for ConfigError {}
