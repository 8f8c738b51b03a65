use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::problem::ProblemResponse;
use crate::router::AppState;

const ADMIN_ACTOR_TYPE: &str = "user";
const ALLOWED_METHODS: &str = "GET, PUT, PATCH, OPTIONS";
const ALLOWED_HEADERS: &str = "authorization, content-type";

/// Validates HS256 bearer tokens issued to admin users.
#[derive(Clone)]
pub struct AdminTokenValidator {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl AdminTokenValidator {
    pub fn new(secret: &[u8]) -> Self {
        let mut validation = Validation::new(jsonwebtoken::Algorithm::HS256);
        validation.validate_aud = false;
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.required_spec_claims.clear();
        Self {
            decoding_key: DecodingKey::from_secret(secret),
            validation,
        }
    }

    pub fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<AdminClaims, TokenError> {
        let claims = decode::<AdminClaims>(token, &self.decoding_key, &self.validation)
            .map_err(|err| TokenError::Invalid(format!("{err}")))?
            .claims;

        if claims.actor_type != ADMIN_ACTOR_TYPE {
            return Err(TokenError::Forbidden(claims.actor_type));
        }
        if let Some(exp) = claims.exp {
            if now.timestamp() >= exp {
                return Err(TokenError::Invalid("token_expired".to_string()));
            }
        }
        Ok(claims)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AdminClaims {
    pub actor_id: String,
    pub actor_type: String,
    #[serde(default)]
    pub auth_identity_id: Option<String>,
    #[serde(default)]
    pub exp: Option<i64>,
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("invalid token: {0}")]
    Invalid(String),
    #[error("actor type {0} may not use admin routes")]
    Forbidden(String),
}

/// Rejects `/admin` requests without a valid admin bearer token and exposes
/// the claims to handlers through request extensions.
pub async fn require_admin(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ProblemResponse> {
    let token = bearer_token(request.headers()).ok_or_else(|| {
        ProblemResponse::new(
            StatusCode::UNAUTHORIZED,
            "missing_token",
            "authorization bearer token is required",
        )
    })?;

    let claims = state
        .admin_tokens()
        .validate(token, state.now())
        .map_err(|err| {
            warn!(stage = "admin", error = %err, "rejected admin token");
            match err {
                TokenError::Invalid(detail) => {
                    ProblemResponse::new(StatusCode::UNAUTHORIZED, "invalid_token", detail)
                }
                TokenError::Forbidden(actor) => ProblemResponse::new(
                    StatusCode::FORBIDDEN,
                    "forbidden_actor",
                    format!("actor type {actor} may not use admin routes"),
                ),
            }
        })?;

    request.extensions_mut().insert(Arc::new(claims));
    Ok(next.run(request).await)
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Echoes allowed origins and answers preflight requests before auth runs.
pub async fn admin_cors(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let origin = request
        .headers()
        .get(header::ORIGIN)
        .and_then(|value| value.to_str().ok())
        .filter(|origin| state.admin_origin_allowed(origin))
        .and_then(|origin| HeaderValue::from_str(origin).ok());

    let mut response = if request.method() == Method::OPTIONS {
        let status = if origin.is_some() {
            StatusCode::NO_CONTENT
        } else {
            StatusCode::FORBIDDEN
        };
        (status, Body::empty()).into_response()
    } else {
        next.run(request).await
    };

    if let Some(origin) = origin {
        let headers = response.headers_mut();
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin);
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
            HeaderValue::from_static("true"),
        );
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static(ALLOWED_METHODS),
        );
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static(ALLOWED_HEADERS),
        );
        headers.append(header::VARY, HeaderValue::from_static("Origin"));
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn token(actor_type: &str, exp: Option<i64>) -> String {
        let claims = AdminClaims {
            actor_id: "user_01".into(),
            actor_type: actor_type.into(),
            auth_identity_id: None,
            exp,
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(b"jwt-secret"))
            .expect("encode")
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 14, 9, 0, 0).unwrap()
    }

    #[test]
    fn accepts_user_tokens() {
        let validator = AdminTokenValidator::new(b"jwt-secret");
        let claims = validator
            .validate(&token("user", Some(now().timestamp() + 60)), now())
            .expect("valid");
        assert_eq!(claims.actor_id, "user_01");
    }

    #[test]
    fn rejects_customer_tokens_and_expired_tokens() {
        let validator = AdminTokenValidator::new(b"jwt-secret");
        assert!(matches!(
            validator.validate(&token("customer", None), now()),
            Err(TokenError::Forbidden(actor)) if actor == "customer"
        ));
        assert!(matches!(
            validator.validate(&token("user", Some(now().timestamp())), now()),
            Err(TokenError::Invalid(reason)) if reason == "token_expired"
        ));
    }

    #[test]
    fn rejects_tokens_signed_with_another_secret() {
        let validator = AdminTokenValidator::new(b"other-secret");
        assert!(matches!(
            validator.validate(&token("user", None), now()),
            Err(TokenError::Invalid(_))
        ));
    }

    #[test]
    fn bearer_token_requires_scheme() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_token(&headers), None);
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        assert_eq!(bearer_token(&headers), Some("abc"));
    }
}
