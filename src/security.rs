use crate::models::ApiError;
use axum::{
    Json,
    body::Body,
    extract::State,
    http::{self, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::{convert::Infallible, sync::Arc};
use tracing::warn;

pub const PASSWORD_HEADER: &str = "X-Upload-Password";

/// Optional shared secret guarding the pipeline routes. Compared in plaintext.
#[derive(Clone, Default)]
pub struct AuthState {
    password: Option<Arc<str>>,
}

impl AuthState {
    pub fn new(password: Option<String>) -> Self {
        Self {
            password: password.map(Arc::from),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.password.is_some()
    }

    fn accepts(&self, presented: Option<&str>) -> bool {
        match (&self.password, presented) {
            (None, _) => true,
            (Some(expected), Some(presented)) => presented == &**expected,
            (Some(_), None) => false,
        }
    }
}

pub async fn require_upload_password(
    State(state): State<AuthState>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, Infallible> {
    if !state.is_enabled() {
        return Ok(next.run(request).await);
    }
    let presented = extract_password(request.headers());
    if presented.is_none() {
        return Ok(unauthorized_response(
            "missing_password",
            "Provide X-Upload-Password or a Bearer token",
        ));
    }
    if !state.accepts(presented.as_deref()) {
        warn!(
            target: "chatbay.api",
            path = %request.uri().path(),
            "rejected request with wrong upload password"
        );
        return Ok(unauthorized_response("invalid_password", "Password not recognized"));
    }
    Ok(next.run(request).await)
}

fn extract_password(headers: &http::HeaderMap) -> Option<String> {
    if let Some(value) = headers.get(PASSWORD_HEADER)
        && let Ok(raw) = value.to_str()
        && !raw.trim().is_empty()
    {
        return Some(raw.trim().to_string());
    }
    headers
        .get(http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .filter(|raw| raw.len() >= 7 && raw[..6].eq_ignore_ascii_case("bearer"))
        .map(|raw| raw[6..].trim().to_string())
        .filter(|value| !value.is_empty())
}

fn unauthorized_response(code: &str, message: &str) -> Response {
    let payload = ApiError::new(code).with_detail(message);
    (StatusCode::UNAUTHORIZED, Json(payload)).into_response()
}
