//! Bearer-token auth middleware.
//!
//! Single-token auth for a single-practitioner deployment. The comparison is
//! constant-time so the token cannot be recovered byte-by-byte from timing.

use axum::extract::{Request, State};
use axum::http::{StatusCode, header};
use axum::middleware::Next;
use axum::response::Response;
use subtle::ConstantTimeEq;

#[derive(Clone)]
pub struct AuthState {
    pub token: String,
}

pub async fn auth_middleware(
    State(auth): State<AuthState>,
    request: Request,
    next: Next,
) -> Result<Response, (StatusCode, String)> {
    let presented = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .unwrap_or("");

    if presented.as_bytes().ct_eq(auth.token.as_bytes()).into() {
        Ok(next.run(request).await)
    } else {
        Err((
            StatusCode::UNAUTHORIZED,
            "Missing or invalid bearer token".to_string(),
        ))
    }
}
