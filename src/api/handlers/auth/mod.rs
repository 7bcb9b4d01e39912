//! Login, refresh, logout and external-login endpoints.

use axum::{
    extract::Extension,
    http::{header::USER_AGENT, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use std::sync::Arc;
use tracing::{error, warn};

use crate::auth::lifecycle::ClientContext;
use crate::auth::{AuthError, LifecycleCoordinator, TokenPair};

pub(crate) mod types;

use types::{
    ErrorResponse, GoogleLoginRequest, LoginRequest, LogoutRequest, MessageResponse,
    RefreshRequest, TokenResponse,
};

#[utoipa::path(
    post,
    path = "/v1/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = TokenResponse),
        (status = 400, description = "Invalid credentials", body = ErrorResponse),
        (status = 404, description = "User not found", body = ErrorResponse),
        (status = 429, description = "Account locked out", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn login(
    headers: HeaderMap,
    coordinator: Extension<Arc<LifecycleCoordinator>>,
    payload: Option<Json<LoginRequest>>,
) -> Response {
    let Some(Json(request)) = payload else {
        return missing_payload();
    };
    let ctx = client_context(&headers);
    match coordinator
        .login(&request.username, &request.password, &ctx)
        .await
    {
        Ok(pair) => token_response(pair),
        Err(err) => error_response(err),
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/refresh",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "Token rotated", body = TokenResponse),
        (status = 400, description = "Invalid, expired or reused token", body = ErrorResponse),
        (status = 404, description = "Session not found", body = ErrorResponse),
        (status = 429, description = "Rate limited", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn refresh(
    headers: HeaderMap,
    coordinator: Extension<Arc<LifecycleCoordinator>>,
    payload: Option<Json<RefreshRequest>>,
) -> Response {
    let Some(Json(request)) = payload else {
        return missing_payload();
    };
    let ctx = client_context(&headers);
    match coordinator.refresh(&request.refresh_token, &ctx).await {
        Ok(pair) => token_response(pair),
        Err(err) => error_response(err),
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/logout",
    request_body = LogoutRequest,
    responses(
        (status = 200, description = "Logged out", body = MessageResponse)
    ),
    tag = "auth"
)]
pub async fn logout(
    coordinator: Extension<Arc<LifecycleCoordinator>>,
    payload: Option<Json<LogoutRequest>>,
) -> Response {
    // Logout never reports failure; an unusable token and a successful
    // revoke read the same to the caller.
    if let Some(Json(request)) = payload {
        coordinator.logout(&request.refresh_token).await;
    }
    Json(MessageResponse {
        message: "Logged out".to_string(),
    })
    .into_response()
}

#[utoipa::path(
    post,
    path = "/v1/auth/google",
    request_body = GoogleLoginRequest,
    responses(
        (status = 200, description = "Login successful", body = TokenResponse),
        (status = 400, description = "Invalid identity token", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn google_login(
    headers: HeaderMap,
    coordinator: Extension<Arc<LifecycleCoordinator>>,
    payload: Option<Json<GoogleLoginRequest>>,
) -> Response {
    let Some(Json(request)) = payload else {
        return missing_payload();
    };
    let ctx = client_context(&headers);
    match coordinator.login_with_google(&request.id_token, &ctx).await {
        Ok(pair) => token_response(pair),
        Err(err) => error_response(err),
    }
}

fn token_response(pair: TokenPair) -> Response {
    Json(TokenResponse {
        access_token: pair.access_token,
        refresh_token: pair.refresh_token,
    })
    .into_response()
}

fn missing_payload() -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: "Missing payload".to_string(),
        }),
    )
        .into_response()
}

fn error_response(err: AuthError) -> Response {
    if let AuthError::Unavailable(source) = &err {
        error!("Failed to handle auth request: {source:#}");
    } else if err.is_security_event() {
        warn!("Rejected auth request: {err}");
    }
    let status =
        StatusCode::from_u16(err.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
        .into_response()
}

fn client_context(headers: &HeaderMap) -> ClientContext {
    ClientContext {
        client_ip: extract_client_ip(headers).unwrap_or_else(|| "unknown".to_string()),
        user_agent: headers
            .get(USER_AGENT)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map_or_else(|| "unknown".to_string(), str::to_string),
    }
}

fn extract_client_ip(headers: &HeaderMap) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if forwarded.is_some() {
        return forwarded.map(str::to_string);
    }
    headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}
