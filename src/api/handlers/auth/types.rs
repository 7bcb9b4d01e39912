//! Request/response types for auth endpoints.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct RefreshRequest {
    #[serde(rename = "refreshToken")]
    pub refresh_token: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct LogoutRequest {
    #[serde(rename = "refreshToken")]
    pub refresh_token: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct GoogleLoginRequest {
    #[serde(rename = "idToken")]
    pub id_token: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct TokenResponse {
    #[serde(rename = "accessToken")]
    pub access_token: String,
    #[serde(rename = "refreshToken")]
    pub refresh_token: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ErrorResponse {
    pub error: String,
}
