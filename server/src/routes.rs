use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::account::ResolveOutcome;
use crate::error::AppError;
use crate::state::State as AppState;

/// Identities are compared byte-for-byte everywhere, so normalize once at
/// the transport boundary.
fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[derive(Deserialize)]
pub struct SignupRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct SignupResponse {
    pub message: &'static str,
    pub token: String,
}

pub async fn signup_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SignupRequest>,
) -> Result<impl IntoResponse, AppError> {
    let email = normalize_email(&payload.email);
    if email.is_empty() || payload.username.is_empty() || payload.password.is_empty() {
        return Err(AppError::MalformedPayload);
    }

    let issued = state
        .confirmations
        .issue_signup(&email, &payload.username, &payload.password)
        .await?;

    Ok(Json(SignupResponse {
        message: "Verification email sent.",
        token: issued.token,
    }))
}

#[derive(Deserialize)]
pub struct TokenQuery {
    pub token: Option<String>,
}

pub async fn verify_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TokenQuery>,
) -> Result<impl IntoResponse, AppError> {
    let Some(token) = query.token else {
        return Err(AppError::MalformedPayload);
    };

    let outcome = state.confirmations.resolve(&token).await?;
    Ok(confirmation_page(outcome))
}

#[derive(Deserialize)]
pub struct ResetRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetResponse {
    pub message: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_version: Option<u64>,
}

pub async fn reset_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ResetRequest>,
) -> Result<impl IntoResponse, AppError> {
    let email = normalize_email(&payload.email);
    if email.is_empty() || payload.password.is_empty() {
        return Err(AppError::MalformedPayload);
    }

    let issued = state
        .confirmations
        .issue_reset(&email, &payload.password)
        .await?;

    let message = match issued.version {
        Some(_) => "Password reset email sent. Please check your inbox.",
        None => "If the email exists, a confirmation link has been sent.",
    };

    Ok(Json(ResetResponse {
        message,
        token_version: issued.version,
    }))
}

pub async fn verify_reset_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TokenQuery>,
) -> Result<impl IntoResponse, AppError> {
    let Some(token) = query.token else {
        return Err(AppError::MalformedPayload);
    };

    let outcome = state.confirmations.resolve(&token).await?;
    Ok(confirmation_page(outcome))
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct LoginResponse {
    pub message: &'static str,
    pub token: String,
}

pub async fn login_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let email = normalize_email(&payload.email);
    if email.is_empty() || payload.password.is_empty() {
        return Err(AppError::MalformedPayload);
    }

    match state.confirmations.login(&email, &payload.password).await? {
        Some(token) => Ok(Json(LoginResponse {
            message: "Login successful.",
            token,
        })),
        None => Err(AppError::InvalidCredentials),
    }
}

#[derive(Deserialize)]
pub struct VerifyStatusQuery {
    pub email: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyStatusResponse {
    pub is_verified: bool,
}

pub async fn verify_status_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<VerifyStatusQuery>,
) -> Result<impl IntoResponse, AppError> {
    let email = normalize_email(&query.email);

    let (status, is_verified) = match state.confirmations.is_verified(&email).await? {
        Some(verified) => (StatusCode::OK, verified),
        None => (StatusCode::NOT_FOUND, false),
    };

    Ok((status, Json(VerifyStatusResponse { is_verified })))
}

#[derive(Deserialize)]
pub struct ResetStatusQuery {
    pub email: String,
    #[serde(rename = "tokenVersion")]
    pub token_version: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetStatusResponse {
    pub reset_verified: bool,
}

pub async fn reset_status_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ResetStatusQuery>,
) -> Result<impl IntoResponse, AppError> {
    let email = normalize_email(&query.email);

    let (status, reset_verified) = match state
        .confirmations
        .reset_confirmed(&email, query.token_version)
        .await?
    {
        Some(confirmed) => (StatusCode::OK, confirmed),
        None => (StatusCode::NOT_FOUND, false),
    };

    Ok((status, Json(ResetStatusResponse { reset_verified })))
}

/// One static view per outcome. The mapping is exhaustive on purpose: the
/// match breaks if an outcome is ever added without a page.
fn confirmation_page(outcome: ResolveOutcome) -> (StatusCode, Html<String>) {
    let (status, title, message) = match outcome {
        ResolveOutcome::Verified => (
            StatusCode::OK,
            "Email Successfully Verified",
            "Signup successful! Please return to the app and log in to continue.",
        ),
        ResolveOutcome::AlreadyVerified => (
            StatusCode::OK,
            "Account Already Verified",
            "Your account has already been verified. Please return to the app and log in.",
        ),
        ResolveOutcome::Superseded => (
            StatusCode::OK,
            "Confirmation Link Replaced",
            "This link was replaced by a newer request and is no longer valid. \
             Please use the most recent email, or start over.",
        ),
        ResolveOutcome::ResetComplete => (
            StatusCode::OK,
            "Password Reset Successful",
            "Your password has been reset. You can now return to the app and log in.",
        ),
        ResolveOutcome::InvalidOrExpired => (
            StatusCode::BAD_REQUEST,
            "Invalid or Expired Token",
            "This confirmation link is invalid or has expired. Please request a new one.",
        ),
        ResolveOutcome::InvalidLink => (
            StatusCode::BAD_REQUEST,
            "Invalid Confirmation Link",
            "This confirmation link does not match any account. \
             Please request a new one or contact support.",
        ),
    };

    let body = format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="UTF-8">
  <meta name="viewport" content="width=device-width, initial-scale=1.0">
  <title>{title}</title>
</head>
<body style="font-family: system-ui, sans-serif; text-align: center; padding: 3rem 1rem;">
  <h1>{title}</h1>
  <p>{message}</p>
</body>
</html>"#
    );

    (status, Html(body))
}
