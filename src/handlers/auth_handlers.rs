//! HTTP handlers for sign-in, sign-up and sign-out.
//!
//! The identity provider announces every change on its session stream, which
//! the drive follows. Handlers also apply the change directly so the session
//! is ready by the time the response is sent.

use crate::{errors::AppError, models::principal::Principal, services::identity::AuthFlow, state::AppState};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct SignInReq {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct SignUpReq {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub display_name: String,
}

#[derive(Debug, Deserialize)]
pub struct ProviderReq {
    pub provider: Option<String>,
}

#[derive(Serialize)]
pub struct SessionResp {
    pub principal: Principal,
    pub display_name: String,
    pub initial: Option<char>,
}

impl From<Principal> for SessionResp {
    fn from(principal: Principal) -> Self {
        Self {
            display_name: principal.label(),
            initial: principal.initial(),
            principal,
        }
    }
}

/// POST `/api/auth/sign-in`
pub async fn sign_in(
    State(state): State<AppState>,
    Json(req): Json<SignInReq>,
) -> Result<Json<SessionResp>, AppError> {
    let principal = state
        .identity
        .sign_in(&req.email, &req.password)
        .await
        .map_err(|err| AppError::auth(err, AuthFlow::SignIn))?;
    state.drive.on_session_changed(Some(principal.clone())).await?;
    Ok(Json(principal.into()))
}

/// POST `/api/auth/sign-up` — creates the account and signs it in.
pub async fn sign_up(
    State(state): State<AppState>,
    Json(req): Json<SignUpReq>,
) -> Result<impl IntoResponse, AppError> {
    let principal = state
        .identity
        .sign_up(&req.email, &req.password, &req.display_name)
        .await
        .map_err(|err| AppError::auth(err, AuthFlow::SignUp))?;
    state.drive.on_session_changed(Some(principal.clone())).await?;
    Ok((StatusCode::CREATED, Json(SessionResp::from(principal))))
}

/// POST `/api/auth/provider`
pub async fn sign_in_with_provider(
    State(state): State<AppState>,
    Json(req): Json<ProviderReq>,
) -> Result<Json<SessionResp>, AppError> {
    let provider = req.provider.unwrap_or_else(|| "google".into());
    let principal = state
        .identity
        .sign_in_with_provider(&provider)
        .await
        .map_err(|err| AppError::auth(err, AuthFlow::Provider))?;
    state.drive.on_session_changed(Some(principal.clone())).await?;
    Ok(Json(principal.into()))
}

/// POST `/api/auth/sign-out`
pub async fn sign_out(State(state): State<AppState>) -> Result<StatusCode, AppError> {
    state
        .identity
        .sign_out()
        .await
        .map_err(|err| AppError::auth(err, AuthFlow::SignIn))?;
    state.drive.on_session_changed(None).await?;
    Ok(StatusCode::NO_CONTENT)
}
