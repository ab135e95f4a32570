// REST API endpoints for the identity service

use axum::{
    Router,
    extract::{FromRequestParts, Path, State},
    http::{StatusCode, request::Parts},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::account::IdentityService;
use crate::auth::{AuthError, SessionContext};
use crate::db::ProfileUpdate;
use crate::types::{SchoolId, SchoolRole};

pub type AppState = Arc<IdentityService>;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/email-verification/check", post(check_email_token))
        .route("/auth/email-verification", post(complete_email_verification))
        .route("/auth/forgot-password", post(forgot_password))
        .route("/auth/reset-password", post(reset_password))
        .route("/me", get(profile).put(update_profile))
        .route("/schools", get(list_schools).post(create_school))
        .route("/schools/{school_id}/switch", post(switch_school))
        .route("/schools/{school_id}/invitations", post(invite))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

/// Error body: `{"error": code, "message": text}`.
#[derive(Debug)]
pub struct ApiError(AuthError);

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.0.code(),
            "message": self.0.to_string(),
        }));
        (self.0.status_code(), body).into_response()
    }
}

/// Verified caller identity, taken from the `Authorization` header.
pub struct Authenticated(pub SessionContext);

impl FromRequestParts<AppState> for Authenticated {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string())
        };

        let authorization = header(http::header::AUTHORIZATION.as_str());
        let ip_address = header("X-Forwarded-For").or_else(|| header("X-Real-IP"));
        let user_agent = header(http::header::USER_AGENT.as_str());

        let ctx = state
            .extractor()
            .extract(authorization.as_deref(), ip_address, user_agent)?;
        Ok(Self(ctx))
    }
}

#[derive(Deserialize)]
struct RegisterRequest {
    email: String,
    name: String,
    password: String,
}

#[derive(Deserialize)]
struct LoginRequest {
    email: String,
    password: String,
}

#[derive(Deserialize)]
struct EmailTokenRequest {
    email: String,
    token: String,
}

#[derive(Deserialize)]
struct CompleteVerificationRequest {
    email: String,
    token: String,
    name: Option<String>,
    password: String,
}

#[derive(Deserialize)]
struct ForgotPasswordRequest {
    email: String,
}

#[derive(Deserialize)]
struct ResetPasswordRequest {
    email: String,
    token: String,
    password: String,
}

#[derive(Deserialize)]
struct CreateSchoolRequest {
    name: String,
    level: Option<String>,
}

#[derive(Deserialize)]
struct InviteRequest {
    emails: Vec<String>,
    role: SchoolRole,
}

async fn health_check() -> Result<Json<Value>, StatusCode> {
    Ok(Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    })))
}

fn session_body(state: &AppState, token: String) -> Json<Value> {
    Json(json!({
        "token": token,
        "token_type": "Bearer",
        "expires_in": state.session_validity().as_secs(),
    }))
}

async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let user = state.register(&req.email, &req.name, &req.password).await?;
    Ok((StatusCode::CREATED, Json(json!({ "user": user }))))
}

async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<Value>, ApiError> {
    let token = state.login(&req.email, &req.password).await?;
    Ok(session_body(&state, token))
}

async fn check_email_token(
    State(state): State<AppState>,
    Json(req): Json<EmailTokenRequest>,
) -> Result<Json<Value>, ApiError> {
    state.check_email_token(&req.email, &req.token).await?;
    Ok(Json(json!({ "status": "ok" })))
}

async fn complete_email_verification(
    State(state): State<AppState>,
    Json(req): Json<CompleteVerificationRequest>,
) -> Result<Json<Value>, ApiError> {
    let user = state
        .complete_email_verification(&req.email, &req.token, req.name.as_deref(), &req.password)
        .await?;
    Ok(Json(json!({ "user": user })))
}

async fn forgot_password(
    State(state): State<AppState>,
    Json(req): Json<ForgotPasswordRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    state.request_password_reset(&req.email).await?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "status": "ok" }))))
}

async fn reset_password(
    State(state): State<AppState>,
    Json(req): Json<ResetPasswordRequest>,
) -> Result<Json<Value>, ApiError> {
    state
        .complete_password_reset(&req.email, &req.token, &req.password)
        .await?;
    Ok(Json(json!({ "status": "ok" })))
}

async fn profile(
    State(state): State<AppState>,
    Authenticated(ctx): Authenticated,
) -> Result<Json<Value>, ApiError> {
    let user = state.profile(&ctx).await?;
    Ok(Json(json!({
        "user": user,
        "school_id": ctx.school_id(),
        "role": ctx.role(),
    })))
}

async fn update_profile(
    State(state): State<AppState>,
    Authenticated(ctx): Authenticated,
    Json(update): Json<ProfileUpdate>,
) -> Result<Json<Value>, ApiError> {
    let user = state.update_profile(&ctx, &update).await?;
    Ok(Json(json!({ "user": user })))
}

async fn list_schools(
    State(state): State<AppState>,
    Authenticated(ctx): Authenticated,
) -> Result<Json<Value>, ApiError> {
    let schools = state.list_schools(&ctx).await?;
    Ok(Json(json!({
        "schools": schools,
        "count": schools.len(),
    })))
}

async fn create_school(
    State(state): State<AppState>,
    Authenticated(ctx): Authenticated,
    Json(req): Json<CreateSchoolRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let school = state
        .create_school(&ctx, &req.name, req.level.as_deref())
        .await?;
    Ok((StatusCode::CREATED, Json(json!({ "school": school }))))
}

async fn switch_school(
    State(state): State<AppState>,
    Authenticated(ctx): Authenticated,
    Path(school_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let token = state
        .switch_school(&ctx, &SchoolId::new(school_id))
        .await?;
    Ok(session_body(&state, token))
}

async fn invite(
    State(state): State<AppState>,
    Authenticated(ctx): Authenticated,
    Path(school_id): Path<String>,
    Json(req): Json<InviteRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let outcome = state
        .invite(&ctx, &SchoolId::new(school_id), &req.emails, req.role)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(json!(outcome))))
}
