//! HTTP surface of the authenticator. Tokens travel in cookies; every reply
//! body is JSON except the QR image.
use crate::accounts;
use crate::auth::{self, LoginOutcome, TokenPair};
use crate::errors::{ApiMessage, AuthError};
use crate::qr;
use crate::session::{self, SessionCookies};
use crate::settings::Settings;
use crate::tokens::{AccessClaims, TokenKeys};
use axum::body::Body;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{FromRequest, FromRequestParts, Query, State};
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE, SET_COOKIE};
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{AppendHeaders, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use miette::IntoDiagnostic;
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Deserializer};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub db: DatabaseConnection,
    pub tokens: TokenKeys,
}

impl AppState {
    pub fn new(settings: Settings, db: DatabaseConnection, tokens: TokenKeys) -> Self {
        Self {
            settings: Arc::new(settings),
            db,
            tokens,
        }
    }
}

// Security headers middleware
async fn security_headers(request: Request<Body>, next: Next) -> impl IntoResponse {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();

    headers.insert(
        HeaderName::from_static("x-frame-options"),
        HeaderValue::from_static("DENY"),
    );
    headers.insert(
        HeaderName::from_static("x-content-type-options"),
        HeaderValue::from_static("nosniff"),
    );
    // Nothing here is meant to load sub-resources or be framed
    headers.insert(
        HeaderName::from_static("content-security-policy"),
        HeaderValue::from_static("default-src 'none'; frame-ancestors 'none'"),
    );
    headers.insert(
        HeaderName::from_static("referrer-policy"),
        HeaderValue::from_static("no-referrer"),
    );
    headers.insert(
        HeaderName::from_static("permissions-policy"),
        HeaderValue::from_static("geolocation=(), microphone=(), camera=()"),
    );

    response
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/authorize", post(authorize))
        .route("/auth/2fa", post(two_factor))
        .route("/auth/refresh", get(refresh))
        .route("/auth/logout", get(logout))
        .route("/user/settings/me", get(user_settings))
        .route("/user/settings/enable-2fa", post(enable_two_factor))
        .route("/user/settings/disable-2fa", post(disable_two_factor))
        .route("/user/settings/change-password", post(change_password))
        .route("/totp/verify-code", get(verify_code))
        .route("/totp/totp-qr", get(totp_qr))
        .layer(middleware::from_fn(security_headers))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(
    settings: Settings,
    db: DatabaseConnection,
    tokens: TokenKeys,
) -> miette::Result<()> {
    let state = AppState::new(settings, db, tokens);

    let addr: SocketAddr = format!(
        "{}:{}",
        state.settings.server.host, state.settings.server.port
    )
    .parse()
    .map_err(|e| miette::miette!("bad listen addr: {e}"))?;

    let app = router(state.clone());

    tracing::info!(%addr, base_url = %state.settings.base_url(), "Authenticator listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .into_diagnostic()?;
    axum::serve(listener, app).await.into_diagnostic()?;
    Ok(())
}

/// Caller identified by a valid `access-token` cookie with a live session.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub AccessClaims);

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = SessionCookies::from_headers(&parts.headers)
            .access_token
            .ok_or_else(auth::invalid_access_token)?;
        let claims = auth::authenticate_access(&state.db, &state.tokens, &token).await?;
        Ok(CurrentUser(claims))
    }
}

/// `Json` body whose rejection renders as the usual `{status,message}` 400.
pub struct ApiJson<T>(pub T);

impl<T, S> FromRequest<S> for ApiJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request(req: Request<Body>, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection| AuthError::BadRequest(rejection.body_text()))?;
        Ok(ApiJson(value))
    }
}

/// `Query` whose rejection renders as the usual `{status,message}` 400.
pub struct ApiQuery<T>(pub T);

impl<T, S> FromRequestParts<S> for ApiQuery<T>
where
    Query<T>: FromRequestParts<S, Rejection = QueryRejection>,
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(value) = Query::<T>::from_request_parts(parts, state)
            .await
            .map_err(|rejection| AuthError::BadRequest(rejection.body_text()))?;
        Ok(ApiQuery(value))
    }
}

/// Missing and `null` string fields read as empty, leaving the checks to the services.
fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

fn message(status: StatusCode, text: &str) -> Response {
    (status, Json(ApiMessage::new(status, text))).into_response()
}

fn session_cookies(
    state: &AppState,
    pair: &TokenPair,
) -> AppendHeaders<[(HeaderName, String); 2]> {
    AppendHeaders([
        (
            SET_COOKIE,
            session::access_cookie_header(
                &state.settings,
                &pair.access_token,
                state.tokens.access_ttl(),
            ),
        ),
        (
            SET_COOKIE,
            session::refresh_cookie_header(
                &state.settings,
                &pair.refresh_token,
                state.tokens.refresh_ttl(),
            ),
        ),
    ])
}

/// 201 with both token cookies and the tokens echoed in the body.
fn session_response(state: &AppState, pair: &TokenPair) -> Response {
    let cookies = session_cookies(state, pair);
    let body = json!({
        "status": StatusCode::CREATED.as_u16(),
        "message": "Session created",
        "id": pair.user_id,
        "access_token": pair.access_token,
        "refresh_token": pair.refresh_token,
    });
    (StatusCode::CREATED, cookies, Json(body)).into_response()
}

#[derive(Debug, Deserialize)]
struct CredentialsBody {
    #[serde(default, deserialize_with = "null_as_empty")]
    username: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    password: String,
}

/// POST /auth/register
async fn register(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<CredentialsBody>,
) -> Result<Response, AuthError> {
    let user = accounts::register(&state.db, &body.username, &body.password).await?;
    let reply = json!({
        "status": StatusCode::CREATED.as_u16(),
        "message": "User created",
        "id": user.id,
    });
    Ok((StatusCode::CREATED, Json(reply)).into_response())
}

/// POST /auth/authorize
async fn authorize(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<CredentialsBody>,
) -> Result<Response, AuthError> {
    match auth::login(&state.db, &state.tokens, &body.username, &body.password).await? {
        LoginOutcome::Session(pair) => Ok(session_response(&state, &pair)),
        LoginOutcome::TwoFactorRequired {
            user_id,
            challenge_token,
        } => {
            let reply = json!({
                "status": StatusCode::OK.as_u16(),
                "message": "2FA required",
                "id": user_id,
                "two_fa_required": true,
                "challenge_token": challenge_token,
            });
            Ok((StatusCode::OK, Json(reply)).into_response())
        }
    }
}

#[derive(Debug, Deserialize)]
struct TwoFactorBody {
    #[serde(default, deserialize_with = "null_as_empty")]
    challenge_token: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    code: String,
}

/// POST /auth/2fa
async fn two_factor(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<TwoFactorBody>,
) -> Result<Response, AuthError> {
    let pair = auth::complete_two_factor(
        &state.db,
        &state.tokens,
        &state.settings.totp,
        &body.challenge_token,
        &body.code,
    )
    .await?;
    Ok(session_response(&state, &pair))
}

/// GET /auth/refresh
async fn refresh(State(state): State<AppState>, headers: HeaderMap) -> Result<Response, AuthError> {
    let token = SessionCookies::from_headers(&headers)
        .refresh_token
        .ok_or_else(auth::unauthorized)?;
    let pair = auth::refresh_session(&state.db, &state.tokens, &token).await?;
    Ok(session_response(&state, &pair))
}

/// GET /auth/logout
async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(claims) = SessionCookies::from_headers(&headers)
        .access_token
        .and_then(|token| state.tokens.validate_access(&token))
    {
        if let Err(e) = auth::end_session(&state.db, &claims.session_id).await {
            tracing::error!(error = %e, session_id = %claims.session_id, "failed to delete session");
        }
    }

    let [access, refresh] = session::clear_cookie_headers(&state.settings);
    (
        StatusCode::OK,
        AppendHeaders([(SET_COOKIE, access), (SET_COOKIE, refresh)]),
        Json(ApiMessage::new(StatusCode::OK, "Logged out")),
    )
        .into_response()
}

/// GET /user/settings/me
async fn user_settings(
    State(state): State<AppState>,
    CurrentUser(claims): CurrentUser,
) -> Result<Json<accounts::UserSettings>, AuthError> {
    Ok(Json(accounts::settings(&state.db, &claims.user_id).await?))
}

/// POST /user/settings/enable-2fa
async fn enable_two_factor(
    State(state): State<AppState>,
    CurrentUser(claims): CurrentUser,
) -> Result<Response, AuthError> {
    accounts::enable_two_factor(&state.db, &state.settings.totp, &claims.user_id).await?;
    Ok(message(StatusCode::OK, "2FA enabled"))
}

/// POST /user/settings/disable-2fa
async fn disable_two_factor(
    State(state): State<AppState>,
    CurrentUser(claims): CurrentUser,
) -> Result<Response, AuthError> {
    accounts::disable_two_factor(&state.db, &claims.user_id).await?;
    Ok(message(StatusCode::OK, "2FA disabled"))
}

#[derive(Debug, Deserialize)]
struct ChangePasswordBody {
    #[serde(default, deserialize_with = "null_as_empty")]
    old_password: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    new_password: String,
}

/// POST /user/settings/change-password
///
/// Every session of the user is revoked; the caller gets a fresh one.
async fn change_password(
    State(state): State<AppState>,
    CurrentUser(claims): CurrentUser,
    ApiJson(body): ApiJson<ChangePasswordBody>,
) -> Result<Response, AuthError> {
    accounts::change_password(
        &state.db,
        &claims.user_id,
        &body.old_password,
        &body.new_password,
    )
    .await?;

    auth::end_all_sessions(&state.db, &claims.user_id).await?;
    let pair = auth::create_session(&state.db, &state.tokens, &claims.user_id).await?;

    let cookies = session_cookies(&state, &pair);
    Ok((
        StatusCode::OK,
        cookies,
        Json(ApiMessage::new(StatusCode::OK, "Password changed")),
    )
        .into_response())
}

#[derive(Debug, Deserialize)]
struct VerifyCodeQuery {
    #[serde(default)]
    code: String,
}

/// GET /totp/verify-code?code=
async fn verify_code(
    State(state): State<AppState>,
    CurrentUser(claims): CurrentUser,
    ApiQuery(q): ApiQuery<VerifyCodeQuery>,
) -> Result<Response, AuthError> {
    if accounts::verify_totp(&state.db, &state.settings.totp, &claims.user_id, &q.code).await? {
        Ok(message(StatusCode::OK, "Code verified"))
    } else {
        Err(auth::invalid_code())
    }
}

#[derive(Debug, Deserialize)]
struct QrQuery {
    size: Option<i64>,
}

impl QrQuery {
    /// Absent or non-positive sizes fall back to `default`.
    fn size_or(&self, default: u32) -> u32 {
        match self.size {
            Some(size) if size > 0 => u32::try_from(size).unwrap_or(u32::MAX),
            _ => default,
        }
    }
}

/// GET /totp/totp-qr?size=
async fn totp_qr(
    State(state): State<AppState>,
    CurrentUser(claims): CurrentUser,
    ApiQuery(q): ApiQuery<QrQuery>,
) -> Result<Response, AuthError> {
    let uri = accounts::totp_uri(&state.db, &state.settings.totp, &claims.user_id).await?;
    let png = qr::generate_png(&uri, q.size_or(state.settings.totp.qr_size))?;
    Ok((
        StatusCode::OK,
        [
            (CONTENT_TYPE, "image/png"),
            (CACHE_CONTROL, "no-store, no-cache, must-revalidate, max-age=0"),
        ],
        png,
    )
        .into_response())
}
