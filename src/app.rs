use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    response::IntoResponse,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::{
    ServiceError,
    auth::{AuthBody, AuthSessions, AuthUser, LoginPayload, RefreshPayload, RegisterPayload},
    client::{self, ArcChannelService, WsChannelService},
    config::CONFIG,
    coordination::CoordinationState,
    invite::{ArcInviteService, InviteService, InviteServiceImpl},
    r#match::{ArcMatchService, MatchService, MatchServiceImpl, MatchStatus, RematchExpiryJob},
    persistence::{
        init_schema,
        matches::{ArcMatchRepository, SqliteMatchRepository},
        new_pool_from_env,
        players::{ArcPlayerRepository, SqlitePlayerRepository},
        ratings::{ArcRatingRepository, SqliteRatingRepository},
    },
    player::{ArcPlayerService, PlayerService, PlayerServiceImpl, PlayerUsername},
    pool::{ArcCharacterPool, InMemoryCharacterPool},
    rating::RatingEngine,
};

impl ServiceError {
    pub fn status_code(&self) -> axum::http::StatusCode {
        match self {
            ServiceError::Busy(_) => axum::http::StatusCode::CONFLICT,
            ServiceError::InvalidState(_) => axum::http::StatusCode::CONFLICT,
            ServiceError::NotFound(_) => axum::http::StatusCode::NOT_FOUND,
            ServiceError::Forbidden(_) => axum::http::StatusCode::FORBIDDEN,
            ServiceError::ResourceBusy(_) => axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            ServiceError::Validation(_) => axum::http::StatusCode::BAD_REQUEST,
            ServiceError::Unauthorized(_) => axum::http::StatusCode::UNAUTHORIZED,
            ServiceError::Internal(_) => axum::http::StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> axum::http::Response<axum::body::Body> {
        let status = self.status_code();
        let body = serde_json::json!({ "error": self.to_string() });
        (status, Json(body)).into_response()
    }
}

#[derive(Clone)]
pub struct AppState {
    pub players: ArcPlayerService,
    pub invites: ArcInviteService,
    pub matches: ArcMatchService,
    pub auth_sessions: Arc<AuthSessions>,
    pub ws: Arc<WsChannelService>,
    pub character_pool: Arc<InMemoryCharacterPool>,
}

pub fn build_state(db: crate::persistence::DbPool) -> AppState {
    let player_repository: ArcPlayerRepository =
        Arc::new(Box::new(SqlitePlayerRepository::new(db.clone())));
    let rating_repository: ArcRatingRepository =
        Arc::new(Box::new(SqliteRatingRepository::new(db.clone())));
    let match_repository: ArcMatchRepository =
        Arc::new(Box::new(SqliteMatchRepository::new(db)));

    let ws = Arc::new(WsChannelService::new());
    let channel: ArcChannelService = Arc::new(Box::new(ws.clone()));
    let coordination = Arc::new(CoordinationState::new());
    let character_pool = Arc::new(InMemoryCharacterPool::new());
    let pool_port: ArcCharacterPool = Arc::new(Box::new(character_pool.clone()));

    let players: ArcPlayerService = Arc::new(Box::new(PlayerServiceImpl::new(
        player_repository,
    )));
    let rating_engine = Arc::new(RatingEngine::new(
        rating_repository,
        CONFIG.lock_timeout(),
    ));
    let invites: ArcInviteService = Arc::new(Box::new(InviteServiceImpl::new(
        coordination.clone(),
        players.clone(),
        pool_port,
        match_repository.clone(),
        channel.clone(),
    )));
    let matches: ArcMatchService = Arc::new(Box::new(MatchServiceImpl::new(
        coordination.clone(),
        match_repository,
        channel.clone(),
        rating_engine,
    )));

    let expiry_job = RematchExpiryJob::new(coordination, channel, CONFIG.rematch_window());
    tokio::spawn(async move { expiry_job.run().await });

    AppState {
        players,
        invites,
        matches,
        auth_sessions: Arc::new(AuthSessions::new()),
        ws,
        character_pool,
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/auth/register", post(auth_register))
        .route("/auth/login", post(auth_login))
        .route("/auth/refresh", post(auth_refresh))
        .route("/matches/invite", post(match_invite))
        .route("/matches/accept", post(match_accept))
        .route("/matches/decline", post(match_decline))
        .route("/matches/cancel", post(match_cancel))
        .route("/matches/report", post(match_report))
        .route("/matches/confirm", post(match_confirm))
        .route("/matches/rematch", post(match_rematch))
        .route("/pool/checkin", post(pool_checkin))
        .route("/pool/checkout", post(pool_checkout))
        .route("/ws", get(client::ws_handler))
        .with_state(state)
}

pub async fn run() {
    std::env::var("LADDER_JWT_SECRET").expect("LADDER_JWT_SECRET must be set");

    let db = new_pool_from_env();
    init_schema(&db).expect("Failed to create schema");
    let state = build_state(db);

    log::info!(
        "Config: access token ttl {}ms, refresh ttl {}d, confirm window {}s, rematch window {}s, lock timeout {}ms",
        CONFIG.access_token_ttl_ms,
        CONFIG.refresh_token_ttl_days,
        CONFIG.confirm_window_secs,
        CONFIG.rematch_window_secs,
        CONFIG.lock_timeout_ms,
    );

    let host = std::env::var("LADDER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port = std::env::var("LADDER_PORT").unwrap_or_else(|_| "7350".to_string());
    let listener = tokio::net::TcpListener::bind(format!("{}:{}", host, port))
        .await
        .expect("Failed to bind listener");
    log::info!("Ladder server listening on {}:{}", host, port);

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .expect("Server error");

    log::info!("Ladder server shut down gracefully");
}

async fn auth_register(
    State(app): State<AppState>,
    Json(payload): Json<RegisterPayload>,
) -> Result<Json<AuthBody>, ServiceError> {
    payload
        .validate()
        .map_err(|e| ServiceError::Validation(e.to_string()))?;
    let player = app.players.register(&payload.username, &payload.password)?;
    Ok(Json(app.auth_sessions.issue(&player.username)))
}

async fn auth_login(
    State(app): State<AppState>,
    Json(payload): Json<LoginPayload>,
) -> Result<Json<AuthBody>, ServiceError> {
    let player = app
        .players
        .validate_login(&payload.username, &payload.password)?;
    Ok(Json(app.auth_sessions.issue(&player.username)))
}

async fn auth_refresh(
    State(app): State<AppState>,
    Json(payload): Json<RefreshPayload>,
) -> Result<Json<AuthBody>, ServiceError> {
    Ok(Json(app.auth_sessions.rotate(&payload.refresh_token)?))
}

#[derive(Deserialize)]
pub struct InvitePayload {
    pub challenger: PlayerUsername,
    pub target: PlayerUsername,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionBody {
    pub interaction_id: Uuid,
}

async fn match_invite(
    State(app): State<AppState>,
    _auth: AuthUser,
    Json(payload): Json<InvitePayload>,
) -> Result<Json<InteractionBody>, ServiceError> {
    let interaction_id = app
        .invites
        .invite(&payload.challenger, &payload.target)
        .await?;
    Ok(Json(InteractionBody { interaction_id }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InviteActionPayload {
    pub interaction_id: Uuid,
    pub challenger: PlayerUsername,
    pub opponent: PlayerUsername,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchStartedBody {
    pub match_id: String,
}

async fn match_accept(
    State(app): State<AppState>,
    _auth: AuthUser,
    Json(payload): Json<InviteActionPayload>,
) -> Result<Json<MatchStartedBody>, ServiceError> {
    let match_id = app
        .invites
        .accept(payload.interaction_id, &payload.challenger, &payload.opponent)
        .await?;
    Ok(Json(MatchStartedBody { match_id }))
}

async fn match_decline(
    State(app): State<AppState>,
    _auth: AuthUser,
    Json(payload): Json<InviteActionPayload>,
) -> Result<Json<serde_json::Value>, ServiceError> {
    app.invites
        .decline(payload.interaction_id, &payload.challenger, &payload.opponent)
        .await?;
    Ok(Json(serde_json::json!({})))
}

async fn match_cancel(
    State(app): State<AppState>,
    _auth: AuthUser,
    Json(payload): Json<InviteActionPayload>,
) -> Result<Json<serde_json::Value>, ServiceError> {
    app.invites
        .cancel(payload.interaction_id, &payload.challenger, &payload.opponent)
        .await?;
    Ok(Json(serde_json::json!({})))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportPayload {
    pub match_id: String,
    pub reporter: PlayerUsername,
    pub claimed_winner: PlayerUsername,
}

async fn match_report(
    State(app): State<AppState>,
    _auth: AuthUser,
    Json(payload): Json<ReportPayload>,
) -> Result<Json<serde_json::Value>, ServiceError> {
    app.matches
        .report(&payload.match_id, &payload.reporter, &payload.claimed_winner)
        .await?;
    Ok(Json(serde_json::json!({})))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmPayload {
    pub match_id: String,
    pub confirmer: PlayerUsername,
    pub claimed_winner: PlayerUsername,
}

async fn match_confirm(
    State(app): State<AppState>,
    _auth: AuthUser,
    Json(payload): Json<ConfirmPayload>,
) -> Result<Json<MatchStatus>, ServiceError> {
    let outcome = app
        .matches
        .confirm(&payload.match_id, &payload.confirmer, &payload.claimed_winner)
        .await?;
    Ok(Json(outcome))
}

#[derive(Deserialize)]
pub struct CheckinPayload {
    pub username: PlayerUsername,
    pub character: Option<String>,
}

async fn pool_checkin(
    State(app): State<AppState>,
    _auth: AuthUser,
    Json(payload): Json<CheckinPayload>,
) -> Result<Json<serde_json::Value>, ServiceError> {
    let Some(character) = payload.character else {
        return ServiceError::validation_err("Character is required");
    };
    app.character_pool.check_in(&payload.username, character);
    Ok(Json(serde_json::json!({})))
}

async fn pool_checkout(
    State(app): State<AppState>,
    _auth: AuthUser,
    Json(payload): Json<CheckinPayload>,
) -> Result<Json<serde_json::Value>, ServiceError> {
    app.character_pool.check_out(&payload.username);
    Ok(Json(serde_json::json!({})))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RematchPayload {
    pub match_id: String,
    pub responder: PlayerUsername,
    pub accept: bool,
}

async fn match_rematch(
    State(app): State<AppState>,
    _auth: AuthUser,
    Json(payload): Json<RematchPayload>,
) -> Result<Json<serde_json::Value>, ServiceError> {
    app.matches
        .rematch(&payload.match_id, &payload.responder, payload.accept)
        .await?;
    Ok(Json(serde_json::json!({})))
}
