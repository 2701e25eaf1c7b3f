use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    extract::{Path, Query, State, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use notify::{HttpRelayNotifier, LogNotifier, Notifier};
use serde::Deserialize;
use server_api::{cases, directory, identity, invites, messages, ApiContext, TokenService};
use shared::{
    domain::{CaseId, ClientId, MessageId, UserId},
    error::{ApiError, ErrorCode},
    protocol::{
        AddParticipantClientRequest, AddParticipantUserRequest, CaseDetail, CaseSummary,
        ClientSummary, CreateCaseRequest, CreateClientRequest, InviteClientRequest,
        InviteResponse, MessagePayload, ParticipantClientSummary, ParticipantUserSummary,
        PermissionSummary, RegisterViaInviteRequest, RegisterViaInviteResponse, ServerEvent,
        TokenResponse, UpdateCaseRequest, UpdateClientRequest, UserSummary,
    },
};
use storage::Storage;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod app_state;
mod auth;
mod config;
mod realtime;

use app_state::AppState;
use auth::AuthIdentity;
use config::{load_settings, prepare_database_url, DEV_JWT_SECRET};
use realtime::RealtimeHub;

type HttpResult<T> = Result<T, (StatusCode, Json<ApiError>)>;

const MAX_BODY_BYTES: usize = 64 * 1024;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListCasesQuery {
    client_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    token: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = load_settings();
    if settings.jwt_secret == DEV_JWT_SECRET {
        warn!("using the built-in development JWT secret; set APP__JWT_SECRET in production");
    }

    let database_url = prepare_database_url(&settings.database_url)?;
    let storage = Storage::new(&database_url).await.map_err(|error| {
        error!(
            %database_url,
            %error,
            "failed to open SQLite database; verify parent directory exists and permissions are correct"
        );
        error
    })?;

    let notifier: Arc<dyn Notifier> = match settings.notify_relay_url.as_deref() {
        Some(endpoint) => {
            info!(%endpoint, "notifications go through the HTTP relay");
            Arc::new(HttpRelayNotifier::new(endpoint, &settings.email_from)?)
        }
        None => {
            info!("no notification relay configured; notifications are only logged");
            Arc::new(LogNotifier)
        }
    };

    let invite_ttl = chrono::Duration::try_hours(settings.invite_ttl_hours).ok_or_else(|| {
        anyhow::anyhow!("invite ttl of {}h is out of range", settings.invite_ttl_hours)
    })?;
    let api = ApiContext::new(
        storage,
        TokenService::new(settings.jwt_secret.clone(), settings.token_ttl_seconds),
        notifier,
        Duration::from_secs(settings.notification_grace_seconds),
    )
    .with_client_url(settings.client_url.clone())
    .with_invite_ttl(invite_ttl);

    let state = AppState {
        api,
        hub: RealtimeHub::new(),
    };
    let app = build_router(Arc::new(state));

    let addr: SocketAddr = settings.server_bind.parse()?;
    info!(%addr, "server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/auth/refresh", post(http_refresh_token))
        .route("/cases", get(http_list_cases).post(http_create_case))
        .route(
            "/cases/:case_id",
            get(http_get_case)
                .put(http_update_case)
                .delete(http_delete_case),
        )
        .route(
            "/cases/:case_id/participants/users",
            post(http_add_participant_user),
        )
        .route(
            "/cases/:case_id/participants/clients",
            post(http_add_participant_client),
        )
        .route("/messages/cases/:case_id", get(http_list_case_messages))
        .route("/messages/:message_id/viewed", put(http_mark_viewed))
        .route(
            "/api/cases/:lawsuit_id/invite-client",
            post(http_invite_client),
        )
        .route("/api/register/invite", post(http_register_via_invite))
        .route("/permissions", get(http_list_permissions))
        .route("/users", get(http_list_users))
        .route("/users/:user_id", get(http_get_user))
        .route("/clients", get(http_list_clients).post(http_create_client))
        .route(
            "/clients/:client_id",
            get(http_get_client)
                .put(http_update_client)
                .delete(http_delete_client),
        )
        .route("/ws", get(ws_handler))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .with_state(state)
}

pub(crate) fn error_response(err: ApiError) -> (StatusCode, Json<ApiError>) {
    let status = match err.code {
        ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorCode::Forbidden => StatusCode::FORBIDDEN,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Conflict => StatusCode::CONFLICT,
        ErrorCode::Validation => StatusCode::BAD_REQUEST,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(err))
}

async fn healthz(State(state): State<Arc<AppState>>) -> HttpResult<&'static str> {
    state.api.storage.health_check().await.map_err(|e| {
        error!(error = %e, "health check failed");
        error_response(ApiError::new(ErrorCode::Internal, "storage unavailable"))
    })?;
    Ok("ok")
}

async fn http_refresh_token(
    State(state): State<Arc<AppState>>,
    AuthIdentity(identity): AuthIdentity,
) -> HttpResult<Json<TokenResponse>> {
    let token = identity::refresh_token(&state.api, &identity)
        .await
        .map_err(error_response)?;
    Ok(Json(token))
}

async fn http_list_cases(
    State(state): State<Arc<AppState>>,
    AuthIdentity(identity): AuthIdentity,
    Query(q): Query<ListCasesQuery>,
) -> HttpResult<Json<Vec<CaseSummary>>> {
    let cases = cases::list_cases(&state.api, &identity, q.client_id.map(ClientId))
        .await
        .map_err(error_response)?;
    Ok(Json(cases))
}

async fn http_create_case(
    State(state): State<Arc<AppState>>,
    AuthIdentity(identity): AuthIdentity,
    Json(req): Json<CreateCaseRequest>,
) -> HttpResult<(StatusCode, Json<CaseDetail>)> {
    let case = cases::create_case(&state.api, &identity, &req)
        .await
        .map_err(error_response)?;
    Ok((StatusCode::CREATED, Json(case)))
}

async fn http_get_case(
    State(state): State<Arc<AppState>>,
    AuthIdentity(identity): AuthIdentity,
    Path(case_id): Path<i64>,
) -> HttpResult<Json<CaseDetail>> {
    let case = cases::get_case(&state.api, &identity, CaseId(case_id))
        .await
        .map_err(error_response)?;
    Ok(Json(case))
}

async fn http_update_case(
    State(state): State<Arc<AppState>>,
    AuthIdentity(identity): AuthIdentity,
    Path(case_id): Path<i64>,
    Json(req): Json<UpdateCaseRequest>,
) -> HttpResult<Json<CaseSummary>> {
    let case = cases::update_case(&state.api, &identity, CaseId(case_id), &req)
        .await
        .map_err(error_response)?;
    Ok(Json(case))
}

async fn http_delete_case(
    State(state): State<Arc<AppState>>,
    AuthIdentity(identity): AuthIdentity,
    Path(case_id): Path<i64>,
) -> HttpResult<StatusCode> {
    cases::delete_case(&state.api, &identity, CaseId(case_id))
        .await
        .map_err(error_response)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn http_add_participant_user(
    State(state): State<Arc<AppState>>,
    AuthIdentity(identity): AuthIdentity,
    Path(case_id): Path<i64>,
    Json(req): Json<AddParticipantUserRequest>,
) -> HttpResult<(StatusCode, Json<Vec<ParticipantUserSummary>>)> {
    let participants = cases::add_participant_user(&state.api, &identity, CaseId(case_id), &req)
        .await
        .map_err(error_response)?;
    Ok((StatusCode::CREATED, Json(participants)))
}

async fn http_add_participant_client(
    State(state): State<Arc<AppState>>,
    AuthIdentity(identity): AuthIdentity,
    Path(case_id): Path<i64>,
    Json(req): Json<AddParticipantClientRequest>,
) -> HttpResult<(StatusCode, Json<Vec<ParticipantClientSummary>>)> {
    let participants =
        cases::add_participant_client(&state.api, &identity, CaseId(case_id), &req)
            .await
            .map_err(error_response)?;
    Ok((StatusCode::CREATED, Json(participants)))
}

async fn http_list_case_messages(
    State(state): State<Arc<AppState>>,
    AuthIdentity(identity): AuthIdentity,
    Path(case_id): Path<i64>,
) -> HttpResult<Json<Vec<MessagePayload>>> {
    let history = messages::list_case_messages(&state.api, &identity, CaseId(case_id))
        .await
        .map_err(error_response)?;
    Ok(Json(history))
}

async fn http_mark_viewed(
    State(state): State<Arc<AppState>>,
    AuthIdentity(identity): AuthIdentity,
    Path(message_id): Path<i64>,
) -> HttpResult<Json<MessagePayload>> {
    let message_id = MessageId(message_id);
    let outcome = messages::mark_viewed(&state.api, &identity, message_id)
        .await
        .map_err(error_response)?;
    if outcome.transitioned {
        state.hub.send_to_users(
            identity.tenant_id,
            &outcome.notify_users,
            ServerEvent::MessageViewed(message_id),
        );
    }
    Ok(Json(outcome.message))
}

async fn http_invite_client(
    State(state): State<Arc<AppState>>,
    AuthIdentity(identity): AuthIdentity,
    Path(lawsuit_id): Path<i64>,
    Json(req): Json<InviteClientRequest>,
) -> HttpResult<(StatusCode, Json<InviteResponse>)> {
    let invite = invites::invite_client(&state.api, &identity, CaseId(lawsuit_id), &req)
        .await
        .map_err(error_response)?;
    Ok((StatusCode::CREATED, Json(invite)))
}

async fn http_register_via_invite(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterViaInviteRequest>,
) -> HttpResult<(StatusCode, Json<RegisterViaInviteResponse>)> {
    let registered = invites::register_via_invite(&state.api, &req)
        .await
        .map_err(error_response)?;
    Ok((StatusCode::CREATED, Json(registered)))
}

async fn http_list_permissions(
    State(state): State<Arc<AppState>>,
    AuthIdentity(identity): AuthIdentity,
) -> HttpResult<Json<Vec<PermissionSummary>>> {
    let permissions = directory::list_permissions(&state.api, &identity)
        .await
        .map_err(error_response)?;
    Ok(Json(permissions))
}

async fn http_list_users(
    State(state): State<Arc<AppState>>,
    AuthIdentity(identity): AuthIdentity,
) -> HttpResult<Json<Vec<UserSummary>>> {
    let users = directory::list_users(&state.api, &identity)
        .await
        .map_err(error_response)?;
    Ok(Json(users))
}

async fn http_get_user(
    State(state): State<Arc<AppState>>,
    AuthIdentity(identity): AuthIdentity,
    Path(user_id): Path<i64>,
) -> HttpResult<Json<UserSummary>> {
    let user = directory::get_user(&state.api, &identity, UserId(user_id))
        .await
        .map_err(error_response)?;
    Ok(Json(user))
}

async fn http_list_clients(
    State(state): State<Arc<AppState>>,
    AuthIdentity(identity): AuthIdentity,
) -> HttpResult<Json<Vec<ClientSummary>>> {
    let clients = directory::list_clients(&state.api, &identity)
        .await
        .map_err(error_response)?;
    Ok(Json(clients))
}

async fn http_create_client(
    State(state): State<Arc<AppState>>,
    AuthIdentity(identity): AuthIdentity,
    Json(req): Json<CreateClientRequest>,
) -> HttpResult<(StatusCode, Json<ClientSummary>)> {
    let client = directory::create_client(&state.api, &identity, &req)
        .await
        .map_err(error_response)?;
    Ok((StatusCode::CREATED, Json(client)))
}

async fn http_get_client(
    State(state): State<Arc<AppState>>,
    AuthIdentity(identity): AuthIdentity,
    Path(client_id): Path<i64>,
) -> HttpResult<Json<ClientSummary>> {
    let client = directory::get_client(&state.api, &identity, ClientId(client_id))
        .await
        .map_err(error_response)?;
    Ok(Json(client))
}

async fn http_update_client(
    State(state): State<Arc<AppState>>,
    AuthIdentity(identity): AuthIdentity,
    Path(client_id): Path<i64>,
    Json(req): Json<UpdateClientRequest>,
) -> HttpResult<Json<ClientSummary>> {
    let client = directory::update_client(&state.api, &identity, ClientId(client_id), &req)
        .await
        .map_err(error_response)?;
    Ok(Json(client))
}

async fn http_delete_client(
    State(state): State<Arc<AppState>>,
    AuthIdentity(identity): AuthIdentity,
    Path(client_id): Path<i64>,
) -> HttpResult<StatusCode> {
    directory::delete_client(&state.api, &identity, ClientId(client_id))
        .await
        .map_err(error_response)?;
    Ok(StatusCode::NO_CONTENT)
}

/// The token is checked before the upgrade so a bad handshake is refused with 401.
async fn ws_handler(
    ws: Option<WebSocketUpgrade>,
    State(state): State<Arc<AppState>>,
    Query(q): Query<WsQuery>,
) -> HttpResult<Response> {
    let token = q
        .token
        .as_deref()
        .filter(|token| !token.is_empty())
        .ok_or_else(|| error_response(ApiError::unauthorized("missing token")))?;
    let identity = state.api.tokens.verify(token).map_err(error_response)?;
    let Some(ws) = ws else {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ApiError::new(
                ErrorCode::Validation,
                "websocket upgrade required",
            )),
        ));
    };
    Ok(ws
        .on_upgrade(move |socket| realtime::ws_connection(state, socket, identity))
        .into_response())
}

#[cfg(test)]
#[path = "tests/support.rs"]
mod test_support;

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
