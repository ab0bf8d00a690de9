use crate::{ApiError, ApiResult, AppState};
use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    Json,
};
use bloom_common::{Interaction, QueryCategory, UserProfile};
use bloom_agent::OrchestratorReply;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

pub const DEFAULT_HISTORY_PAGE: usize = 20;
pub const MAX_HISTORY_PAGE: usize = 100;

const ENDPOINTS: [(&str, &str); 9] = [
    ("chat", "POST /chat - General queries routed through the orchestrator"),
    ("basicquery", "POST /basicquery - Basic questions about menopause"),
    ("consultation", "POST /consultation - Symptom and wellness consultation"),
    ("exercise", "POST /exercise - Exercise and movement guidance"),
    ("diet", "POST /diet - Nutrition guidance"),
    ("profile", "POST /profile - Register or update a user profile"),
    ("history", "GET /history/:user_id - Recent interactions for a user"),
    ("clear_history", "DELETE /history/:user_id - Remove a user's interactions"),
    ("health", "GET /health - Health check"),
];

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub query: Option<String>,
    pub user_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub user_id: String,
    pub query: String,
    pub response: String,
    pub category: QueryCategory,
    pub status: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct DirectRequest {
    pub query: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DirectResponse {
    pub query: String,
    pub response: String,
    pub category: QueryCategory,
    pub status: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct ProfileRequest {
    pub user_id: Option<String>,
    pub profile: Option<UserProfile>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub user_id: String,
    pub interactions: Vec<Interaction>,
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub message: &'static str,
    pub available_endpoints: BTreeMap<&'static str, &'static str>,
    pub cors_enabled: bool,
    pub frontend_url: String,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        message: "Bloom backend is running",
        available_endpoints: ENDPOINTS.into_iter().collect(),
        cors_enabled: !state.cors_origins.is_empty(),
        frontend_url: state.frontend_url.clone(),
    })
}

/// Route the query to whichever agent fits it best.
pub async fn chat(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> ApiResult<Json<ChatResponse>> {
    let (query, user_id) = user_query(payload)?;
    let reply = state
        .orchestrator
        .run_categorization_pipeline(&query, &user_id)
        .await?;
    Ok(Json(chat_response(reply, user_id)))
}

pub async fn basic_query(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> ApiResult<Json<ChatResponse>> {
    let (query, user_id) = user_query(payload)?;
    let reply = state.orchestrator.run_basic_query_agent(&query, &user_id).await?;
    Ok(Json(chat_response(reply, user_id)))
}

pub async fn consultation(
    State(state): State<AppState>,
    payload: Result<Json<DirectRequest>, JsonRejection>,
) -> ApiResult<Json<DirectResponse>> {
    direct(state, QueryCategory::Consultation, payload).await
}

pub async fn exercise(
    State(state): State<AppState>,
    payload: Result<Json<DirectRequest>, JsonRejection>,
) -> ApiResult<Json<DirectResponse>> {
    direct(state, QueryCategory::Exercise, payload).await
}

pub async fn diet(
    State(state): State<AppState>,
    payload: Result<Json<DirectRequest>, JsonRejection>,
) -> ApiResult<Json<DirectResponse>> {
    direct(state, QueryCategory::Diet, payload).await
}

pub async fn register_profile(
    State(state): State<AppState>,
    payload: Result<Json<ProfileRequest>, JsonRejection>,
) -> ApiResult<Json<StatusResponse>> {
    let Json(request) = payload?;
    let (Some(user_id), Some(profile)) = (request.user_id, request.profile) else {
        return Err(ApiError::BadRequest(
            "Request must include \"user_id\" and \"profile\"".to_string(),
        ));
    };

    state.orchestrator.register_profile(&user_id, profile).await?;
    Ok(Json(StatusResponse {
        status: "success",
        message: format!("Profile saved for user {}", user_id.trim()),
    }))
}

pub async fn history(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    params: Result<Query<HistoryParams>, QueryRejection>,
) -> ApiResult<Json<HistoryResponse>> {
    let Query(params) = params?;
    let limit = params
        .limit
        .unwrap_or(DEFAULT_HISTORY_PAGE)
        .clamp(1, MAX_HISTORY_PAGE);
    let interactions = state.orchestrator.history(&user_id, limit).await?;

    Ok(Json(HistoryResponse {
        user_id,
        interactions,
        status: "success",
    }))
}

pub async fn clear_history(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> ApiResult<Json<StatusResponse>> {
    let removed = state.orchestrator.clear_history(&user_id).await?;
    Ok(Json(StatusResponse {
        status: "success",
        message: format!("Removed {} interactions for user {}", removed, user_id),
    }))
}

fn user_query(payload: Result<Json<ChatRequest>, JsonRejection>) -> ApiResult<(String, String)> {
    let Json(request) = payload?;
    match (request.query, request.user_id) {
        (Some(query), Some(user_id)) => Ok((query, user_id)),
        _ => Err(ApiError::BadRequest(
            "Request must include \"query\" and \"user_id\"".to_string(),
        )),
    }
}

fn chat_response(reply: OrchestratorReply, user_id: String) -> ChatResponse {
    ChatResponse {
        user_id: reply.user_id.unwrap_or(user_id),
        query: reply.query,
        response: reply.response,
        category: reply.category,
        status: "success",
    }
}

async fn direct(
    state: AppState,
    category: QueryCategory,
    payload: Result<Json<DirectRequest>, JsonRejection>,
) -> ApiResult<Json<DirectResponse>> {
    let Json(request) = payload?;
    let query = request
        .query
        .ok_or_else(|| ApiError::BadRequest("No query provided".to_string()))?;

    let reply = state.orchestrator.run_direct(category, &query).await?;
    info!("Answered direct {} query", category);

    Ok(Json(DirectResponse {
        query: reply.query,
        response: reply.response,
        category: reply.category,
        status: "success",
    }))
}
