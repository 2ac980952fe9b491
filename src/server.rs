//! HTTP server: the events corpus, the natural-language search endpoints and
//! the ambient health/metrics routes.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    http::{HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Extension, Router,
};
use chrono::Local;
use hyper::Server;
use serde_json::{json, Value};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

use crate::cache::CorpusCache;
use crate::config::Config;
use crate::domain::ChatTurn;
use crate::error::ScoutError;
use crate::llm::{ChatModel, ChatRequest};
use crate::observability;
use crate::rate_limit::{client_id_from_headers, RateLimitDecision, RateLimiter};
use crate::reconcile::{extract_filters, ExtractionRequest};

pub struct AppState {
    pub config: Config,
    pub cache: CorpusCache,
    pub limiter: RateLimiter,
    pub model: Option<Arc<dyn ChatModel>>,
}

/// Health check endpoint
async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "service": "event-scout",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn metrics() -> impl IntoResponse {
    observability::render_metrics()
}

/// The deduplicated, windowed corpus. A timed-out upstream gets its own
/// message so clients can tell "slow" from "down".
async fn get_events(Extension(state): Extension<Arc<AppState>>) -> Response {
    match state.cache.snapshot().await {
        Ok(corpus) => Json(json!({ "events": corpus.events })).into_response(),
        Err(ScoutError::FeedTimeout { seconds }) => {
            error!(seconds, "Events feed timed out");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "The events feed took too long to respond" })),
            )
                .into_response()
        }
        Err(err) => {
            error!(error = %err, "Events feed unavailable");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Failed to fetch events" })),
            )
                .into_response()
        }
    }
}

fn bad_request(message: &str) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
}

fn with_rate_limit_headers(mut response: Response, decision: &RateLimitDecision) -> Response {
    let headers = response.headers_mut();
    headers.insert("x-ratelimit-limit", HeaderValue::from(decision.limit));
    headers.insert("x-ratelimit-remaining", HeaderValue::from(decision.remaining));
    headers.insert("x-ratelimit-reset", HeaderValue::from(decision.reset_at / 1000));
    response
}

fn too_many_requests(decision: &RateLimitDecision) -> Response {
    observability::search::rate_limited();
    let retry_after_secs = decision
        .retry_after
        .map(|d| (d.as_millis() as u64).div_ceil(1000).max(1))
        .unwrap_or(1);
    let mut response = (
        StatusCode::TOO_MANY_REQUESTS,
        Json(json!({
            "error": "Too many requests. Please try again later.",
            "retryAfter": retry_after_secs,
        })),
    )
        .into_response();
    response
        .headers_mut()
        .insert("retry-after", HeaderValue::from(retry_after_secs));
    with_rate_limit_headers(response, decision)
}

fn string_list(value: &Value) -> Vec<String> {
    value
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|v| v.as_str())
        .map(str::to_string)
        .collect()
}

/// `chatContext` must be absent or an array of `{role, content}` turns.
fn parse_chat_context(value: &Value) -> Result<Vec<ChatTurn>, &'static str> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Array(_) => serde_json::from_value(value.clone())
            .map_err(|_| "chatContext entries must have a role of user/assistant and a string content"),
        _ => Err("chatContext must be an array"),
    }
}

async fn ai_search(
    Extension(state): Extension<Arc<AppState>>,
    headers: axum::http::HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    observability::search::request_received();

    let query = match body["query"].as_str().map(str::trim).filter(|q| !q.is_empty()) {
        Some(query) => query,
        None => return bad_request("A non-empty query string is required"),
    };
    let chat_context = match parse_chat_context(&body["chatContext"]) {
        Ok(context) => context,
        Err(message) => return bad_request(message),
    };
    let available_themes = string_list(&body["availableThemes"]);
    let available_categories = string_list(&body["availableCategories"]);

    let client = client_id_from_headers(&headers);
    let decision = state.limiter.check(&client);
    if !decision.allowed {
        info!(client = %client, "Search request rate limited");
        return too_many_requests(&decision);
    }

    let request = ExtractionRequest {
        query,
        available_themes: &available_themes,
        available_categories: &available_categories,
        chat_context: &chat_context,
    };

    let model = match &state.model {
        Some(model) => model,
        None => {
            // still hand back a usable keyword filter alongside the error
            warn!("Search requested but no language model is configured");
            let response = (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "error": "Search service is not configured",
                    "filters": crate::domain::ExtractedFilters::keyword_fallback(query),
                })),
            )
                .into_response();
            return with_rate_limit_headers(response, &decision);
        }
    };

    let extraction = extract_filters(model.as_ref(), &request, Local::now().date_naive()).await;

    let mut payload = json!({ "filters": extraction.filters });
    if let Some(text) = extraction.response {
        payload["response"] = Value::String(text);
    }
    with_rate_limit_headers(Json(payload).into_response(), &decision)
}

/// Deterministic sentence used whenever the model cannot produce one.
fn fallback_sentence(count: u64) -> String {
    match count {
        0 => "I couldn't find any events matching your criteria. Try adjusting your search."
            .to_string(),
        1 => "I found 1 event for you.".to_string(),
        n => format!("I found {n} events for you."),
    }
}

async fn ai_search_respond(
    Extension(state): Extension<Arc<AppState>>,
    headers: axum::http::HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let query = match body["query"].as_str().map(str::trim).filter(|q| !q.is_empty()) {
        Some(query) => query,
        None => return bad_request("A non-empty query string is required"),
    };
    if !body["eventSummaries"].is_array() {
        return bad_request("eventSummaries must be an array");
    }
    let summaries = string_list(&body["eventSummaries"]);
    let count = body["count"].as_u64().unwrap_or(summaries.len() as u64);

    let client = client_id_from_headers(&headers);
    let decision = state.limiter.check(&client);
    if !decision.allowed {
        return too_many_requests(&decision);
    }

    let sentence = match &state.model {
        Some(model) => {
            let request = ChatRequest {
                message: format!(
                    "The user searched for: \"{query}\". {count} events matched:\n{}\n\
                     Reply with exactly one short, friendly sentence summarizing the results. \
                     Do not list the events.",
                    summaries.join("\n")
                ),
                preamble: None,
                chat_history: Vec::new(),
                tools: Vec::new(),
                temperature: 0.3,
                max_tokens: 100,
            };
            match model.chat(request).await {
                Ok(reply) => reply.text.unwrap_or_else(|| fallback_sentence(count)),
                Err(err) => {
                    warn!(error = %err, "Summary generation failed, using template");
                    fallback_sentence(count)
                }
            }
        }
        None => fallback_sentence(count),
    };

    with_rate_limit_headers(
        Json(json!({ "response": sentence })).into_response(),
        &decision,
    )
}

/// Create the HTTP server with all routes
pub fn create_server(state: Arc<AppState>) -> Router {
    let cors = match state.config.server.allowed_origin.as_str() {
        "*" => CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST])
            .allow_headers(Any),
        origin => match origin.parse::<HeaderValue>() {
            Ok(origin) => CorsLayer::new()
                .allow_origin(origin)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers(Any),
            Err(_) => {
                warn!(origin, "Unparsable allowed_origin, falling back to any origin");
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods([Method::GET, Method::POST])
                    .allow_headers(Any)
            }
        },
    };

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/api/events", get(get_events))
        .route("/api/ai-search", post(ai_search))
        .route("/api/ai-search/respond", post(ai_search_respond))
        .layer(Extension(state))
        .layer(ServiceBuilder::new().layer(cors))
}

/// Start the HTTP server on the specified port
pub async fn start_server(state: Arc<AppState>, port: u16) -> anyhow::Result<()> {
    let app = create_server(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    info!(%addr, "HTTP server listening");
    println!("🚀 HTTP server running on http://localhost:{port}");
    println!("💚 Health check: http://localhost:{port}/health");
    println!("📅 Events:       http://localhost:{port}/api/events");
    println!("🔎 Search:       POST http://localhost:{port}/api/ai-search");

    Server::bind(&addr).serve(app.into_make_service()).await?;

    Ok(())
}
