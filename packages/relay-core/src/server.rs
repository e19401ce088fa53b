use std::sync::Arc;

use anyhow::Result;
use axum::{
    body::Bytes,
    extract::{FromRequest, State},
    http::{header::SET_COOKIE, HeaderMap},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    config::RelayConfig,
    credentials::{CredentialResolver, CredentialSet},
    databricks,
    error::RelayError,
    llm,
    models::{ChatRequest, CredentialField, Provider},
    session::{self, SessionRegistry},
    telemetry,
};

/**
 * \brief 服务共享状态：配置、会话注册表与复用的出站 HTTP 客户端。
 */
pub struct AppState {
    pub config: RelayConfig,
    pub sessions: SessionRegistry,
    pub http: reqwest::Client,
}

impl AppState {
    pub fn new(config: RelayConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(llm::REQUEST_TIMEOUT)
            .build()?;
        let sessions = SessionRegistry::new(config.session_secret.clone(), config.session_ttl);
        Ok(Self {
            config,
            sessions,
            http,
        })
    }

    fn resolver(&self) -> CredentialResolver<'_> {
        CredentialResolver::new(&self.config.env, self.config.use_env_fallback)
    }
}

/**
 * \brief JSON 请求体提取器，解析失败时返回 `{"error": ...}`。
 */
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(RelayError))]
struct ApiJson<T>(T);

/**
 * \brief 构建路由。
 */
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/session/set_key", post(set_key))
        .route("/api/session/get_key", post(get_key))
        .route("/api/llm/openai", post(llm_openai))
        .route("/api/llm/anthropic", post(llm_anthropic))
        .route("/api/llm/databricks", post(llm_databricks))
        .route("/api/llm/databricks/models", get(databricks_models))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

/**
 * \brief 启动 HTTP 中继服务。
 * \param addr 监听地址，如 "127.0.0.1:8000"
 */
pub async fn run(addr: &str, config: RelayConfig) -> Result<()> {
    let use_env_fallback = config.use_env_fallback;
    let state = Arc::new(AppState::new(config)?);
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(use_env_fallback, "LLM relay listening on http://{}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

#[derive(Deserialize, Debug)]
struct LlmRequest {
    #[serde(flatten)]
    credentials: CredentialSet,
    #[serde(flatten)]
    chat: ChatRequest,
}

async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "config": { "use_env_fallback": state.config.use_env_fallback }
    }))
}

/**
 * \brief 读取请求中的 provider 字段；非字符串或缺失视为无效 Provider。
 */
fn provider_name(payload: &Value) -> &str {
    payload
        .get("provider")
        .and_then(Value::as_str)
        .unwrap_or_default()
}

/**
 * \brief 将凭据写入会话：POST /api/session/set_key
 */
async fn set_key(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ApiJson(payload): ApiJson<Value>,
) -> Result<(HeaderMap, Json<Value>), RelayError> {
    let name = provider_name(&payload);
    name.parse::<Provider>()?;
    let fields: CredentialSet = serde_json::from_value(payload.clone())
        .map_err(|e| RelayError::BadRequest(format!("invalid credentials: {}", e)))?;

    let mut session = state.sessions.open(&headers);
    let provider = session::set_credentials(&mut session, name, &fields)?;
    let written: Vec<&str> = CredentialField::ALL
        .iter()
        .filter(|f| fields.get(**f).is_some())
        .map(|f| f.as_str())
        .collect();
    telemetry::log_event(
        "server.session",
        &format!("store provider={} fields={:?}", provider, written),
    );

    let mut out = HeaderMap::new();
    if let Some(cookie) = state.sessions.save(session) {
        out.insert(SET_COOKIE, cookie);
    }
    Ok((out, Json(json!({ "success": true }))))
}

/**
 * \brief 读取会话中的凭据：POST /api/session/get_key
 */
async fn get_key(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ApiJson(payload): ApiJson<Value>,
) -> Result<Json<CredentialSet>, RelayError> {
    let provider: Provider = provider_name(&payload).parse()?;
    let session = state.sessions.open(&headers);
    Ok(Json(session::get_credentials(&session, provider)))
}

async fn llm_openai(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ApiJson(req): ApiJson<LlmRequest>,
) -> Result<Json<Value>, RelayError> {
    relay(&state, &headers, Provider::OpenAI, req).await
}

async fn llm_anthropic(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ApiJson(req): ApiJson<LlmRequest>,
) -> Result<Json<Value>, RelayError> {
    relay(&state, &headers, Provider::Anthropic, req).await
}

async fn llm_databricks(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ApiJson(req): ApiJson<LlmRequest>,
) -> Result<Json<Value>, RelayError> {
    relay(&state, &headers, Provider::Databricks, req).await
}

/**
 * \brief 解析凭据并转发聊天请求；凭据不全时不发起任何出站调用。
 */
async fn relay(
    state: &AppState,
    headers: &HeaderMap,
    provider: Provider,
    req: LlmRequest,
) -> Result<Json<Value>, RelayError> {
    let session = state.sessions.open(headers);
    let stored = session::get_credentials(&session, provider);
    let creds = state
        .resolver()
        .resolve(provider, &req.credentials, &stored)
        .inspect_err(|e| {
            telemetry::log_error("server.llm", &format!("provider={} {}", provider, e));
        })?;

    telemetry::log_event(
        "server.llm",
        &format!(
            "provider={} model={} msgs={}",
            provider,
            creds.model,
            req.chat.messages.len()
        ),
    );

    match llm::invoke(
        &state.http,
        provider,
        &creds,
        &req.chat,
        &state.config.endpoints,
    )
    .await
    {
        Ok(reply) => Ok(Json(reply)),
        Err(e) => {
            telemetry::log_error(
                "server.llm",
                &format!("provider={} status={} {}", provider, e.status(), e),
            );
            Err(e)
        }
    }
}

/**
 * \brief 列出 Databricks 服务端点：GET /api/llm/databricks/models
 */
async fn databricks_models(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, RelayError> {
    let supplied: CredentialSet = if body.iter().all(u8::is_ascii_whitespace) {
        CredentialSet::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| RelayError::BadRequest(format!("invalid JSON body: {}", e)))?
    };

    let session = state.sessions.open(&headers);
    let stored = session::get_credentials(&session, Provider::Databricks);
    let creds = state.resolver().resolve_fields(
        Provider::Databricks,
        &[CredentialField::ApiKey, CredentialField::ApiUrl],
        &supplied,
        &stored,
    )?;

    let models = databricks::list_models(
        &state.http,
        creds.get(CredentialField::ApiKey).unwrap_or_default(),
        creds.get(CredentialField::ApiUrl).unwrap_or_default(),
    )
    .await
    .inspect_err(|e| {
        telemetry::log_error("databricks.discovery", &format!("status={} {}", e.status(), e));
    })?;

    Ok(Json(json!({ "models": models })))
}
