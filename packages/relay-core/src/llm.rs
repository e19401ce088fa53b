use std::time::Duration;

use axum::http::StatusCode;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde_json::{json, Value};

use crate::{
    config::ProviderEndpoints,
    credentials::ResolvedCredentials,
    error::RelayError,
    models::{ChatRequest, CredentialField, Provider},
};

const ANTHROPIC_VERSION: &str = "2023-06-01";

/** \brief 单次上游调用超时。 */
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/**
 * \brief 已准备好的上游请求，构造后仅使用一次。
 */
#[derive(Debug, Clone)]
pub struct ResolvedCall {
    pub url: String,
    pub headers: HeaderMap,
    pub body: Value,
}

/**
 * \brief 将归一化请求转换为对应 Provider 的线上格式。
 */
pub fn build_request(
    provider: Provider,
    creds: &ResolvedCredentials,
    chat: &ChatRequest,
    endpoints: &ProviderEndpoints,
) -> Result<ResolvedCall, RelayError> {
    match provider {
        Provider::OpenAI => build_openai(creds, chat, &endpoints.openai),
        Provider::Anthropic => build_anthropic(creds, chat, &endpoints.anthropic),
        Provider::Databricks => build_databricks(creds, chat),
    }
}

/**
 * \brief 解析上游成功响应；三家均原样返回 JSON。
 */
pub fn parse_response(provider: Provider, raw: &[u8]) -> Result<Value, RelayError> {
    serde_json::from_slice(raw).map_err(|e| {
        RelayError::Internal(format!("invalid {} response: {}", provider.as_str(), e))
    })
}

/**
 * \brief 发送请求；非 2xx 转为 `Upstream`，其余失败转为 `Internal`。
 */
pub async fn send(client: &reqwest::Client, call: ResolvedCall) -> Result<Vec<u8>, RelayError> {
    let resp = client
        .post(call.url)
        .headers(call.headers)
        .json(&call.body)
        .timeout(REQUEST_TIMEOUT)
        .send()
        .await?;

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await?;
        return Err(upstream_error(status.as_u16(), body));
    }
    Ok(resp.bytes().await?.to_vec())
}

/**
 * \brief 构造、发送并解析一次聊天调用。
 */
pub async fn invoke(
    client: &reqwest::Client,
    provider: Provider,
    creds: &ResolvedCredentials,
    chat: &ChatRequest,
    endpoints: &ProviderEndpoints,
) -> Result<Value, RelayError> {
    let call = build_request(provider, creds, chat, endpoints)?;
    let raw = send(client, call).await?;
    parse_response(provider, &raw)
}

pub(crate) fn upstream_error(status: u16, body: String) -> RelayError {
    match StatusCode::from_u16(status) {
        Ok(status) => RelayError::Upstream { status, body },
        Err(_) => RelayError::Internal(format!("upstream returned status {}: {}", status, body)),
    }
}

fn build_openai(
    creds: &ResolvedCredentials,
    chat: &ChatRequest,
    url: &str,
) -> Result<ResolvedCall, RelayError> {
    let mut headers = HeaderMap::new();
    headers.insert(AUTHORIZATION, bearer(&creds.api_key)?);
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    Ok(ResolvedCall {
        url: url.to_string(),
        headers,
        body: json!({
            "model": creds.model,
            "messages": chat.messages,
            "max_tokens": chat.max_tokens,
            "temperature": chat.temperature,
        }),
    })
}

fn build_anthropic(
    creds: &ResolvedCredentials,
    chat: &ChatRequest,
    url: &str,
) -> Result<ResolvedCall, RelayError> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert("x-api-key", header_value(&creds.api_key)?);
    headers.insert(
        "anthropic-version",
        HeaderValue::from_static(ANTHROPIC_VERSION),
    );

    Ok(ResolvedCall {
        url: url.to_string(),
        headers,
        body: json!({
            "model": creds.model,
            "max_tokens": chat.max_tokens,
            "temperature": chat.temperature,
            "messages": chat.messages,
        }),
    })
}

fn build_databricks(
    creds: &ResolvedCredentials,
    chat: &ChatRequest,
) -> Result<ResolvedCall, RelayError> {
    let url = creds
        .api_url
        .as_deref()
        .filter(|u| !u.is_empty())
        .ok_or(RelayError::MissingCredential {
            field: CredentialField::ApiUrl,
            message: Provider::Databricks.missing_credentials_message(),
        })?;

    let mut headers = HeaderMap::new();
    headers.insert(AUTHORIZATION, bearer(&creds.api_key)?);
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    Ok(ResolvedCall {
        url: url.to_string(),
        headers,
        body: json!({
            "model": creds.model,
            "messages": chat.messages,
            "max_tokens": chat.max_tokens,
            "temperature": chat.temperature,
        }),
    })
}

pub(crate) fn bearer(api_key: &str) -> Result<HeaderValue, RelayError> {
    header_value(&format!("Bearer {}", api_key))
}

fn header_value(raw: &str) -> Result<HeaderValue, RelayError> {
    HeaderValue::from_str(raw)
        .map_err(|_| RelayError::BadRequest("API key contains invalid characters".to_string()))
}

/**
 * \brief 从原始响应中提取回复文本，供 CLI 展示。
 */
pub fn extract_text(provider: Provider, v: &Value) -> String {
    match provider {
        Provider::OpenAI => extract_openai_content(v),
        Provider::Anthropic => extract_anthropic_content(v),
        Provider::Databricks => extract_databricks_content(v),
    }
}

fn extract_openai_content(v: &Value) -> String {
    v.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .unwrap_or("")
        .to_string()
}

fn extract_anthropic_content(v: &Value) -> String {
    v.get("content")
        .and_then(|arr| arr.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|item| item.get("text").and_then(|t| t.as_str()))
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default()
}

// Databricks 端点可能返回 chat、completion 或 predictions 三种结构。
fn extract_databricks_content(v: &Value) -> String {
    let chat = extract_openai_content(v);
    if !chat.is_empty() {
        return chat;
    }
    let first_choice_text = v
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("text"))
        .and_then(|t| t.as_str());
    let prediction = v
        .get("predictions")
        .and_then(|p| p.get(0))
        .and_then(|p| p.as_str());
    let result = v.get("result").and_then(|r| r.as_str());
    first_choice_text
        .or(prediction)
        .or(result)
        .unwrap_or("")
        .to_string()
}
