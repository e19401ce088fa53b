use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::{error::RelayError, llm, models::ModelInfo, telemetry};

/** \brief 端点发现接口的单次超时。 */
pub const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(30);

const SERVING_ENDPOINTS: &str = "/serving-endpoints";

#[derive(Debug, Deserialize)]
struct EndpointList {
    #[serde(default)]
    endpoints: Vec<EndpointSummary>,
}

#[derive(Debug, Deserialize)]
struct EndpointSummary {
    name: String,
    #[serde(default)]
    state: EndpointState,
}

#[derive(Debug, Default, Deserialize)]
struct EndpointState {
    #[serde(default)]
    ready: Value,
}

impl EndpointState {
    // 接口以 "READY"/"NOT_READY" 表示就绪状态，旧版返回布尔值。
    fn is_ready(&self) -> bool {
        match &self.ready {
            Value::Bool(b) => *b,
            Value::String(s) => s.eq_ignore_ascii_case("ready"),
            _ => false,
        }
    }
}

/**
 * \brief 由调用地址推导工作区根地址：在 `/serving-endpoints` 处截断。
 */
pub fn workspace_base(api_url: &str) -> &str {
    let base = match api_url.find(SERVING_ENDPOINTS) {
        Some(idx) => &api_url[..idx],
        None => api_url,
    };
    base.trim_end_matches('/')
}

/**
 * \brief 列出工作区所有服务端点及其调用地址。
 *
 * 先请求端点列表，再逐个顺序请求详情；任一请求失败即整体失败，不返回部分结果。
 */
pub async fn list_models(
    client: &reqwest::Client,
    api_key: &str,
    api_url: &str,
) -> Result<Vec<ModelInfo>, RelayError> {
    let workspace = workspace_base(api_url);
    let auth = llm::bearer(api_key)?;

    let list: EndpointList = get_json(
        client,
        &format!("{}/api/2.0/serving-endpoints", workspace),
        &auth,
    )
    .await?;
    telemetry::log_event(
        "databricks.discovery",
        &format!("workspace={} endpoints={}", workspace, list.endpoints.len()),
    );

    let mut models = Vec::with_capacity(list.endpoints.len());
    for endpoint in list.endpoints {
        let details: Value = get_json(
            client,
            &format!("{}/api/2.0/serving-endpoints/{}", workspace, endpoint.name),
            &auth,
        )
        .await?;
        let config = details
            .get("config")
            .cloned()
            .unwrap_or_else(|| Value::Object(Default::default()));

        models.push(ModelInfo {
            url: format!(
                "{}/serving-endpoints/{}/invocations",
                workspace, endpoint.name
            ),
            status: endpoint.state.is_ready(),
            kind: "serving-endpoint".to_string(),
            name: endpoint.name,
            config,
        });
    }
    Ok(models)
}

async fn get_json<T: serde::de::DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
    auth: &reqwest::header::HeaderValue,
) -> Result<T, RelayError> {
    let resp = client
        .get(url)
        .header(reqwest::header::AUTHORIZATION, auth.clone())
        .header(reqwest::header::CONTENT_TYPE, "application/json")
        .timeout(DISCOVERY_TIMEOUT)
        .send()
        .await?;
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await?;
        return Err(llm::upstream_error(status.as_u16(), body));
    }
    let raw = resp.bytes().await?;
    serde_json::from_slice(&raw)
        .map_err(|e| RelayError::Internal(format!("invalid serving-endpoints response: {}", e)))
}
