use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::RelayError;

/**
 * \brief 支持的上游模型服务。
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    OpenAI,
    Anthropic,
    Databricks,
}

impl Provider {
    pub const ALL: [Provider; 3] = [Provider::OpenAI, Provider::Anthropic, Provider::Databricks];

    /**
     * \brief 路由与会话键中使用的小写名称。
     */
    pub fn as_str(self) -> &'static str {
        match self {
            Provider::OpenAI => "openai",
            Provider::Anthropic => "anthropic",
            Provider::Databricks => "databricks",
        }
    }

    /**
     * \brief 环境变量前缀，如 `OPENAI`。
     */
    pub fn env_prefix(self) -> &'static str {
        match self {
            Provider::OpenAI => "OPENAI",
            Provider::Anthropic => "ANTHROPIC",
            Provider::Databricks => "DATABRICKS",
        }
    }

    /**
     * \brief 请求体与会话均未提供模型时使用的默认模型。
     */
    pub fn default_model(self) -> &'static str {
        match self {
            Provider::OpenAI => "gpt-3.5-turbo",
            Provider::Anthropic => "claude-3-opus-20240229",
            Provider::Databricks => "dbrx-instruct",
        }
    }

    /**
     * \brief 发起调用前必须解析出的凭据字段。
     */
    pub fn required_fields(self) -> &'static [CredentialField] {
        match self {
            Provider::OpenAI | Provider::Anthropic => {
                &[CredentialField::ApiKey, CredentialField::Model]
            }
            Provider::Databricks => &[
                CredentialField::ApiKey,
                CredentialField::ApiUrl,
                CredentialField::Model,
            ],
        }
    }

    pub fn missing_credentials_message(self) -> &'static str {
        match self {
            Provider::OpenAI | Provider::Anthropic => "API key is required",
            Provider::Databricks => "API key and API URL are required",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "openai" => Ok(Provider::OpenAI),
            "anthropic" => Ok(Provider::Anthropic),
            "databricks" => Ok(Provider::Databricks),
            _ => Err(RelayError::InvalidProvider),
        }
    }
}

/**
 * \brief 凭据字段，线上名称为 `apiKey` / `model` / `apiUrl`。
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CredentialField {
    ApiKey,
    Model,
    ApiUrl,
}

impl CredentialField {
    pub const ALL: [CredentialField; 3] = [
        CredentialField::ApiKey,
        CredentialField::Model,
        CredentialField::ApiUrl,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CredentialField::ApiKey => "apiKey",
            CredentialField::Model => "model",
            CredentialField::ApiUrl => "apiUrl",
        }
    }

    /**
     * \brief 环境变量后缀，与前缀拼接为 `OPENAI_API_KEY` 等。
     */
    pub fn env_suffix(self) -> &'static str {
        match self {
            CredentialField::ApiKey => "API_KEY",
            CredentialField::Model => "MODEL",
            CredentialField::ApiUrl => "API_URL",
        }
    }

    /**
     * \brief 对应的环境变量名。
     */
    pub fn env_var(self, provider: Provider) -> String {
        format!("{}_{}", provider.env_prefix(), self.env_suffix())
    }
}

impl fmt::Display for CredentialField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/**
 * \brief 消息结构，与 OpenAI Chat 消息格式对齐。
 *
 * `content` 可以是字符串或内容块数组；`name`、`tool_call_id` 等其余字段原样转发。
 */
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /** \brief 角色：system/user/assistant */
    pub role: String,
    /** \brief 内容 */
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub content: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Message {
    /**
     * \brief 构造纯文本消息。
     */
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: Value::String(content.into()),
            extra: Map::new(),
        }
    }
}

pub const DEFAULT_MAX_TOKENS: u32 = 1000;
pub const DEFAULT_TEMPERATURE: f64 = 0.7;

/**
 * \brief 归一化后的聊天请求。
 */
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
}

impl ChatRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
        }
    }
}

fn default_max_tokens() -> u32 {
    DEFAULT_MAX_TOKENS
}

fn default_temperature() -> f64 {
    DEFAULT_TEMPERATURE
}

/**
 * \brief Databricks 服务端点描述。
 */
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    /** \brief 端点是否就绪 */
    pub status: bool,
    pub config: Value,
    /** \brief 调用地址：`{workspace}/serving-endpoints/{name}/invocations` */
    pub url: String,
}
