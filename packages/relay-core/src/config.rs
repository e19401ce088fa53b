use std::{collections::HashMap, time::Duration};

use crate::models::{CredentialField, Provider};

pub const DEFAULT_SESSION_SECRET: &str = "dev-secret";
/** \brief 会话 Cookie 默认有效期：14 天。 */
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(14 * 24 * 60 * 60);
pub const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";
pub const ANTHROPIC_MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";

/**
 * \brief 固定上游地址，可通过环境变量覆盖（用于测试或自建网关）。
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderEndpoints {
    pub openai: String,
    pub anthropic: String,
}

impl Default for ProviderEndpoints {
    fn default() -> Self {
        Self {
            openai: OPENAI_CHAT_URL.to_string(),
            anthropic: ANTHROPIC_MESSAGES_URL.to_string(),
        }
    }
}

/**
 * \brief 启动时采集的 `{PROVIDER}_{FIELD}` 环境变量快照。
 */
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvDefaults {
    values: HashMap<String, String>,
}

impl EnvDefaults {
    /**
     * \brief 从进程环境读取全部 Provider × 字段组合。
     */
    pub fn capture() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut values = HashMap::new();
        for provider in Provider::ALL {
            for field in CredentialField::ALL {
                let name = field.env_var(provider);
                if let Some(value) = lookup(&name) {
                    values.insert(name, value);
                }
            }
        }
        Self { values }
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /**
     * \brief 读取某字段的环境默认值，空字符串视为缺失。
     */
    pub fn get(&self, provider: Provider, field: CredentialField) -> Option<&str> {
        self.values
            .get(&field.env_var(provider))
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }
}

/**
 * \brief 进程级配置，启动时构建一次并注入服务状态。
 */
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /** \brief 为 true 时环境变量优先于请求体。 */
    pub use_env_fallback: bool,
    pub session_secret: String,
    pub session_ttl: Duration,
    pub endpoints: ProviderEndpoints,
    pub env: EnvDefaults,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            use_env_fallback: false,
            session_secret: DEFAULT_SESSION_SECRET.to_string(),
            session_ttl: DEFAULT_SESSION_TTL,
            endpoints: ProviderEndpoints::default(),
            env: EnvDefaults::default(),
        }
    }
}

impl RelayConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /**
     * \brief 以任意查找函数构建配置，便于测试时不修改进程环境。
     */
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = ProviderEndpoints::default();
        let session_secret = match lookup("SESSION_SECRET").filter(|s| !s.is_empty()) {
            Some(secret) => secret,
            None => {
                tracing::warn!("SESSION_SECRET not set, falling back to the development secret");
                DEFAULT_SESSION_SECRET.to_string()
            }
        };
        let session_ttl = lookup("SESSION_TTL_SECS")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_SESSION_TTL);

        Self {
            use_env_fallback: lookup("USE_ENV_FALLBACK")
                .map(|v| parse_bool(&v))
                .unwrap_or(false),
            session_secret,
            session_ttl,
            endpoints: ProviderEndpoints {
                openai: lookup("OPENAI_CHAT_URL")
                    .filter(|v| !v.is_empty())
                    .unwrap_or(defaults.openai),
                anthropic: lookup("ANTHROPIC_MESSAGES_URL")
                    .filter(|v| !v.is_empty())
                    .unwrap_or(defaults.anthropic),
            },
            env: EnvDefaults::from_lookup(&lookup),
        }
    }
}

fn parse_bool(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn parses_boolean_flags() {
        for raw in ["true", "TRUE", "1", "yes", " on "] {
            assert!(parse_bool(raw), "{raw}");
        }
        for raw in ["false", "0", "", "nope"] {
            assert!(!parse_bool(raw), "{raw}");
        }
    }

    #[test]
    fn defaults_when_environment_is_empty() {
        let config = RelayConfig::from_lookup(|_| None);
        assert!(!config.use_env_fallback);
        assert_eq!(config.session_secret, DEFAULT_SESSION_SECRET);
        assert_eq!(config.session_ttl, DEFAULT_SESSION_TTL);
        assert_eq!(config.endpoints, ProviderEndpoints::default());
        assert_eq!(config.env, EnvDefaults::default());
    }

    #[test]
    fn reads_flags_endpoints_and_provider_defaults() {
        let config = RelayConfig::from_lookup(lookup_from(&[
            ("USE_ENV_FALLBACK", "true"),
            ("SESSION_SECRET", "s3cret"),
            ("SESSION_TTL_SECS", "60"),
            ("OPENAI_CHAT_URL", "http://localhost:9000/v1/chat/completions"),
            ("OPENAI_API_KEY", "env-openai-key"),
            ("DATABRICKS_API_URL", "https://ws.example/serving-endpoints/x/invocations"),
            ("UNRELATED", "ignored"),
        ]));
        assert!(config.use_env_fallback);
        assert_eq!(config.session_secret, "s3cret");
        assert_eq!(config.session_ttl, Duration::from_secs(60));
        assert_eq!(
            config.endpoints.openai,
            "http://localhost:9000/v1/chat/completions"
        );
        assert_eq!(config.endpoints.anthropic, ANTHROPIC_MESSAGES_URL);
        assert_eq!(
            config.env.get(Provider::OpenAI, CredentialField::ApiKey),
            Some("env-openai-key")
        );
        assert_eq!(
            config.env.get(Provider::Databricks, CredentialField::ApiUrl),
            Some("https://ws.example/serving-endpoints/x/invocations")
        );
        assert_eq!(config.env.get(Provider::Anthropic, CredentialField::ApiKey), None);
    }

    #[test]
    fn empty_environment_values_are_absent() {
        let env = EnvDefaults::from_pairs([("OPENAI_API_KEY", "")]);
        assert_eq!(env.get(Provider::OpenAI, CredentialField::ApiKey), None);
    }
}
