use serde::{Deserialize, Serialize};

use crate::{
    config::EnvDefaults,
    error::RelayError,
    models::{CredentialField, Provider},
};

/**
 * \brief 凭据字段集合，可能不完整；序列化时省略缺失字段。
 */
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialSet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
}

impl CredentialSet {
    pub fn get(&self, field: CredentialField) -> Option<&str> {
        match field {
            CredentialField::ApiKey => self.api_key.as_deref(),
            CredentialField::Model => self.model.as_deref(),
            CredentialField::ApiUrl => self.api_url.as_deref(),
        }
    }

    pub fn set(&mut self, field: CredentialField, value: String) {
        let slot = match field {
            CredentialField::ApiKey => &mut self.api_key,
            CredentialField::Model => &mut self.model,
            CredentialField::ApiUrl => &mut self.api_url,
        };
        *slot = Some(value);
    }

    /**
     * \brief 读取非空字段值。
     */
    fn non_empty(&self, field: CredentialField) -> Option<&str> {
        self.get(field).filter(|v| !v.is_empty())
    }
}

/**
 * \brief 已完整解析的凭据，仅在所有必需字段齐备时构造。
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCredentials {
    pub api_key: String,
    pub model: String,
    /** \brief 仅 Databricks 需要 */
    pub api_url: Option<String>,
}

/**
 * \brief 凭据解析器，持有启动时的环境快照与优先级开关。
 *
 * 每个字段的生效顺序：
 * - 默认模式：请求体、会话、`{PROVIDER}_{FIELD}` 环境变量、Provider 默认模型；
 * - 环境优先模式（`USE_ENV_FALLBACK`）：环境变量、请求体、会话、Provider 默认模型。
 *
 * 任一来源的空字符串均视为缺失。
 */
#[derive(Debug, Clone, Copy)]
pub struct CredentialResolver<'a> {
    env: &'a EnvDefaults,
    env_first: bool,
}

impl<'a> CredentialResolver<'a> {
    pub fn new(env: &'a EnvDefaults, env_first: bool) -> Self {
        Self { env, env_first }
    }

    /**
     * \brief 解析指定 Provider 的全部必需字段。
     * \param request 请求体携带的字段
     * \param stored  会话中保存的字段
     */
    pub fn resolve(
        &self,
        provider: Provider,
        request: &CredentialSet,
        stored: &CredentialSet,
    ) -> Result<ResolvedCredentials, RelayError> {
        let set = self.resolve_fields(provider, provider.required_fields(), request, stored)?;
        match (set.api_key, set.model) {
            (Some(api_key), Some(model)) => Ok(ResolvedCredentials {
                api_key,
                model,
                api_url: set.api_url,
            }),
            (None, _) => Err(missing(provider, CredentialField::ApiKey)),
            (_, None) => Err(missing(provider, CredentialField::Model)),
        }
    }

    /**
     * \brief 解析任意字段子集；任一字段缺失即失败。
     */
    pub fn resolve_fields(
        &self,
        provider: Provider,
        fields: &[CredentialField],
        request: &CredentialSet,
        stored: &CredentialSet,
    ) -> Result<CredentialSet, RelayError> {
        let mut out = CredentialSet::default();
        for &field in fields {
            let value = self
                .resolve_field(provider, field, request, stored)
                .ok_or_else(|| missing(provider, field))?;
            out.set(field, value);
        }
        Ok(out)
    }

    fn resolve_field(
        &self,
        provider: Provider,
        field: CredentialField,
        request: &CredentialSet,
        stored: &CredentialSet,
    ) -> Option<String> {
        let from_env = self.env.get(provider, field);
        let supplied = request.non_empty(field).or_else(|| stored.non_empty(field));

        let value = if self.env_first {
            from_env.or(supplied)
        } else {
            supplied.or(from_env)
        };

        match value {
            Some(v) => Some(v.to_string()),
            None if field == CredentialField::Model => Some(provider.default_model().to_string()),
            None => None,
        }
    }
}

fn missing(provider: Provider, field: CredentialField) -> RelayError {
    RelayError::MissingCredential {
        field,
        message: provider.missing_credentials_message(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds(api_key: Option<&str>, model: Option<&str>, api_url: Option<&str>) -> CredentialSet {
        CredentialSet {
            api_key: api_key.map(str::to_string),
            model: model.map(str::to_string),
            api_url: api_url.map(str::to_string),
        }
    }

    #[test]
    fn request_body_beats_session_and_environment() {
        let env = EnvDefaults::from_pairs([("OPENAI_API_KEY", "env-key")]);
        let resolver = CredentialResolver::new(&env, false);
        let resolved = resolver
            .resolve(
                Provider::OpenAI,
                &creds(Some("body-key"), None, None),
                &creds(Some("session-key"), Some("gpt-4"), None),
            )
            .unwrap();
        assert_eq!(resolved.api_key, "body-key");
        assert_eq!(resolved.model, "gpt-4");
    }

    #[test]
    fn session_then_environment_fill_gaps() {
        let env = EnvDefaults::from_pairs([("ANTHROPIC_API_KEY", "env-key")]);
        let resolver = CredentialResolver::new(&env, false);

        let from_session = resolver
            .resolve(
                Provider::Anthropic,
                &CredentialSet::default(),
                &creds(Some("session-key"), None, None),
            )
            .unwrap();
        assert_eq!(from_session.api_key, "session-key");

        let from_env = resolver
            .resolve(Provider::Anthropic, &CredentialSet::default(), &CredentialSet::default())
            .unwrap();
        assert_eq!(from_env.api_key, "env-key");
    }

    #[test]
    fn env_first_mode_prefers_environment() {
        let env = EnvDefaults::from_pairs([("OPENAI_API_KEY", "env-openai-key")]);
        let resolver = CredentialResolver::new(&env, true);

        let omitted = resolver
            .resolve(Provider::OpenAI, &CredentialSet::default(), &CredentialSet::default())
            .unwrap();
        assert_eq!(omitted.api_key, "env-openai-key");

        let supplied = resolver
            .resolve(
                Provider::OpenAI,
                &creds(Some("body-key"), None, None),
                &CredentialSet::default(),
            )
            .unwrap();
        assert_eq!(supplied.api_key, "env-openai-key");
    }

    #[test]
    fn env_first_mode_falls_back_to_request() {
        let env = EnvDefaults::default();
        let resolver = CredentialResolver::new(&env, true);
        let resolved = resolver
            .resolve(
                Provider::OpenAI,
                &creds(Some("body-key"), None, None),
                &CredentialSet::default(),
            )
            .unwrap();
        assert_eq!(resolved.api_key, "body-key");
    }

    #[test]
    fn env_first_mode_uses_session_when_environment_unset() {
        let env = EnvDefaults::default();
        let resolver = CredentialResolver::new(&env, true);
        let resolved = resolver
            .resolve(
                Provider::OpenAI,
                &CredentialSet::default(),
                &creds(Some("session-key"), Some("gpt-4"), None),
            )
            .unwrap();
        assert_eq!(resolved.api_key, "session-key");
        assert_eq!(resolved.model, "gpt-4");
    }

    #[test]
    fn env_first_mode_keeps_body_ahead_of_session() {
        let env = EnvDefaults::from_pairs([("OPENAI_MODEL", "env-model")]);
        let resolver = CredentialResolver::new(&env, true);
        let resolved = resolver
            .resolve(
                Provider::OpenAI,
                &creds(Some("body-key"), Some("body-model"), None),
                &creds(Some("session-key"), Some("session-model"), None),
            )
            .unwrap();
        assert_eq!(resolved.api_key, "body-key");
        assert_eq!(resolved.model, "env-model");
    }

    #[test]
    fn default_models_apply_when_omitted() {
        let env = EnvDefaults::default();
        let resolver = CredentialResolver::new(&env, false);
        let expected = [
            (Provider::OpenAI, "gpt-3.5-turbo"),
            (Provider::Anthropic, "claude-3-opus-20240229"),
            (Provider::Databricks, "dbrx-instruct"),
        ];
        for (provider, model) in expected {
            let resolved = resolver
                .resolve(
                    provider,
                    &creds(Some("k"), None, Some("https://ws/serving-endpoints/x/invocations")),
                    &CredentialSet::default(),
                )
                .unwrap();
            assert_eq!(resolved.model, model);
        }
    }

    #[test]
    fn environment_model_overrides_builtin_default() {
        let env = EnvDefaults::from_pairs([("OPENAI_MODEL", "gpt-4o")]);
        let resolver = CredentialResolver::new(&env, false);
        let resolved = resolver
            .resolve(
                Provider::OpenAI,
                &creds(Some("k"), None, None),
                &CredentialSet::default(),
            )
            .unwrap();
        assert_eq!(resolved.model, "gpt-4o");
    }

    #[test]
    fn empty_strings_fall_through() {
        let env = EnvDefaults::default();
        let resolver = CredentialResolver::new(&env, false);
        let resolved = resolver
            .resolve(
                Provider::OpenAI,
                &creds(Some(""), Some(""), None),
                &creds(Some("session-key"), None, None),
            )
            .unwrap();
        assert_eq!(resolved.api_key, "session-key");
        assert_eq!(resolved.model, "gpt-3.5-turbo");

        let err = resolver
            .resolve(Provider::OpenAI, &creds(Some(""), None, None), &CredentialSet::default())
            .unwrap_err();
        assert_eq!(err.to_string(), "API key is required");
    }

    #[test]
    fn missing_key_is_reported_per_provider() {
        let env = EnvDefaults::default();
        let resolver = CredentialResolver::new(&env, false);
        let empty = CredentialSet::default();

        for provider in [Provider::OpenAI, Provider::Anthropic] {
            let err = resolver.resolve(provider, &empty, &empty).unwrap_err();
            assert!(matches!(
                err,
                RelayError::MissingCredential {
                    field: CredentialField::ApiKey,
                    ..
                }
            ));
            assert_eq!(err.to_string(), "API key is required");
        }

        let err = resolver
            .resolve(Provider::Databricks, &creds(Some("k"), None, None), &empty)
            .unwrap_err();
        assert!(matches!(
            err,
            RelayError::MissingCredential {
                field: CredentialField::ApiUrl,
                ..
            }
        ));
        assert_eq!(err.to_string(), "API key and API URL are required");
    }

    #[test]
    fn resolve_fields_returns_only_requested() {
        let env = EnvDefaults::from_pairs([("DATABRICKS_API_URL", "https://ws/serving-endpoints")]);
        let resolver = CredentialResolver::new(&env, false);
        let set = resolver
            .resolve_fields(
                Provider::Databricks,
                &[CredentialField::ApiKey, CredentialField::ApiUrl],
                &creds(Some("k"), None, None),
                &CredentialSet::default(),
            )
            .unwrap();
        assert_eq!(set, creds(Some("k"), None, Some("https://ws/serving-endpoints")));
    }
}
