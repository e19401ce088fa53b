use std::{
    collections::HashMap,
    sync::RwLock,
    time::{Duration, Instant},
};

use axum::http::{header::COOKIE, HeaderMap, HeaderValue};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use uuid::Uuid;

use crate::{
    credentials::CredentialSet,
    error::RelayError,
    models::{CredentialField, Provider},
};

pub const SESSION_COOKIE: &str = "relay_session";
/** \brief 注册表默认容量；写满后淘汰最早过期的会话。 */
pub const DEFAULT_MAX_SESSIONS: usize = 10_000;

type HmacSha256 = Hmac<Sha256>;

/**
 * \brief 会话键值存储能力，由处理器显式注入。
 */
pub trait SessionStore {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&mut self, key: &str, value: String);
}

/**
 * \brief 单个客户端的会话数据。
 */
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionData {
    values: HashMap<String, String>,
}

impl SessionStore for SessionData {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: String) {
        self.values.insert(key.to_string(), value);
    }
}

/**
 * \brief 会话字段键名，如 `openai_apiKey`。
 */
pub fn session_key(provider: Provider, field: CredentialField) -> String {
    format!("{}_{}", provider.as_str(), field.as_str())
}

/**
 * \brief 将请求中出现的凭据字段写入会话；未知 Provider 在写入前拒绝。
 */
pub fn set_credentials(
    session: &mut dyn SessionStore,
    provider: &str,
    fields: &CredentialSet,
) -> Result<Provider, RelayError> {
    let provider: Provider = provider.parse()?;
    for field in CredentialField::ALL {
        if let Some(value) = fields.get(field) {
            session.set(&session_key(provider, field), value.to_string());
        }
    }
    Ok(provider)
}

/**
 * \brief 读取会话中的凭据；缺失或为空的字段不出现在结果中。
 */
pub fn get_credentials(session: &dyn SessionStore, provider: Provider) -> CredentialSet {
    let mut out = CredentialSet::default();
    for field in CredentialField::ALL {
        if let Some(value) = session.get(&session_key(provider, field)) {
            if !value.is_empty() {
                out.set(field, value);
            }
        }
    }
    out
}

/**
 * \brief 某次请求打开的会话；修改后需交回注册表保存。
 */
#[derive(Debug)]
pub struct Session {
    id: String,
    data: SessionData,
    fresh: bool,
    dirty: bool,
}

impl Session {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_new(&self) -> bool {
        self.fresh
    }
}

impl SessionStore for Session {
    fn get(&self, key: &str) -> Option<String> {
        self.data.get(key)
    }

    fn set(&mut self, key: &str, value: String) {
        self.dirty = true;
        self.data.set(key, value);
    }
}

struct StoredSession {
    data: SessionData,
    expires_at: Instant,
}

/**
 * \brief 进程内会话注册表，以签名 Cookie 中的随机 ID 为键。
 */
pub struct SessionRegistry {
    secret: String,
    ttl: Duration,
    max_sessions: usize,
    sessions: RwLock<HashMap<String, StoredSession>>,
}

impl SessionRegistry {
    pub fn new(secret: impl Into<String>, ttl: Duration) -> Self {
        Self {
            secret: secret.into(),
            ttl,
            max_sessions: DEFAULT_MAX_SESSIONS,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_max_sessions(mut self, max_sessions: usize) -> Self {
        self.max_sessions = max_sessions.max(1);
        self
    }

    /**
     * \brief 按请求 Cookie 打开会话；签名无效、过期或未知时返回新的空会话。
     */
    pub fn open(&self, headers: &HeaderMap) -> Session {
        let existing = read_cookie(headers)
            .and_then(|raw| self.verify(&raw))
            .and_then(|id| {
                let guard = self.sessions.read().ok()?;
                let stored = guard.get(&id)?;
                if stored.expires_at > Instant::now() {
                    Some((id.clone(), stored.data.clone()))
                } else {
                    None
                }
            });

        match existing {
            Some((id, data)) => Session {
                id,
                data,
                fresh: false,
                dirty: false,
            },
            None => Session {
                id: Uuid::new_v4().to_string(),
                data: SessionData::default(),
                fresh: true,
                dirty: false,
            },
        }
    }

    /**
     * \brief 保存被修改的会话；新建会话返回需下发的 `Set-Cookie` 值。
     */
    pub fn save(&self, session: Session) -> Option<HeaderValue> {
        if !session.dirty {
            return None;
        }
        let now = Instant::now();
        if let Ok(mut guard) = self.sessions.write() {
            guard.retain(|_, s| s.expires_at > now);
            if !guard.contains_key(&session.id) && guard.len() >= self.max_sessions {
                let oldest = guard
                    .iter()
                    .min_by_key(|(_, s)| s.expires_at)
                    .map(|(id, _)| id.clone());
                if let Some(oldest) = oldest {
                    guard.remove(&oldest);
                }
            }
            guard.insert(
                session.id.clone(),
                StoredSession {
                    data: session.data,
                    expires_at: now + self.ttl,
                },
            );
        }
        if !session.fresh {
            return None;
        }
        let cookie = format!(
            "{}={}.{}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
            SESSION_COOKIE,
            session.id,
            self.sign(&session.id)?,
            self.ttl.as_secs()
        );
        HeaderValue::from_str(&cookie).ok()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().map(|g| g.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn mac(&self, id: &str) -> Option<HmacSha256> {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(self.secret.as_bytes()).ok()?;
        mac.update(id.as_bytes());
        Some(mac)
    }

    fn sign(&self, id: &str) -> Option<String> {
        Some(hex::encode(self.mac(id)?.finalize().into_bytes()))
    }

    // verify_slice 为常量时间比较。
    fn verify(&self, raw: &str) -> Option<String> {
        let (id, signature) = raw.split_once('.')?;
        let signature = hex::decode(signature).ok()?;
        self.mac(id)?
            .verify_slice(&signature)
            .ok()
            .map(|_| id.to_string())
    }
}

fn read_cookie(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.to_string())
}
