pub mod config;
pub mod credentials;
pub mod databricks;
pub mod error;
pub mod llm;
pub mod models;
pub mod server;
pub mod session;
pub mod telemetry;

/**
 * \brief 预导入集合，方便外部引用常用模块。
 */
pub mod prelude {
    pub use crate::config::{self, RelayConfig};
    pub use crate::credentials::{self, CredentialResolver, CredentialSet, ResolvedCredentials};
    pub use crate::databricks;
    pub use crate::error::RelayError;
    pub use crate::llm;
    pub use crate::models::{self, ChatRequest, CredentialField, Message, ModelInfo, Provider};
    pub use crate::server;
    pub use crate::session::{self, SessionStore};
    pub use crate::telemetry;
}
