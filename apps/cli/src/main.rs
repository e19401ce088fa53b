use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use llm_relay_core::{
    config::RelayConfig,
    credentials::{CredentialResolver, CredentialSet},
    databricks, llm,
    models::{ChatRequest, CredentialField, Message, Provider},
    server, telemetry,
};

/**
 * \brief CLI 程序入口：启动中继服务或直接调用上游。
 */
#[derive(Parser, Debug)]
#[command(name = "llm-relay", version, about = "Chat-completion relay for OpenAI, Anthropic and Databricks")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /**
     * \brief 启动 HTTP 中继服务。
     */
    Serve {
        #[arg(long, default_value = "127.0.0.1:8000")]
        addr: String,
    },

    /**
     * \brief 列出 Databricks 服务端点。
     * \param api_key 缺省时读取 DATABRICKS_API_KEY
     * \param api_url 缺省时读取 DATABRICKS_API_URL
     */
    Models {
        #[arg(long)]
        api_key: Option<String>,
        #[arg(long)]
        api_url: Option<String>,
    },

    /**
     * \brief 使用环境变量中的凭据发送一条消息。
     */
    Chat {
        #[arg(long)]
        provider: String,
        #[arg(long)]
        prompt: String,
        #[arg(long)]
        model: Option<String>,
        /** \brief 输出上游原始 JSON 而非回复文本。 */
        #[arg(long, default_value_t = false)]
        raw: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    telemetry::init();

    let cli = Cli::parse();
    let config = RelayConfig::from_env();

    match cli.command {
        Commands::Serve { addr } => {
            server::run(&addr, config).await?;
        }
        Commands::Models { api_key, api_url } => {
            let resolver = CredentialResolver::new(&config.env, config.use_env_fallback);
            let supplied = CredentialSet {
                api_key,
                api_url,
                model: None,
            };
            let creds = resolver
                .resolve_fields(
                    Provider::Databricks,
                    &[CredentialField::ApiKey, CredentialField::ApiUrl],
                    &supplied,
                    &CredentialSet::default(),
                )
                .context("resolve databricks credentials failed")?;

            let client = reqwest_client()?;
            let models = databricks::list_models(
                &client,
                creds.get(CredentialField::ApiKey).unwrap_or_default(),
                creds.get(CredentialField::ApiUrl).unwrap_or_default(),
            )
            .await
            .context("list serving endpoints failed")?;

            if models.is_empty() {
                println!("No serving endpoints found.");
            }
            for model in models {
                println!(
                    "{}\t{}\t{}",
                    model.name,
                    if model.status { "ready" } else { "not ready" },
                    model.url
                );
            }
        }
        Commands::Chat {
            provider,
            prompt,
            model,
            raw,
        } => {
            let provider: Provider = provider.parse().context("unknown provider")?;
            let resolver = CredentialResolver::new(&config.env, config.use_env_fallback);
            let supplied = CredentialSet {
                model,
                ..Default::default()
            };
            let creds = resolver
                .resolve(provider, &supplied, &CredentialSet::default())
                .with_context(|| format!("resolve {} credentials failed", provider))?;

            let chat = ChatRequest::new(vec![Message::new("user", prompt)]);
            let client = reqwest_client()?;
            let reply = llm::invoke(&client, provider, &creds, &chat, &config.endpoints)
                .await
                .context("chat request failed")?;

            if raw {
                println!("{}", serde_json::to_string_pretty(&reply)?);
            } else {
                println!("{}", llm::extract_text(provider, &reply));
            }
        }
    }

    Ok(())
}

fn reqwest_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(llm::REQUEST_TIMEOUT)
        .build()
        .context("build http client failed")
}
