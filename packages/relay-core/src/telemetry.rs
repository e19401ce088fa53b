use tracing_subscriber::EnvFilter;

/**
 * \brief 安装全局日志订阅器；`RUST_LOG` 未设置时默认 `info`。重复调用无副作用。
 */
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/**
 * \brief 记录常规事件。
 */
pub fn log_event(category: &str, message: &str) {
    tracing::info!(category = %category, "{}", message);
}

/**
 * \brief 记录错误事件。
 */
pub fn log_error(category: &str, message: &str) {
    tracing::error!(category = %category, "{}", message);
}
