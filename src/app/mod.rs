//! 应用入口
//!
//! - `bootstrap` - `.env` 查找、引擎初始化、启动摘要
//! - `logging` - 日志初始化

pub mod bootstrap;
pub mod logging;

use replycast_core::config::Config;

/// 运行服务器直到收到停止信号
///
/// # Errors
///
/// 配置缺失、引擎初始化失败或服务器无法启动时返回错误。
pub async fn run() -> anyhow::Result<()> {
    let env_file = bootstrap::load_env_file();
    logging::init();

    match &env_file {
        bootstrap::EnvFile::Loaded(path) => {
            tracing::info!("[BOOTSTRAP] 已加载环境文件: {}", path.display())
        }
        bootstrap::EnvFile::Invalid { path, error } => tracing::warn!(
            "[BOOTSTRAP] 环境文件 {} 解析失败，使用进程环境变量: {}",
            path.display(),
            error
        ),
        bootstrap::EnvFile::NotFound => {
            tracing::info!("[BOOTSTRAP] 未找到 .env 文件，使用进程环境变量")
        }
    }

    let config = Config::from_env()?;
    let relay = bootstrap::build_relay(&config)?;

    for line in bootstrap::startup_summary(&config, relay.pool().len()) {
        tracing::info!("[BOOTSTRAP] {}", line);
    }

    replycast_server::run_server(&config, relay, bootstrap::shutdown_signal()).await?;
    Ok(())
}
