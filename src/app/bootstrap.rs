//! 应用启动引导模块
//!
//! 包含 `.env` 查找、配置加载、中转引擎初始化和启动摘要。

use anyhow::Context;
use replycast_core::config::Config;
use replycast_core::credential::CooldownPolicy;
use replycast_core::relay::RelayEngine;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// 部署平台挂载密钥文件的位置
const SECRETS_ENV_FILE: &str = "/etc/secrets/.env";

/// `.env` 候选路径（按优先级）
pub fn env_file_candidates(cwd: &Path, exe_dir: Option<&Path>) -> Vec<PathBuf> {
    let mut candidates = vec![cwd.join(".env")];
    if let Some(dir) = exe_dir {
        candidates.push(dir.join(".env"));
    }
    candidates.push(PathBuf::from(SECRETS_ENV_FILE));
    candidates.push(cwd.join("..").join(".env"));
    candidates
}

/// 返回第一个存在的候选文件
pub fn find_env_file(candidates: &[PathBuf]) -> Option<PathBuf> {
    candidates.iter().find(|path| path.is_file()).cloned()
}

/// `.env` 加载结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvFile {
    /// 已加载的文件
    Loaded(PathBuf),
    /// 文件存在但解析失败
    Invalid { path: PathBuf, error: String },
    /// 没有可用的 `.env`
    NotFound,
}

/// 加载 `.env`
///
/// 没有找到任何候选文件时回退到 `dotenvy::dotenv()` 的默认查找。
pub fn load_env_file() -> EnvFile {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let exe_dir = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf));

    load_env_from(&env_file_candidates(&cwd, exe_dir.as_deref()))
}

/// 从候选路径中加载第一个存在的 `.env`
pub fn load_env_from(candidates: &[PathBuf]) -> EnvFile {
    match find_env_file(candidates) {
        Some(path) => match dotenvy::from_path(&path) {
            Ok(()) => EnvFile::Loaded(path),
            Err(e) => EnvFile::Invalid {
                path,
                error: e.to_string(),
            },
        },
        None => match dotenvy::dotenv() {
            Ok(path) => EnvFile::Loaded(path),
            Err(e) if e.not_found() => EnvFile::NotFound,
            Err(e) => EnvFile::Invalid {
                path: PathBuf::from(".env"),
                error: e.to_string(),
            },
        },
    }
}

/// 从配置创建中转引擎
///
/// # Errors
///
/// 凭证池为空或 HTTP 客户端构建失败时返回错误。
pub fn build_relay(config: &Config) -> anyhow::Result<Arc<RelayEngine>> {
    let relay = RelayEngine::from_config(&config.relay).context("初始化中转引擎失败")?;
    Ok(Arc::new(relay))
}

/// 启动摘要（不包含任何密钥）
pub fn startup_summary(config: &Config, credentials: usize) -> Vec<String> {
    let cors = if config.cors.allows_any() {
        "All origins".to_string()
    } else {
        config.cors.allowed_origins.join(", ")
    };

    let mut lines = vec![
        format!(
            "ReplyCast v{} listening on {}:{}",
            replycast_core::version(),
            config.server.host,
            config.server.port
        ),
        format!("Environment: {}", config.environment),
        format!("CORS: {cors}"),
        format!(
            "Rate limit: {} requests per {} minutes",
            config.rate_limit.max_requests,
            config.rate_limit.window_minutes()
        ),
        format!(
            "API key rotation: {} key(s) available, cooldown: {} minutes",
            credentials,
            CooldownPolicy::from_millis(config.relay.cooldown_ms).minutes()
        ),
        format!("Models: {}", config.relay.models.join(", ")),
    ];

    if config.environment.is_development() {
        lines.push(format!(
            "Health check: http://localhost:{}/health",
            config.server.port
        ));
        lines.push(format!(
            "API endpoint: http://localhost:{}/api/generate-reply",
            config.server.port
        ));
    }

    lines
}

/// 等待 Ctrl+C 或 SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("[BOOTSTRAP] 无法监听 Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("[BOOTSTRAP] 无法监听 SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("[BOOTSTRAP] 收到停止信号，正在关闭服务器");
}
