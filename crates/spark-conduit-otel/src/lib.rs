//! `spark-conduit-otel`：把 [`Logger`] 诊断桥接到 `tracing`。
//!
//! # 契约说明（What）
//! - [`TracingLogger`] 把告警转发为 `tracing::warn!`，调试信息转发为 `tracing::debug!`，
//!   target 固定为 `spark_conduit`，错误以结构化字段 `code`、`cause` 附带；
//! - [`install`] 一次性注册 `fmt + EnvFilter` 全局 Subscriber，`RUST_LOG` 未设置时默认 `info`。

use std::sync::OnceLock;

use spark_conduit::{CoreError, Logger};
use tracing::dispatcher;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt};

static INSTALLED: OnceLock<()> = OnceLock::new();

/// 基于 `tracing` 的诊断日志实现。
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn warn(&self, message: &str, cause: Option<&CoreError>) {
        match cause {
            Some(cause) => tracing::warn!(
                target: "spark_conduit",
                code = cause.code(),
                cause = %cause,
                "{message}"
            ),
            None => tracing::warn!(target: "spark_conduit", "{message}"),
        }
    }

    fn debug(&self, message: &str) {
        tracing::debug!(target: "spark_conduit", "{message}");
    }
}

/// 安装过程可能出现的错误。
#[derive(Debug)]
pub enum Error {
    /// `install` 被重复调用。
    AlreadyInstalled,
    /// 外部已设置全局 Subscriber。
    SubscriberAlreadySet,
    /// 设置全局 Subscriber 失败的底层错误。
    SetGlobalSubscriber(tracing::dispatcher::SetGlobalDefaultError),
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::AlreadyInstalled => {
                f.write_str("诊断日志订阅器已由本进程安装过一次，install 只能调用一次")
            }
            Error::SubscriberAlreadySet => f.write_str(
                "进程内已有其他全局 tracing 订阅器，TracingLogger 的日志将交由该订阅器处理",
            ),
            Error::SetGlobalSubscriber(err) => {
                write!(f, "注册 fmt + EnvFilter 订阅器时 tracing 拒绝了全局默认设置: {err}")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::SetGlobalSubscriber(err) => Some(err),
            _ => None,
        }
    }
}

/// 注册全局 Subscriber。
///
/// # 契约说明（What）
/// - 重复调用返回 [`Error::AlreadyInstalled`]；
/// - 调用前外部已配置全局 Subscriber 时返回 [`Error::SubscriberAlreadySet`]。
pub fn install() -> Result<(), Error> {
    if INSTALLED.get().is_some() {
        return Err(Error::AlreadyInstalled);
    }
    if dispatcher::has_been_set() {
        return Err(Error::SubscriberAlreadySet);
    }

    let subscriber = tracing_subscriber::registry()
        .with(build_env_filter())
        .with(tracing_subscriber::fmt::layer());
    tracing::subscriber::set_global_default(subscriber).map_err(Error::SetGlobalSubscriber)?;

    INSTALLED.set(()).map_err(|_| Error::AlreadyInstalled)
}

fn build_env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}
