//! 运行参数。
//!
//! ```toml
//! [notifier]
//! max_listener_stack_depth = 8
//!
//! [pipeline]
//! close_on_unhandled_exception = true
//! ```
//!
//! 缺省字段回落到 [`Default`] 值。

use std::{fs, path::Path};

use serde::Deserialize;

/// 默认允许的内联通知嵌套层数。
pub const DEFAULT_MAX_LISTENER_STACK_DEPTH: usize = 8;

/// 配置加载错误。
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// 读取配置文件失败。
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),
    /// TOML 解析失败。
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

/// 完整配置。
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConduitConfig {
    /// 完成通知参数。
    pub notifier: NotifierConfig,
    /// 事件传播链参数。
    pub pipeline: PipelineConfig,
}

impl ConduitConfig {
    /// 从 TOML 文本解析。
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(source)?)
    }

    /// 从 TOML 文件加载。
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let source = fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }
}

/// 完成通知参数。
///
/// # 契约说明（What）
/// - `max_listener_stack_depth`：同一线程上允许嵌套的内联通知帧数。监听器同步完成另一个结果时会形成嵌套，
///   超过该深度后，后续通知改为提交给执行上下文排队执行；设为 `0` 表示永不内联。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NotifierConfig {
    pub max_listener_stack_depth: usize,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            max_listener_stack_depth: DEFAULT_MAX_LISTENER_STACK_DEPTH,
        }
    }
}

/// 事件传播链参数。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// 异常事件抵达链尾仍未被处理时，是否额外发起出站 `Close`。
    pub close_on_unhandled_exception: bool,
}
