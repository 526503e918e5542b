//! 统一可观测性模块
//!
//! 所有入口通过单一函数初始化日志，确保一致的过滤规则和输出格式。

pub mod tracing;

use crate::config::ObservabilityConfig;
use ::tracing::info;
use anyhow::Result;

/// 统一初始化可观测性
///
/// # Example
///
/// ```ignore
/// use segment_shared::config::AppConfig;
///
/// let config = AppConfig::load("segment-eval")?;
/// segment_shared::observability::init(&config.observability)?;
/// ```
pub fn init(config: &ObservabilityConfig) -> Result<()> {
    tracing::init(config)?;

    info!(
        log_level = %config.log_level,
        log_format = %config.log_format,
        "Observability initialized"
    );

    Ok(())
}
