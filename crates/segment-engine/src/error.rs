//! 分群引擎错误类型

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("规则编译失败: {0}")]
    CompileError(String),

    #[error("没有可用于评估的分群配置")]
    NoConfigurations,

    #[error("The Variable {0} is required by a Rule but is not defined.")]
    MissingVariable(String),

    #[error("操作符 {operator} 执行失败: {detail}")]
    OperatorFailure { operator: String, detail: String },

    #[error("未知的操作符: {0}")]
    UnknownOperator(String),

    #[error("操作符 {operator} 需要 {expected} 个参数, 实际 {actual} 个")]
    InvalidOperands {
        operator: String,
        expected: usize,
        actual: usize,
    },

    #[error("类型不匹配: 期望 {expected}, 实际 {actual}")]
    TypeMismatch { expected: String, actual: String },

    #[error("无效的正则表达式 '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("分群未找到: {0}")]
    SegmentNotFound(String),

    #[error("JSON 序列化错误: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl RuleError {
    /// 是否属于评估期错误（需要转换为评估结果而非向上抛出）
    pub fn is_runtime(&self) -> bool {
        matches!(
            self,
            Self::MissingVariable(_)
                | Self::OperatorFailure { .. }
                | Self::UnknownOperator(_)
                | Self::InvalidOperands { .. }
                | Self::TypeMismatch { .. }
                | Self::InvalidPattern { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, RuleError>;
