//! 人群分群规则引擎
//!
//! 将分群条件配置编译为可复用的谓词，并在状态记录的隔离副本上评估：
//! - 条件列表编译（AND 列表 + 命名 OR 组）
//! - 必需字段检查，缺失时以数据形式返回错误
//! - 字面量 / 变量引用操作数解析
//! - 多分群的首个命中与全部命中选择

pub mod comparator;
pub mod compiler;
pub mod error;
pub mod executor;
pub mod models;
pub mod operators;
pub mod program;
pub mod store;

pub use comparator::{Comparator, StandardComparator};
pub use compiler::SegmentCompiler;
pub use error::{Result, RuleError};
pub use executor::{EvaluationReport, SegmentExecutor};
pub use models::{
    Condition, EvaluationContext, EvaluationFailure, Outcome, SegmentConfig, ValueType,
};
pub use operators::{LogicalOperator, Operator};
pub use program::{CompiledCondition, CompiledPredicate, Operand, OperandSlot, Route};
pub use store::{SegmentStore, SegmentStoreStats};
