//! 编译后的分群谓词
//!
//! 条件列表被编译为一组按配置顺序排列的 `CompiledCondition`，
//! 每个条件携带必需字段检查、已解析的操作数以及结果归属（全局 AND 或命名 OR 组）。

use crate::models::{EvaluationContext, SegmentConfig};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;

/// 操作数
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// 配置中内嵌的字面量，保留原生 JSON 类型
    Literal(Value),
    /// 评估时从状态记录中读取的变量
    Variable(String),
}

impl Operand {
    /// 在上下文中解析操作数，变量未定义时返回 None
    pub fn resolve<'a>(&'a self, context: &'a EvaluationContext) -> Option<&'a Value> {
        match self {
            Self::Literal(value) => Some(value),
            Self::Variable(path) => context.get_field(path),
        }
    }
}

/// 必需的操作数槽位
///
/// `operand` 为 None 表示配置中未提供该值，评估时总是报缺失。
/// `label` 是缺失时错误信息中使用的名称。
#[derive(Debug, Clone, PartialEq)]
pub struct OperandSlot {
    pub operand: Option<Operand>,
    pub label: String,
}

/// 条件结果的归属
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// 全局 AND 列表
    AndGroup,
    /// 命名 OR 组，值为组在注册表中的下标
    OrGroup(usize),
}

/// 编译后的单个条件
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledCondition {
    /// 条件在配置中的位置
    pub index: usize,
    /// 比较主体的变量路径
    pub subject: String,
    /// 规范化后的操作符名称
    pub operator: String,
    /// 按调用顺序排列的操作数（区间测试为 [min, max]，空值测试为空）
    pub operands: Vec<OperandSlot>,
    pub route: Route,
}

/// 编译后的分群谓词
///
/// 构造后不可变，可在任意多个并发评估之间共享。
#[derive(Debug, Clone)]
pub struct CompiledPredicate {
    pub(crate) segment: Arc<SegmentConfig>,
    pub(crate) conditions: Vec<CompiledCondition>,
    pub(crate) groups: Vec<String>,
    pub(crate) required_fields: BTreeSet<String>,
}

impl CompiledPredicate {
    /// 分群名称
    pub fn name(&self) -> &str {
        &self.segment.name
    }

    /// 原始分群配置
    pub fn segment(&self) -> &Arc<SegmentConfig> {
        &self.segment
    }

    pub fn conditions(&self) -> &[CompiledCondition] {
        &self.conditions
    }

    /// OR 组名称，按首次出现顺序
    pub fn groups(&self) -> &[String] {
        &self.groups
    }

    /// 评估可能读取的全部状态字段
    pub fn required_fields(&self) -> &BTreeSet<String> {
        &self.required_fields
    }
}
