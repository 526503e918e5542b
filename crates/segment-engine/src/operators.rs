//! 条件操作符定义

use crate::error::RuleError;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// 规范化操作符名称：转小写并去除所有空白
///
/// "Greater Than Or Equal" 与 "greaterthanorequal" 视为同一操作符。
pub fn normalize_test_name(name: &str) -> String {
    name.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

/// 名称中包含 "range" 的操作符为区间测试，需要最小值和最大值
pub fn is_range_test(normalized: &str) -> bool {
    normalized.contains("range")
}

/// 名称中包含 "null" 的操作符为空值测试，不需要比较值
pub fn is_null_test(normalized: &str) -> bool {
    normalized.contains("null")
}

/// 条件操作符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    // 通用比较
    Equal,
    NotEqual,

    // 有序比较
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,

    // 区间
    Range,
    NotRange,

    // 包含检查
    In,
    NotIn,
    Includes,
    NotIncludes,

    // 字符串操作
    StartsWith,
    EndsWith,
    Regex,

    // 时间操作
    Before,
    After,

    // 空值检查
    IsNull,
    IsNotNull,
}

impl Operator {
    /// 操作符需要的参数个数
    pub fn arity(&self) -> usize {
        match self {
            Self::Range | Self::NotRange => 2,
            Self::IsNull | Self::IsNotNull => 0,
            _ => 1,
        }
    }
}

impl FromStr for Operator {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let op = match normalize_test_name(s).as_str() {
            "equal" | "equals" | "equalto" | "eq" => Self::Equal,
            "notequal" | "notequals" | "notequalto" | "neq" => Self::NotEqual,
            "greaterthan" | "gt" => Self::GreaterThan,
            "greaterthanorequal" | "greaterthanorequalto" | "gte" => Self::GreaterThanOrEqual,
            "lessthan" | "lt" => Self::LessThan,
            "lessthanorequal" | "lessthanorequalto" | "lte" => Self::LessThanOrEqual,
            "range" | "inrange" => Self::Range,
            "notrange" | "notinrange" => Self::NotRange,
            "in" => Self::In,
            "notin" => Self::NotIn,
            "includes" | "contains" => Self::Includes,
            "notincludes" | "notcontains" => Self::NotIncludes,
            "startswith" => Self::StartsWith,
            "endswith" => Self::EndsWith,
            "regex" | "matches" => Self::Regex,
            "before" => Self::Before,
            "after" => Self::After,
            "isnull" | "null" => Self::IsNull,
            "isnotnull" | "notnull" => Self::IsNotNull,
            _ => return Err(RuleError::UnknownOperator(s.to_string())),
        };
        Ok(op)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Equal => "equal",
            Self::NotEqual => "notequal",
            Self::GreaterThan => "greaterthan",
            Self::GreaterThanOrEqual => "greaterthanorequal",
            Self::LessThan => "lessthan",
            Self::LessThanOrEqual => "lessthanorequal",
            Self::Range => "range",
            Self::NotRange => "notrange",
            Self::In => "in",
            Self::NotIn => "notin",
            Self::Includes => "includes",
            Self::NotIncludes => "notincludes",
            Self::StartsWith => "startswith",
            Self::EndsWith => "endswith",
            Self::Regex => "regex",
            Self::Before => "before",
            Self::After => "after",
            Self::IsNull => "isnull",
            Self::IsNotNull => "isnotnull",
        };
        write!(f, "{}", s)
    }
}

/// 逻辑操作符
///
/// 决定条件进入全局 AND 列表还是某个命名的 OR 组，反序列化时忽略大小写。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogicalOperator {
    #[default]
    And,
    Or,
}

impl<'de> Deserialize<'de> for LogicalOperator {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<String>::deserialize(deserializer)?;
        match raw.as_deref().map(normalize_test_name).as_deref() {
            None | Some("") | Some("and") => Ok(Self::And),
            Some("or") => Ok(Self::Or),
            Some(other) => Err(serde::de::Error::custom(format!(
                "无效的 rule_type '{}'，仅支持 and / or",
                other
            ))),
        }
    }
}

impl fmt::Display for LogicalOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::And => write!(f, "AND"),
            Self::Or => write!(f, "OR"),
        }
    }
}
