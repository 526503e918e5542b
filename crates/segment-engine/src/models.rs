//! 分群引擎领域模型

use crate::error::RuleError;
use crate::operators::LogicalOperator;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::sync::Arc;

/// 取值类型：字面量或状态变量引用
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    #[default]
    Literal,
    Variable,
}

/// 区分"未配置"与显式的 JSON null：字段出现即为 Some，包括 null
fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// 条件定义：一次针对状态字段的原子比较
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub variable_name: String,
    pub condition_test: String,

    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub value_comparison: Option<Value>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub value_comparison_type: ValueType,

    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub value_minimum: Option<Value>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub value_minimum_type: ValueType,

    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub value_maximum: Option<Value>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub value_maximum_type: ValueType,

    #[serde(default)]
    pub rule_type: LogicalOperator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition_group_id: Option<Value>,
}

impl Condition {
    pub fn new(variable_name: impl Into<String>, condition_test: impl Into<String>) -> Self {
        Self {
            variable_name: variable_name.into(),
            condition_test: condition_test.into(),
            value_comparison: None,
            value_comparison_type: ValueType::Literal,
            value_minimum: None,
            value_minimum_type: ValueType::Literal,
            value_maximum: None,
            value_maximum_type: ValueType::Literal,
            rule_type: LogicalOperator::And,
            rule_name: None,
            condition_group_id: None,
        }
    }

    /// 与字面量比较
    pub fn literal(mut self, value: impl Into<Value>) -> Self {
        self.value_comparison = Some(value.into());
        self.value_comparison_type = ValueType::Literal;
        self
    }

    /// 与状态中的另一个变量比较
    pub fn variable(mut self, name: impl Into<String>) -> Self {
        self.value_comparison = Some(Value::String(name.into()));
        self.value_comparison_type = ValueType::Variable;
        self
    }

    /// 区间测试的字面量上下界
    pub fn between(mut self, minimum: impl Into<Value>, maximum: impl Into<Value>) -> Self {
        self.value_minimum = Some(minimum.into());
        self.value_minimum_type = ValueType::Literal;
        self.value_maximum = Some(maximum.into());
        self.value_maximum_type = ValueType::Literal;
        self
    }

    /// 区间测试的变量上下界
    pub fn between_variables(
        mut self,
        minimum: impl Into<String>,
        maximum: impl Into<String>,
    ) -> Self {
        self.value_minimum = Some(Value::String(minimum.into()));
        self.value_minimum_type = ValueType::Variable;
        self.value_maximum = Some(Value::String(maximum.into()));
        self.value_maximum_type = ValueType::Variable;
        self
    }

    /// 加入命名的 OR 组
    pub fn or_group(mut self, rule_name: impl Into<String>) -> Self {
        self.rule_type = LogicalOperator::Or;
        self.rule_name = Some(rule_name.into());
        self
    }
}

/// 分群配置
///
/// 除 name 与 conditions 外的顶层字段原样保留。反序列化得到的配置在字段未被修改时
/// 序列化回调用方提供的原始文档，命中结果因此与输入配置完全一致。
#[derive(Debug, Clone)]
pub struct SegmentConfig {
    pub name: String,
    pub conditions: Vec<Condition>,
    pub extra: Map<String, Value>,
    /// 反序列化时的原始文档
    source: Option<Value>,
}

impl SegmentConfig {
    pub fn new(name: impl Into<String>, conditions: Vec<Condition>) -> Self {
        Self {
            name: name.into(),
            conditions,
            extra: Map::new(),
            source: None,
        }
    }

    /// 原始文档，仅当字段与之一致时返回
    pub fn source(&self) -> Option<&Value> {
        let source = self.source.as_ref()?;
        let fields = SegmentFields::deserialize(source).ok()?;
        (fields.name == self.name
            && fields.conditions == self.conditions
            && fields.extra == self.extra)
            .then_some(source)
    }
}

impl PartialEq for SegmentConfig {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.conditions == other.conditions && self.extra == other.extra
    }
}

#[derive(Deserialize)]
struct SegmentFields {
    name: String,
    conditions: Vec<Condition>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

#[derive(Serialize)]
struct SegmentFieldsRef<'a> {
    name: &'a str,
    conditions: &'a [Condition],
    #[serde(flatten)]
    extra: &'a Map<String, Value>,
}

impl<'de> Deserialize<'de> for SegmentConfig {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let source = Value::deserialize(deserializer)?;
        let fields = SegmentFields::deserialize(&source).map_err(serde::de::Error::custom)?;
        Ok(Self {
            name: fields.name,
            conditions: fields.conditions,
            extra: fields.extra,
            source: Some(source),
        })
    }
}

impl Serialize for SegmentConfig {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self.source() {
            Some(source) => source.serialize(serializer),
            None => SegmentFieldsRef {
                name: &self.name,
                conditions: &self.conditions,
                extra: &self.extra,
            }
            .serialize(serializer),
        }
    }
}

/// 路径片段
#[derive(Debug, Clone, PartialEq, Eq)]
enum PathSegment {
    Key(String),
    Index(String),
}

/// 解析变量路径，支持 "a.b"、"a['b']"、"a[\"b\"]"、"items[0].name" 等写法
fn parse_path(path: &str) -> Option<Vec<PathSegment>> {
    let mut segments = Vec::new();
    let mut chars = path.chars().peekable();
    let mut current = String::new();

    while let Some(c) = chars.next() {
        match c {
            '.' => {
                if !current.is_empty() {
                    segments.push(PathSegment::Key(std::mem::take(&mut current)));
                }
            }
            '[' => {
                if !current.is_empty() {
                    segments.push(PathSegment::Key(std::mem::take(&mut current)));
                }
                let quote = match chars.peek() {
                    Some(q @ ('\'' | '"')) => Some(*q),
                    _ => None,
                };
                let mut inner = String::new();
                match quote {
                    Some(q) => {
                        chars.next();
                        loop {
                            match chars.next()? {
                                ch if ch == q => break,
                                ch => inner.push(ch),
                            }
                        }
                        if chars.next()? != ']' {
                            return None;
                        }
                        segments.push(PathSegment::Key(inner));
                    }
                    None => {
                        loop {
                            match chars.next()? {
                                ']' => break,
                                ch => inner.push(ch),
                            }
                        }
                        segments.push(PathSegment::Index(inner.trim().to_string()));
                    }
                }
            }
            _ => current.push(c),
        }
    }

    if !current.is_empty() {
        segments.push(PathSegment::Key(current));
    }

    if segments.is_empty() {
        None
    } else {
        Some(segments)
    }
}

/// 评估上下文 - 状态记录的隔离副本
///
/// 每次评估独占一份拷贝，调用方的原始数据不会被修改。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvaluationContext {
    data: Value,
}

impl EvaluationContext {
    pub fn new(data: Value) -> Self {
        Self { data }
    }

    /// 从 JSON 对象创建
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let data: Value = serde_json::from_str(json)?;
        Ok(Self { data })
    }

    /// 根据 input / state 解析出本次评估使用的状态记录
    ///
    /// state 为对象时优先使用 state，否则使用 input；两者都不是对象时为空记录。
    pub fn resolve(input: &Value, state: Option<&Value>) -> Self {
        let chosen = match state {
            Some(state) if state.is_object() => state,
            _ => input,
        };
        if chosen.is_object() {
            Self::new(chosen.clone())
        } else {
            Self::new(Value::Object(Map::new()))
        }
    }

    /// 获取字段值
    ///
    /// 先按完整名称查找顶层键，未命中再按点号 / 方括号路径逐级查找。
    pub fn get_field(&self, path: &str) -> Option<&Value> {
        if let Some(value) = self.data.as_object().and_then(|map| map.get(path)) {
            return Some(value);
        }

        let mut current = &self.data;
        for segment in parse_path(path)? {
            current = match (current, segment) {
                (Value::Object(map), PathSegment::Key(key) | PathSegment::Index(key)) => {
                    map.get(&key)?
                }
                (Value::Array(arr), PathSegment::Key(key) | PathSegment::Index(key)) => {
                    let index: usize = key.parse().ok()?;
                    arr.get(index)?
                }
                _ => return None,
            };
        }

        Some(current)
    }

    /// 检查字段是否已定义
    pub fn contains(&self, path: &str) -> bool {
        self.get_field(path).is_some()
    }

    /// 获取底层数据
    pub fn data(&self) -> &Value {
        &self.data
    }
}

/// 评估失败信息，以数据形式返回给调用方
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationFailure {
    pub message: String,
    #[serde(default)]
    pub error: String,
}

impl From<&RuleError> for EvaluationFailure {
    fn from(err: &RuleError) -> Self {
        let error = match err {
            RuleError::OperatorFailure { detail, .. } => detail.clone(),
            _ => String::new(),
        };
        Self {
            message: err.to_string(),
            error,
        }
    }
}

impl From<RuleError> for EvaluationFailure {
    fn from(err: RuleError) -> Self {
        Self::from(&err)
    }
}

/// 单次评估结果
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// 命中：返回原始分群配置
    Matched(Arc<SegmentConfig>),
    /// 未命中
    NotMatched,
    /// 评估失败
    Failed(EvaluationFailure),
}

impl Outcome {
    pub fn is_match(&self) -> bool {
        matches!(self, Self::Matched(_))
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    /// 命中的分群配置
    pub fn segment(&self) -> Option<&Arc<SegmentConfig>> {
        match self {
            Self::Matched(segment) => Some(segment),
            _ => None,
        }
    }

    pub fn failure(&self) -> Option<&EvaluationFailure> {
        match self {
            Self::Failed(failure) => Some(failure),
            _ => None,
        }
    }
}

/// 序列化为原有的三种形态：配置对象 / false / { message, error }
impl Serialize for Outcome {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Self::Matched(segment) => segment.serialize(serializer),
            Self::NotMatched => serializer.serialize_bool(false),
            Self::Failed(failure) => failure.serialize(serializer),
        }
    }
}
