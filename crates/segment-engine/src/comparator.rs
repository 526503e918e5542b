//! 比较能力
//!
//! 引擎对每个条件调用一次 `Comparator`，默认实现 `StandardComparator`
//! 提供数值、字符串、集合、时间与空值相关的基础操作符。

use crate::error::{Result, RuleError};
use crate::operators::Operator;
use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use serde_json::Value;
use std::cmp::Ordering;

/// 比较能力接口
///
/// 实现必须是纯函数或可安全重入的，同一实例会被并发的评估共享。
pub trait Comparator: Send + Sync {
    /// 以 `subject` 为主体执行名为 `operator` 的比较
    ///
    /// `operator` 已经过规范化（小写、无空白）。
    fn compare(&self, subject: &Value, operator: &str, operands: &[Value]) -> Result<bool>;
}

/// 默认比较器
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardComparator;

impl Comparator for StandardComparator {
    fn compare(&self, subject: &Value, operator: &str, operands: &[Value]) -> Result<bool> {
        Self::apply(subject, operator.parse()?, operands)
    }
}

/// 数值视图：整数保持精确，浮点数只接受有限值
#[derive(Debug, Clone, Copy, PartialEq)]
enum Numeric {
    Int(i128),
    Float(f64),
}

impl Numeric {
    /// JSON 数字，或可解析为有限数值的字符串（"NaN"、"inf" 等按普通字符串处理）
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n
                .as_i64()
                .map(|i| Self::Int(i.into()))
                .or_else(|| n.as_u64().map(|u| Self::Int(u.into())))
                .or_else(|| n.as_f64().map(Self::Float)),
            Value::String(s) => {
                let s = s.trim();
                match s.parse::<i128>() {
                    Ok(i) => Some(Self::Int(i)),
                    Err(_) => s.parse::<f64>().ok().filter(|f| f.is_finite()).map(Self::Float),
                }
            }
            _ => None,
        }
    }

    fn as_f64(self) -> f64 {
        match self {
            Self::Int(i) => i as f64,
            Self::Float(f) => f,
        }
    }

    fn compare_to(self, other: Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => Some(a.cmp(&b)),
            (a, b) => a.as_f64().partial_cmp(&b.as_f64()),
        }
    }
}

impl StandardComparator {
    /// 执行已解析的操作符，参数个数与 `Operator::arity` 不符时返回 `InvalidOperands`
    fn apply(subject: &Value, operator: Operator, operands: &[Value]) -> Result<bool> {
        match (operator, operands) {
            (Operator::IsNull, []) => Ok(subject.is_null()),
            (Operator::IsNotNull, []) => Ok(!subject.is_null()),
            (Operator::Range, [min, max]) => Self::range(subject, min, max),
            (Operator::NotRange, [min, max]) => Self::range(subject, min, max).map(|r| !r),
            (Operator::Equal, [expected]) => Ok(Self::eq(subject, expected)),
            (Operator::NotEqual, [expected]) => Ok(!Self::eq(subject, expected)),
            (Operator::GreaterThan, [expected]) => {
                Self::ordered(subject, expected, Ordering::is_gt)
            }
            (Operator::GreaterThanOrEqual, [expected]) => {
                Self::ordered(subject, expected, Ordering::is_ge)
            }
            (Operator::LessThan, [expected]) => Self::ordered(subject, expected, Ordering::is_lt),
            (Operator::LessThanOrEqual, [expected]) => {
                Self::ordered(subject, expected, Ordering::is_le)
            }
            (Operator::In, [expected]) => Self::in_list(subject, expected),
            (Operator::NotIn, [expected]) => Self::in_list(subject, expected).map(|r| !r),
            (Operator::Includes, [expected]) => Self::includes(subject, expected),
            (Operator::NotIncludes, [expected]) => Self::includes(subject, expected).map(|r| !r),
            (Operator::StartsWith, [expected]) => Self::starts_with(subject, expected),
            (Operator::EndsWith, [expected]) => Self::ends_with(subject, expected),
            (Operator::Regex, [expected]) => Self::regex_match(subject, expected),
            (Operator::Before, [expected]) => Self::time_compare(subject, expected, |a, b| a < b),
            (Operator::After, [expected]) => Self::time_compare(subject, expected, |a, b| a > b),
            (op, _) => Err(RuleError::InvalidOperands {
                operator: op.to_string(),
                expected: op.arity(),
                actual: operands.len(),
            }),
        }
    }

    /// 相等比较：双方都是数值时按数值比较（100 与 100.0、"5" 与 5 相等），否则按 JSON 值比较
    fn eq(field: &Value, expected: &Value) -> bool {
        match (Numeric::from_value(field), Numeric::from_value(expected)) {
            (Some(a), Some(b)) => a.compare_to(b) == Some(Ordering::Equal),
            _ => field == expected,
        }
    }

    /// 有序比较：数值优先，其次时间，最后按字符串字典序
    fn order(field: &Value, expected: &Value) -> Result<Ordering> {
        if let (Some(a), Some(b)) = (Numeric::from_value(field), Numeric::from_value(expected)) {
            if let Some(ordering) = a.compare_to(b) {
                return Ok(ordering);
            }
        }

        match (field, expected) {
            (Value::String(a), Value::String(b)) => {
                match (Self::parse_datetime_str(a), Self::parse_datetime_str(b)) {
                    (Some(ta), Some(tb)) => Ok(ta.cmp(&tb)),
                    _ => Ok(a.cmp(b)),
                }
            }
            (Value::Number(_), other) | (other, Value::Number(_)) => Err(RuleError::TypeMismatch {
                expected: "number".to_string(),
                actual: Self::type_name(other).to_string(),
            }),
            _ => Err(RuleError::TypeMismatch {
                expected: "number or string".to_string(),
                actual: Self::type_name(field).to_string(),
            }),
        }
    }

    fn ordered<F>(field: &Value, expected: &Value, cmp: F) -> Result<bool>
    where
        F: Fn(Ordering) -> bool,
    {
        Self::order(field, expected).map(cmp)
    }

    /// 闭区间判断 min <= field <= max
    fn range(field: &Value, minimum: &Value, maximum: &Value) -> Result<bool> {
        Ok(Self::order(field, minimum)?.is_ge() && Self::order(field, maximum)?.is_le())
    }

    /// 列表包含检查 (in)
    fn in_list(field: &Value, expected: &Value) -> Result<bool> {
        let arr = expected.as_array().ok_or_else(|| RuleError::TypeMismatch {
            expected: "array".to_string(),
            actual: Self::type_name(expected).to_string(),
        })?;

        Ok(arr.iter().any(|item| Self::eq(field, item)))
    }

    /// 字符串子串 / 数组元素包含检查
    fn includes(field: &Value, expected: &Value) -> Result<bool> {
        match field {
            Value::String(s) => {
                let substr = expected.as_str().ok_or_else(|| RuleError::TypeMismatch {
                    expected: "string".to_string(),
                    actual: Self::type_name(expected).to_string(),
                })?;
                Ok(s.contains(substr))
            }
            Value::Array(arr) => Ok(arr.iter().any(|item| Self::eq(item, expected))),
            _ => Err(RuleError::TypeMismatch {
                expected: "string or array".to_string(),
                actual: Self::type_name(field).to_string(),
            }),
        }
    }

    fn string_pair<'a>(field: &'a Value, expected: &'a Value) -> Result<(&'a str, &'a str)> {
        let s = field.as_str().ok_or_else(|| RuleError::TypeMismatch {
            expected: "string".to_string(),
            actual: Self::type_name(field).to_string(),
        })?;

        let other = expected.as_str().ok_or_else(|| RuleError::TypeMismatch {
            expected: "string".to_string(),
            actual: Self::type_name(expected).to_string(),
        })?;

        Ok((s, other))
    }

    fn starts_with(field: &Value, expected: &Value) -> Result<bool> {
        let (s, prefix) = Self::string_pair(field, expected)?;
        Ok(s.starts_with(prefix))
    }

    fn ends_with(field: &Value, expected: &Value) -> Result<bool> {
        let (s, suffix) = Self::string_pair(field, expected)?;
        Ok(s.ends_with(suffix))
    }

    /// 正则表达式匹配
    fn regex_match(field: &Value, expected: &Value) -> Result<bool> {
        let (s, pattern) = Self::string_pair(field, expected)?;
        let regex = Self::compile_pattern(pattern)?;
        Ok(regex.is_match(s))
    }

    fn compile_pattern(pattern: &str) -> Result<Regex> {
        Regex::new(pattern).map_err(|e| RuleError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })
    }

    /// 时间比较
    fn time_compare<F>(field: &Value, expected: &Value, cmp: F) -> Result<bool>
    where
        F: Fn(DateTime<Utc>, DateTime<Utc>) -> bool,
    {
        let field_time = Self::parse_datetime(field)?;
        let expected_time = Self::parse_datetime(expected)?;

        Ok(cmp(field_time, expected_time))
    }

    fn parse_datetime(value: &Value) -> Result<DateTime<Utc>> {
        value
            .as_str()
            .and_then(Self::parse_datetime_str)
            .ok_or_else(|| RuleError::TypeMismatch {
                expected: "datetime string".to_string(),
                actual: match value {
                    Value::String(s) => format!("'{}'", s),
                    other => Self::type_name(other).to_string(),
                },
            })
    }

    /// 解析 RFC 3339 或 YYYY-MM-DD 格式的时间
    fn parse_datetime_str(s: &str) -> Option<DateTime<Utc>> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Some(dt.with_timezone(&Utc));
        }

        NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .ok()
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .map(|dt| dt.and_utc())
    }

    /// 获取值的类型名称
    fn type_name(value: &Value) -> &'static str {
        match value {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn check(subject: Value, operator: &str, operands: &[Value]) -> bool {
        StandardComparator
            .compare(&subject, operator, operands)
            .unwrap()
    }

    #[test]
    fn test_eq_numbers() {
        assert!(check(json!(100), "equal", &[json!(100)]));
        assert!(check(json!(100.0), "equal", &[json!(100)]));
        assert!(check(json!("5"), "equal", &[json!(5)]));
        assert!(check(json!(1), "notequal", &[json!(2)]));
    }

    #[test]
    fn test_eq_strings_and_bools() {
        assert!(check(json!("NJ"), "equal", &[json!("NJ")]));
        assert!(!check(json!("NJ"), "equal", &[json!("NY")]));
        assert!(check(json!(true), "equal", &[json!(true)]));
        assert!(check(json!(null), "equal", &[json!(null)]));
    }

    #[test]
    fn test_numeric_comparisons() {
        assert!(check(json!(21), "greaterthanorequal", &[json!(18)]));
        assert!(!check(json!(10), "greaterthanorequal", &[json!(18)]));
        assert!(check(json!(100), "greaterthan", &[json!(50)]));
        assert!(check(json!(50), "lessthan", &[json!(100)]));
        assert!(check(json!(100), "lessthanorequal", &[json!(100)]));
    }

    #[test]
    fn test_date_string_ordering() {
        assert!(check(
            json!("1992-09-02T00:00:00.000Z"),
            "lessthan",
            &[json!("1993-09-03T00:00:00.000Z")]
        ));
        assert!(check(json!("2024-01-20"), "greaterthan", &[json!("2024-01-15")]));
    }

    #[test]
    fn test_range_inclusive() {
        assert!(check(json!(15), "range", &[json!(1), json!(16)]));
        assert!(check(json!(16), "range", &[json!(1), json!(16)]));
        assert!(!check(json!(17), "range", &[json!(1), json!(16)]));
        assert!(check(json!(17), "notrange", &[json!(1), json!(16)]));
    }

    #[test]
    fn test_range_of_dates() {
        assert!(check(
            json!("1992-09-02T00:00:00.000Z"),
            "range",
            &[json!("1960-01-01T00:00:00.000Z"), json!("1993-09-03T00:00:00.000Z")]
        ));
    }

    #[test]
    fn test_in_list() {
        assert!(check(json!("a"), "in", &[json!(["a", "b", "c"])]));
        assert!(!check(json!("d"), "in", &[json!(["a", "b", "c"])]));
        assert!(check(json!("d"), "notin", &[json!(["a", "b", "c"])]));
    }

    #[test]
    fn test_includes() {
        assert!(check(json!("hello world"), "includes", &[json!("world")]));
        assert!(check(json!(["a", "b", "c"]), "includes", &[json!("b")]));
        assert!(check(json!(["a", "b"]), "notincludes", &[json!("z")]));
    }

    #[test]
    fn test_string_affixes() {
        assert!(check(json!("hello world"), "startswith", &[json!("hello")]));
        assert!(check(json!("hello world"), "endswith", &[json!("world")]));
    }

    #[test]
    fn test_regex() {
        assert!(check(
            json!("user@example.com"),
            "regex",
            &[json!(r"^[\w.-]+@[\w.-]+\.\w+$")]
        ));
    }

    #[test]
    fn test_null_checks() {
        assert!(check(json!(null), "isnull", &[]));
        assert!(!check(json!(0), "isnull", &[]));
        assert!(check(json!(""), "notnull", &[]));
    }

    #[test]
    fn test_time_comparison() {
        assert!(check(
            json!("2024-01-15T10:00:00Z"),
            "before",
            &[json!("2024-01-20T10:00:00Z")]
        ));
        assert!(check(json!("2024-01-20"), "after", &[json!("2024-01-15T10:00:00Z")]));
    }

    #[test]
    fn test_unknown_operator() {
        let result = StandardComparator.compare(&json!(1), "sortof", &[json!(1)]);
        assert!(matches!(result, Err(RuleError::UnknownOperator(_))));
    }

    #[test]
    fn test_wrong_arity() {
        let result = StandardComparator.compare(&json!(1), "range", &[json!(1)]);
        assert!(matches!(
            result,
            Err(RuleError::InvalidOperands {
                expected: 2,
                actual: 1,
                ..
            })
        ));
    }

    #[test]
    fn test_type_mismatch() {
        let result = StandardComparator.compare(&json!({"a": 1}), "greaterthan", &[json!(1)]);
        assert!(matches!(result, Err(RuleError::TypeMismatch { .. })));

        let result = StandardComparator.compare(&json!(1), "in", &[json!("abc")]);
        assert!(matches!(result, Err(RuleError::TypeMismatch { .. })));
    }

    #[test]
    fn test_non_finite_number_words_compare_as_strings() {
        for word in ["Nan", "nan", "NaN", "inf", "Infinity", "-infinity"] {
            assert!(check(json!(word), "equal", &[json!(word)]), "{} == {}", word, word);
            assert!(!check(json!(word), "notequal", &[json!(word)]));
            assert!(!check(json!(word), "lessthan", &[json!(word)]));
        }
        assert!(!check(json!("Nan"), "equal", &[json!("Ann")]));
        assert!(check(json!("Ann"), "lessthan", &[json!("Nan")]));
    }

    #[test]
    fn test_large_integers_compare_exactly() {
        let big = 9_007_199_254_740_993_u64;
        assert!(!check(json!(big), "equal", &[json!(big - 1)]));
        assert!(check(json!(big), "greaterthan", &[json!(big - 1)]));
        assert!(check(json!(u64::MAX), "greaterthan", &[json!(i64::MIN)]));
        assert!(check(json!(big.to_string()), "equal", &[json!(big)]));
    }

    #[test]
    fn test_small_floats_are_not_equal() {
        assert!(!check(json!(1e-20), "equal", &[json!(3e-20)]));
        assert!(check(json!(1e-20), "lessthan", &[json!(3e-20)]));
        assert!(check(json!(0.5), "equal", &[json!("0.5")]));
    }

    #[test]
    fn test_wrong_arity_for_unary_operator() {
        let result = StandardComparator.compare(&json!(1), "equal", &[]);
        assert!(matches!(
            result,
            Err(RuleError::InvalidOperands {
                expected: 1,
                actual: 0,
                ..
            })
        ));

        let result = StandardComparator.compare(&json!(null), "isnull", &[json!(1)]);
        assert!(matches!(result, Err(RuleError::InvalidOperands { .. })));
    }

    #[test]
    fn test_invalid_regex_at_runtime() {
        let result = StandardComparator.compare(&json!("abc"), "regex", &[json!("[invalid")]);
        assert!(matches!(result, Err(RuleError::InvalidPattern { .. })));
    }
}
