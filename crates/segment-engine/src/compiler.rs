//! 分群规则编译器
//!
//! 将条件列表编译成不可变的 `CompiledPredicate`：为每个条件生成必需字段检查，
//! 解析字面量与变量引用，并把结果路由到全局 AND 列表或命名 OR 组。

use crate::error::{Result, RuleError};
use crate::models::{Condition, SegmentConfig, ValueType};
use crate::operators::{LogicalOperator, is_null_test, is_range_test, normalize_test_name};
use crate::program::{CompiledCondition, CompiledPredicate, Operand, OperandSlot, Route};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

/// 分群规则编译器
///
/// 编译是纯函数：同一配置总是得到等价的谓词。
#[derive(Debug, Clone, Copy, Default)]
pub struct SegmentCompiler;

impl SegmentCompiler {
    pub fn new() -> Self {
        Self
    }

    /// 从 JSON 字符串编译分群
    pub fn compile_from_json(&self, json: &str) -> Result<CompiledPredicate> {
        let segment: SegmentConfig = serde_json::from_str(json)?;
        self.compile(segment)
    }

    /// 从 JSON 值编译分群
    pub fn compile_value(&self, value: Value) -> Result<CompiledPredicate> {
        let segment: SegmentConfig = serde_json::from_value(value)?;
        self.compile(segment)
    }

    /// 编译分群
    pub fn compile(&self, segment: impl Into<Arc<SegmentConfig>>) -> Result<CompiledPredicate> {
        let segment = segment.into();

        if segment.name.trim().is_empty() {
            return Err(RuleError::CompileError("分群名称不能为空".to_string()));
        }

        let mut groups: Vec<String> = Vec::new();
        let mut required_fields = BTreeSet::new();
        let mut conditions = Vec::with_capacity(segment.conditions.len());

        for (index, cond) in segment.conditions.iter().enumerate() {
            let compiled = self.compile_condition(index, cond, &mut groups)?;

            required_fields.insert(compiled.subject.clone());
            for slot in &compiled.operands {
                if let Some(Operand::Variable(name)) = &slot.operand {
                    required_fields.insert(name.clone());
                }
            }

            conditions.push(compiled);
        }

        debug!(
            segment = %segment.name,
            conditions = conditions.len(),
            groups = groups.len(),
            "分群已编译"
        );

        Ok(CompiledPredicate {
            segment,
            conditions,
            groups,
            required_fields,
        })
    }

    /// 编译单个条件
    fn compile_condition(
        &self,
        index: usize,
        cond: &Condition,
        groups: &mut Vec<String>,
    ) -> Result<CompiledCondition> {
        let path = format!("conditions[{}]", index);

        if cond.variable_name.trim().is_empty() {
            return Err(RuleError::CompileError(format!(
                "条件 '{}' 的 variable_name 不能为空",
                path
            )));
        }

        let operator = normalize_test_name(&cond.condition_test);
        if operator.is_empty() {
            return Err(RuleError::CompileError(format!(
                "条件 '{}' 的 condition_test 不能为空",
                path
            )));
        }

        let operands = if is_range_test(&operator) {
            vec![
                self.operand_slot(
                    &cond.value_minimum,
                    cond.value_minimum_type,
                    "value_minimum",
                    &path,
                )?,
                self.operand_slot(
                    &cond.value_maximum,
                    cond.value_maximum_type,
                    "value_maximum",
                    &path,
                )?,
            ]
        } else if is_null_test(&operator) {
            Vec::new()
        } else {
            vec![self.operand_slot(
                &cond.value_comparison,
                cond.value_comparison_type,
                "value_comparison",
                &path,
            )?]
        };

        let route = match cond.rule_type {
            LogicalOperator::And => Route::AndGroup,
            LogicalOperator::Or => {
                let rule_name = cond
                    .rule_name
                    .as_deref()
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .ok_or_else(|| {
                        RuleError::CompileError(format!(
                            "条件 '{}' 的 rule_type 为 or 时必须提供 rule_name",
                            path
                        ))
                    })?;

                let position = match groups.iter().position(|g| g == rule_name) {
                    Some(position) => position,
                    None => {
                        groups.push(rule_name.to_string());
                        groups.len() - 1
                    }
                };
                Route::OrGroup(position)
            }
        };

        Ok(CompiledCondition {
            index,
            subject: cond.variable_name.clone(),
            operator,
            operands,
            route,
        })
    }

    /// 解析操作数槽位
    ///
    /// 变量引用只接受非空字符串或数字；字面量原样保留。
    fn operand_slot(
        &self,
        value: &Option<Value>,
        value_type: ValueType,
        field: &str,
        path: &str,
    ) -> Result<OperandSlot> {
        let Some(value) = value else {
            return Ok(OperandSlot {
                operand: None,
                label: field.to_string(),
            });
        };

        match value_type {
            ValueType::Literal => Ok(OperandSlot {
                label: match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                },
                operand: Some(Operand::Literal(value.clone())),
            }),
            ValueType::Variable => {
                let name = match value {
                    Value::String(s) if !s.trim().is_empty() => s.clone(),
                    Value::Number(n) => n.to_string(),
                    other => {
                        return Err(RuleError::CompileError(format!(
                            "条件 '{}' 的 {} 为变量引用，需要非空字符串，实际为 {}",
                            path, field, other
                        )));
                    }
                };
                Ok(OperandSlot {
                    label: name.clone(),
                    operand: Some(Operand::Variable(name)),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_segment_json() -> &'static str {
        r#"
        {
            "name": "segment_1",
            "conditions": [
                {
                    "variable_name": "age",
                    "condition_test": "Range",
                    "value_minimum": "ageMin",
                    "value_minimum_type": "variable",
                    "value_maximum": "ageMax",
                    "value_maximum_type": "variable",
                    "rule_type": "AND"
                },
                {
                    "variable_name": "state",
                    "condition_test": "Equal",
                    "value_comparison": "NJ",
                    "value_comparison_type": "literal",
                    "rule_type": "OR",
                    "rule_name": "location"
                },
                {
                    "variable_name": "state",
                    "condition_test": "Equal",
                    "value_comparison": "NY",
                    "rule_type": "or",
                    "rule_name": "location"
                },
                {
                    "variable_name": "dob",
                    "condition_test": "Is Not Null",
                    "rule_type": "or",
                    "rule_name": "identity"
                }
            ]
        }
        "#
    }

    #[test]
    fn test_compile_from_json() {
        let compiled = SegmentCompiler::new()
            .compile_from_json(sample_segment_json())
            .unwrap();

        assert_eq!(compiled.name(), "segment_1");
        assert_eq!(compiled.conditions().len(), 4);
        assert_eq!(compiled.groups(), &["location".to_string(), "identity".to_string()]);

        let fields: Vec<&str> = compiled.required_fields().iter().map(String::as_str).collect();
        assert_eq!(fields, vec!["age", "ageMax", "ageMin", "dob", "state"]);
    }

    #[test]
    fn test_routing_and_operands() {
        let compiled = SegmentCompiler::new()
            .compile_from_json(sample_segment_json())
            .unwrap();
        let conditions = compiled.conditions();

        assert_eq!(conditions[0].route, Route::AndGroup);
        assert_eq!(conditions[0].operator, "range");
        assert_eq!(
            conditions[0].operands[0].operand,
            Some(Operand::Variable("ageMin".into()))
        );

        assert_eq!(conditions[1].route, Route::OrGroup(0));
        assert_eq!(conditions[2].route, Route::OrGroup(0));
        assert_eq!(
            conditions[2].operands[0].operand,
            Some(Operand::Literal(json!("NY")))
        );

        assert_eq!(conditions[3].route, Route::OrGroup(1));
        assert_eq!(conditions[3].operator, "isnotnull");
        assert!(conditions[3].operands.is_empty());
    }

    #[test]
    fn test_missing_values_become_labelled_slots() {
        let segment = SegmentConfig::new(
            "missing",
            vec![
                Condition::new("age", "range"),
                Condition::new("age", "equal"),
            ],
        );

        let compiled = SegmentCompiler::new().compile(segment).unwrap();

        let range = &compiled.conditions()[0];
        assert_eq!(range.operands.len(), 2);
        assert_eq!(range.operands[0].operand, None);
        assert_eq!(range.operands[0].label, "value_minimum");
        assert_eq!(range.operands[1].label, "value_maximum");

        assert_eq!(compiled.conditions()[1].operands[0].label, "value_comparison");
    }

    #[test]
    fn test_literals_keep_native_types() {
        let segment = SegmentConfig::new(
            "typed",
            vec![
                Condition::new("tags", "includes").literal("vip"),
                Condition::new("plan", "in").literal(json!(["gold", "silver"])),
                Condition::new("profile", "equal").literal(json!({ "tier": 1 })),
                Condition::new("count", "equal").literal(3),
            ],
        );

        let compiled = SegmentCompiler::new().compile(segment).unwrap();
        let literals: Vec<_> = compiled
            .conditions()
            .iter()
            .map(|c| c.operands[0].operand.clone())
            .collect();

        assert_eq!(
            literals,
            vec![
                Some(Operand::Literal(json!("vip"))),
                Some(Operand::Literal(json!(["gold", "silver"]))),
                Some(Operand::Literal(json!({ "tier": 1 }))),
                Some(Operand::Literal(json!(3))),
            ]
        );
    }

    #[test]
    fn test_empty_conditions_compile() {
        let compiled = SegmentCompiler::new()
            .compile(SegmentConfig::new("everyone", vec![]))
            .unwrap();
        assert!(compiled.conditions().is_empty());
        assert!(compiled.groups().is_empty());
    }

    #[test]
    fn test_missing_conditions_fails() {
        let result = SegmentCompiler::new().compile_value(json!({ "name": "broken" }));
        assert!(matches!(result, Err(RuleError::JsonError(_))));
    }

    #[test]
    fn test_conditions_not_array_fails() {
        let result =
            SegmentCompiler::new().compile_value(json!({ "name": "broken", "conditions": 5 }));
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_name_fails() {
        let result = SegmentCompiler::new().compile(SegmentConfig::new(" ", vec![]));
        assert!(matches!(result, Err(RuleError::CompileError(_))));
    }

    #[test]
    fn test_blank_condition_test_fails() {
        let segment = SegmentConfig::new("s", vec![Condition::new("age", "  ").literal(1)]);
        let err = SegmentCompiler::new().compile(segment).unwrap_err();
        assert!(err.to_string().contains("condition_test"));
    }

    #[test]
    fn test_blank_variable_name_fails() {
        let segment = SegmentConfig::new("s", vec![Condition::new("", "equal").literal(1)]);
        let err = SegmentCompiler::new().compile(segment).unwrap_err();
        assert!(err.to_string().contains("variable_name"));
    }

    #[test]
    fn test_or_without_rule_name_fails() {
        let mut cond = Condition::new("age", "equal").literal(1);
        cond.rule_type = LogicalOperator::Or;

        let result = SegmentCompiler::new().compile(SegmentConfig::new("s", vec![cond]));
        assert!(matches!(result, Err(RuleError::CompileError(msg)) if msg.contains("rule_name")));
    }

    #[test]
    fn test_non_string_variable_reference_fails() {
        let mut cond = Condition::new("age", "equal").literal(true);
        cond.value_comparison_type = ValueType::Variable;

        let result = SegmentCompiler::new().compile(SegmentConfig::new("s", vec![cond]));
        assert!(matches!(result, Err(RuleError::CompileError(_))));
    }

    #[test]
    fn test_invalid_value_type_fails() {
        let result = SegmentCompiler::new().compile_value(json!({
            "name": "s",
            "conditions": [{
                "variable_name": "age",
                "condition_test": "equal",
                "value_comparison": 1,
                "value_comparison_type": "constant"
            }]
        }));
        assert!(matches!(result, Err(RuleError::JsonError(_))));
    }

    #[test]
    fn test_literal_type_is_not_checked_at_compile_time() {
        let segment = SegmentConfig::new(
            "s",
            vec![
                Condition::new("plan", "in").literal("gold"),
                Condition::new("plan", "notin").literal(5),
                Condition::new("email", "regex").literal("[invalid"),
                Condition::new("email", "regex").literal(42),
            ],
        );
        let compiled = SegmentCompiler::new().compile(segment).unwrap();
        assert_eq!(compiled.conditions().len(), 4);
    }

    #[test]
    fn test_unknown_operator_compiles() {
        let segment =
            SegmentConfig::new("s", vec![Condition::new("age", "Sort Of").literal(1)]);
        let compiled = SegmentCompiler::new().compile(segment).unwrap();
        assert_eq!(compiled.conditions()[0].operator, "sortof");
    }

    #[test]
    fn test_compile_is_deterministic() {
        let compiler = SegmentCompiler::new();
        let a = compiler.compile_from_json(sample_segment_json()).unwrap();
        let b = compiler.compile_from_json(sample_segment_json()).unwrap();

        assert_eq!(a.conditions(), b.conditions());
        assert_eq!(a.groups(), b.groups());
        assert_eq!(a.segment(), b.segment());
    }
}
