//! 分群谓词执行器
//!
//! 在隔离的状态副本上按配置顺序执行全部条件（不短路，确保每个条件的必需字段检查都会运行），
//! 返回命中 / 未命中 / 失败三种结果之一。

use crate::comparator::{Comparator, StandardComparator};
use crate::error::{Result, RuleError};
use crate::models::{EvaluationContext, EvaluationFailure, Outcome};
use crate::program::{CompiledCondition, CompiledPredicate, Route};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// 评估报告（启用追踪时使用）
#[derive(Debug, Clone, Serialize)]
pub struct EvaluationReport {
    pub segment_name: String,
    pub outcome: Outcome,
    pub matched_conditions: Vec<String>,
    pub evaluation_trace: Vec<String>,
    pub evaluation_time_us: u64,
}

/// 单次评估的结果累加器
struct Accumulator {
    passes: Vec<bool>,
    groups: Vec<Vec<bool>>,
}

impl Accumulator {
    fn new(group_count: usize) -> Self {
        Self {
            passes: Vec::new(),
            groups: vec![Vec::new(); group_count],
        }
    }

    fn push(&mut self, route: Route, passed: bool) {
        match route {
            Route::AndGroup => self.passes.push(passed),
            Route::OrGroup(index) => self.groups[index].push(passed),
        }
    }

    /// AND 列表全部为真，且每个 OR 组至少一个为真
    fn verdict(&self) -> bool {
        self.passes.iter().all(|p| *p) && self.groups.iter().all(|g| g.iter().any(|p| *p))
    }
}

/// 分群谓词执行器
#[derive(Clone)]
pub struct SegmentExecutor {
    comparator: Arc<dyn Comparator>,
    /// 是否记录详细评估追踪
    trace_enabled: bool,
}

impl SegmentExecutor {
    pub fn new() -> Self {
        Self::with_comparator(Arc::new(StandardComparator))
    }

    /// 使用自定义比较器
    pub fn with_comparator(comparator: Arc<dyn Comparator>) -> Self {
        Self {
            comparator,
            trace_enabled: false,
        }
    }

    /// 启用评估追踪
    pub fn with_trace(mut self) -> Self {
        self.trace_enabled = true;
        self
    }

    pub fn trace_enabled(&self) -> bool {
        self.trace_enabled
    }

    /// 评估分群
    ///
    /// `state` 为对象时作为状态记录，否则使用 `input`。调用方的数据只会被读取和拷贝。
    pub fn evaluate(
        &self,
        predicate: &CompiledPredicate,
        input: &Value,
        state: Option<&Value>,
    ) -> Outcome {
        let context = EvaluationContext::resolve(input, state);
        self.evaluate_context(predicate, &context)
    }

    /// 在已解析的上下文上评估
    pub fn evaluate_context(
        &self,
        predicate: &CompiledPredicate,
        context: &EvaluationContext,
    ) -> Outcome {
        let outcome = self.finish(predicate, self.run(predicate, context, None));
        debug!(
            segment = %predicate.name(),
            matched = outcome.is_match(),
            failed = outcome.is_failure(),
            "分群评估完成"
        );
        outcome
    }

    /// 评估并生成报告
    ///
    /// 未启用追踪时报告中只有结果与耗时。
    pub fn evaluate_with_report(
        &self,
        predicate: &CompiledPredicate,
        input: &Value,
        state: Option<&Value>,
    ) -> EvaluationReport {
        let start = Instant::now();
        let context = EvaluationContext::resolve(input, state);

        let mut report = EvaluationReport {
            segment_name: predicate.name().to_string(),
            outcome: Outcome::NotMatched,
            matched_conditions: Vec::new(),
            evaluation_trace: Vec::new(),
            evaluation_time_us: 0,
        };

        let result = self.run(predicate, &context, Some(&mut report));
        if let Err(e) = &result {
            if self.trace_enabled {
                report.evaluation_trace.push(format!("评估中止: {}", e));
            }
        }

        report.outcome = self.finish(predicate, result);
        report.evaluation_time_us =
            u64::try_from(start.elapsed().as_micros()).unwrap_or(u64::MAX);
        report
    }

    /// 把执行结果转换为对外的评估结果，错误在此边界转为数据
    fn finish(&self, predicate: &CompiledPredicate, result: Result<bool>) -> Outcome {
        match result {
            Ok(true) => Outcome::Matched(Arc::clone(predicate.segment())),
            Ok(false) => Outcome::NotMatched,
            Err(e) => Outcome::Failed(EvaluationFailure::from(e)),
        }
    }

    /// 按配置顺序执行所有条件并汇总
    fn run(
        &self,
        predicate: &CompiledPredicate,
        context: &EvaluationContext,
        mut report: Option<&mut EvaluationReport>,
    ) -> Result<bool> {
        let mut acc = Accumulator::new(predicate.groups().len());

        for cond in predicate.conditions() {
            let passed = self.evaluate_condition(cond, context)?;
            acc.push(cond.route, passed);

            if let Some(report) = report.as_deref_mut() {
                self.record(predicate, cond, passed, report);
            }
        }

        let verdict = acc.verdict();

        if self.trace_enabled {
            if let Some(report) = report.as_deref_mut() {
                let and_passed = acc.passes.iter().all(|p| *p);
                report.evaluation_trace.push(format!(
                    "AND 组 ({} 个条件) => {}",
                    acc.passes.len(),
                    if and_passed { "MATCHED" } else { "NOT_MATCHED" }
                ));
                for (name, results) in predicate.groups().iter().zip(&acc.groups) {
                    let any = results.iter().any(|p| *p);
                    report.evaluation_trace.push(format!(
                        "OR 组 '{}' ({} 个条件) => {}",
                        name,
                        results.len(),
                        if any { "MATCHED" } else { "NOT_MATCHED" }
                    ));
                }
            }
        }

        Ok(verdict)
    }

    /// 执行单个条件：先做必需字段检查，再调用比较器
    fn evaluate_condition(
        &self,
        cond: &CompiledCondition,
        context: &EvaluationContext,
    ) -> Result<bool> {
        let subject = context
            .get_field(&cond.subject)
            .ok_or_else(|| RuleError::MissingVariable(cond.subject.clone()))?;

        let operands = cond
            .operands
            .iter()
            .map(|slot| {
                slot.operand
                    .as_ref()
                    .and_then(|operand| operand.resolve(context))
                    .cloned()
                    .ok_or_else(|| RuleError::MissingVariable(slot.label.clone()))
            })
            .collect::<Result<Vec<Value>>>()?;

        self.comparator
            .compare(subject, &cond.operator, &operands)
            .map_err(|e| match e {
                RuleError::MissingVariable(_) | RuleError::OperatorFailure { .. } => e,
                other => RuleError::OperatorFailure {
                    operator: cond.operator.clone(),
                    detail: other.to_string(),
                },
            })
    }

    fn record(
        &self,
        predicate: &CompiledPredicate,
        cond: &CompiledCondition,
        passed: bool,
        report: &mut EvaluationReport,
    ) {
        let group = match cond.route {
            Route::AndGroup => "AND".to_string(),
            Route::OrGroup(index) => format!("OR '{}'", predicate.groups()[index]),
        };
        let labels: Vec<&str> = cond.operands.iter().map(|s| s.label.as_str()).collect();
        let description = format!(
            "conditions[{}] [{}]: {} {} [{}]",
            cond.index,
            group,
            cond.subject,
            cond.operator,
            labels.join(", ")
        );

        if self.trace_enabled {
            report.evaluation_trace.push(format!(
                "{} => {}",
                description,
                if passed { "MATCHED" } else { "NOT_MATCHED" }
            ));
        }

        if passed {
            report.matched_conditions.push(description);
        }
    }
}

impl Default for SegmentExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SegmentExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentExecutor")
            .field("trace_enabled", &self.trace_enabled)
            .finish_non_exhaustive()
    }
}
