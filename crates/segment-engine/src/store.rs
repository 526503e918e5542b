//! 分群存储与选择
//!
//! 按名称索引编译后的分群，保留注册顺序，提供首个命中 / 全部命中两种选择方式。
//! 评估时先取快照再释放锁，评估过程中不持有锁。

use crate::compiler::SegmentCompiler;
use crate::error::{Result, RuleError};
use crate::executor::{EvaluationReport, SegmentExecutor};
use crate::models::{EvaluationContext, Outcome, SegmentConfig};
use crate::program::CompiledPredicate;
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// 分群存储
#[derive(Clone)]
pub struct SegmentStore {
    /// 编译后的分群，按注册顺序排列
    segments: Arc<RwLock<IndexMap<String, Arc<CompiledPredicate>>>>,
    compiler: SegmentCompiler,
    executor: SegmentExecutor,
}

impl SegmentStore {
    /// 创建空的分群存储
    pub fn new() -> Self {
        Self::with_executor(SegmentExecutor::new())
    }

    /// 使用指定执行器创建分群存储
    pub fn with_executor(executor: SegmentExecutor) -> Self {
        Self {
            segments: Arc::new(RwLock::new(IndexMap::new())),
            compiler: SegmentCompiler::new(),
            executor,
        }
    }

    /// 批量编译分群配置
    ///
    /// 配置列表为空时失败；任一配置编译失败则整体失败。
    /// 同名配置后者覆盖前者，但保留前者的注册位置。
    pub fn compile_all(configs: Vec<SegmentConfig>) -> Result<Self> {
        let store = Self::new();
        store.load_all(configs)?;
        Ok(store)
    }

    /// 从 JSON 批量编译，接受单个配置对象或配置数组
    pub fn compile_all_from_json(json: &str) -> Result<Self> {
        let configs = match serde_json::from_str::<Value>(json)? {
            Value::Array(items) => items
                .into_iter()
                .map(serde_json::from_value)
                .collect::<std::result::Result<Vec<SegmentConfig>, _>>()?,
            Value::Null => Vec::new(),
            other => vec![serde_json::from_value(other)?],
        };
        Self::compile_all(configs)
    }

    /// 编译并加载一批配置
    #[instrument(skip(self, configs), fields(count = configs.len()))]
    pub fn load_all(&self, configs: Vec<SegmentConfig>) -> Result<Vec<String>> {
        if configs.is_empty() {
            return Err(RuleError::NoConfigurations);
        }

        let compiled = configs
            .into_iter()
            .map(|config| self.compiler.compile(config))
            .collect::<Result<Vec<_>>>()?;

        let mut names = Vec::with_capacity(compiled.len());
        let mut segments = self.segments.write();
        for predicate in compiled {
            let name = predicate.name().to_string();
            if segments.insert(name.clone(), Arc::new(predicate)).is_some() {
                warn!("分群名称重复，已覆盖: {}", name);
            }
            names.push(name);
        }

        info!("批量加载完成: {} 个分群", names.len());
        Ok(names)
    }

    /// 获取当前存储的分群数量
    pub fn len(&self) -> usize {
        self.segments.read().len()
    }

    /// 检查存储是否为空
    pub fn is_empty(&self) -> bool {
        self.segments.read().is_empty()
    }

    /// 加载分群
    #[instrument(skip(self, config), fields(segment = %config.name))]
    pub fn load(&self, config: SegmentConfig) -> Result<()> {
        let predicate = self.compiler.compile(config)?;
        let name = predicate.name().to_string();
        self.segments.write().insert(name.clone(), Arc::new(predicate));

        info!("分群已加载: {}", name);
        Ok(())
    }

    /// 加载分群（从 JSON 字符串）
    #[instrument(skip(self, json))]
    pub fn load_from_json(&self, json: &str) -> Result<String> {
        let predicate = self.compiler.compile_from_json(json)?;
        let name = predicate.name().to_string();
        self.segments.write().insert(name.clone(), Arc::new(predicate));

        info!("分群已加载: {}", name);
        Ok(name)
    }

    /// 删除分群，其余分群保持原有顺序
    #[instrument(skip(self))]
    pub fn remove(&self, name: &str) -> Result<()> {
        if self.segments.write().shift_remove(name).is_some() {
            info!("分群已删除: {}", name);
            Ok(())
        } else {
            warn!("删除不存在的分群: {}", name);
            Err(RuleError::SegmentNotFound(name.to_string()))
        }
    }

    /// 获取分群
    pub fn get(&self, name: &str) -> Option<Arc<CompiledPredicate>> {
        self.segments.read().get(name).cloned()
    }

    /// 检查分群是否存在
    pub fn contains(&self, name: &str) -> bool {
        self.segments.read().contains_key(name)
    }

    /// 按注册顺序获取所有分群名称
    pub fn names(&self) -> Vec<String> {
        self.segments.read().keys().cloned().collect()
    }

    /// 清空所有分群
    #[instrument(skip(self))]
    pub fn clear(&self) {
        let mut segments = self.segments.write();
        let count = segments.len();
        segments.clear();
        info!("已清空 {} 个分群", count);
    }

    /// 评估指定分群
    pub fn evaluate(&self, name: &str, input: &Value, state: Option<&Value>) -> Result<Outcome> {
        let predicate = self
            .get(name)
            .ok_or_else(|| RuleError::SegmentNotFound(name.to_string()))?;
        Ok(self.executor.evaluate(&predicate, input, state))
    }

    /// 按注册顺序返回第一个命中的分群
    ///
    /// 评估失败的分群记录告警后跳过，不视为命中；全部未命中时返回 `Outcome::NotMatched`。
    pub fn select_first(&self, input: &Value, state: Option<&Value>) -> Outcome {
        let context = EvaluationContext::resolve(input, state);

        for predicate in self.snapshot() {
            match self.executor.evaluate_context(&predicate, &context) {
                outcome @ Outcome::Matched(_) => return outcome,
                Outcome::NotMatched => {}
                Outcome::Failed(failure) => {
                    warn!(
                        segment = %predicate.name(),
                        message = %failure.message,
                        "分群评估失败，已跳过"
                    );
                }
            }
        }

        Outcome::NotMatched
    }

    /// 按注册顺序返回所有命中的分群
    pub fn select_all(&self, input: &Value, state: Option<&Value>) -> Vec<Arc<SegmentConfig>> {
        let context = EvaluationContext::resolve(input, state);

        self.snapshot()
            .into_iter()
            .filter_map(
                |predicate| match self.executor.evaluate_context(&predicate, &context) {
                    Outcome::Matched(segment) => Some(segment),
                    Outcome::NotMatched => None,
                    Outcome::Failed(failure) => {
                        warn!(
                            segment = %predicate.name(),
                            message = %failure.message,
                            "分群评估失败，已跳过"
                        );
                        None
                    }
                },
            )
            .collect()
    }

    /// 按注册顺序生成每个分群的评估报告，失败的分群同样包含在内
    pub fn evaluate_all_with_report(
        &self,
        input: &Value,
        state: Option<&Value>,
    ) -> Vec<EvaluationReport> {
        self.snapshot()
            .iter()
            .map(|predicate| self.executor.evaluate_with_report(predicate, input, state))
            .collect()
    }

    /// 当前分群的快照
    fn snapshot(&self) -> Vec<Arc<CompiledPredicate>> {
        self.segments.read().values().cloned().collect()
    }

    /// 获取分群统计信息
    pub fn stats(&self) -> SegmentStoreStats {
        let segments = self.segments.read();
        let segments_count = segments.len();
        let total_conditions: usize = segments.values().map(|s| s.conditions().len()).sum();
        let total_groups: usize = segments.values().map(|s| s.groups().len()).sum();

        SegmentStoreStats {
            segments_count,
            total_conditions,
            total_groups,
            avg_conditions_per_segment: if segments_count > 0 {
                total_conditions as f64 / segments_count as f64
            } else {
                0.0
            },
        }
    }
}

impl Default for SegmentStore {
    fn default() -> Self {
        Self::new()
    }
}

/// 分群存储统计信息
#[derive(Debug, Clone)]
pub struct SegmentStoreStats {
    /// 分群总数
    pub segments_count: usize,
    /// 所有分群的条件总数
    pub total_conditions: usize,
    /// 所有分群的 OR 组总数
    pub total_groups: usize,
    /// 平均每个分群的条件数
    pub avg_conditions_per_segment: f64,
}
