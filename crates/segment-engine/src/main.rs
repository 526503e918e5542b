//! 分群评估命令行工具
//!
//! 读取分群配置文件与状态记录文件，输出评估结果 JSON。
//!
//! ```bash
//! # 单个分群：输出配置对象、false 或 { message, error }
//! segment-eval --segments adult.json --state user.json
//!
//! # 多个分群：输出第一个命中的分群，--all 输出全部命中
//! segment-eval --segments segments.json --state user.json --all
//!
//! # --trace：输出 { result, reports }，reports 为每个分群的评估报告
//! segment-eval --segments segments.json --state user.json --trace
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use segment_engine::{
    EvaluationReport, SegmentCompiler, SegmentConfig, SegmentExecutor, SegmentStore,
};
use segment_shared::config::AppConfig;
use segment_shared::observability;
use serde::Serialize;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// 人群分群规则评估工具
#[derive(Parser, Debug)]
#[command(name = "segment-eval")]
#[command(version, about = "人群分群规则评估工具")]
struct Cli {
    /// 分群配置文件（单个配置对象或配置数组）
    #[arg(short, long)]
    segments: PathBuf,

    /// 状态记录文件
    #[arg(long)]
    state: PathBuf,

    /// 输出全部命中的分群（数组）
    #[arg(short, long)]
    all: bool,

    /// 同时输出每个分群的逐条件评估报告
    #[arg(short, long)]
    trace: bool,
}

/// 启用追踪时的输出
#[derive(Serialize)]
struct TracedOutput {
    result: Value,
    reports: Vec<EvaluationReport>,
}

fn read_json(path: &Path) -> Result<Value> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("无法读取文件: {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("无效的 JSON: {}", path.display()))
}

/// 编译并评估分群，返回要输出的 JSON
///
/// 单个配置对象按单分群处理，结果可能是失败信息；配置数组按注册顺序选择，失败的分群被跳过。
fn evaluate(segments: Value, state: &Value, all: bool, trace: bool) -> Result<Value> {
    let mut executor = SegmentExecutor::new();
    if trace {
        executor = executor.with_trace();
    }

    let (result, reports) = match segments {
        Value::Array(items) => {
            let configs = items
                .into_iter()
                .map(serde_json::from_value)
                .collect::<std::result::Result<Vec<SegmentConfig>, _>>()
                .context("分群配置格式错误")?;

            let store = SegmentStore::with_executor(executor);
            store.load_all(configs).context("分群编译失败")?;
            info!(segments = store.len(), "Segments compiled");

            let result = if all {
                serde_json::to_value(store.select_all(state, None))?
            } else {
                serde_json::to_value(store.select_first(state, None))?
            };
            let reports = if trace {
                store.evaluate_all_with_report(state, None)
            } else {
                Vec::new()
            };
            (result, reports)
        }
        single => {
            let predicate = SegmentCompiler::new()
                .compile_value(single)
                .context("分群编译失败")?;
            info!(segment = %predicate.name(), "Segment compiled");

            let report = executor.evaluate_with_report(&predicate, state, None);
            let result = if all {
                if let Some(failure) = report.outcome.failure() {
                    warn!(
                        segment = %predicate.name(),
                        message = %failure.message,
                        "分群评估失败，已跳过"
                    );
                }
                serde_json::to_value(report.outcome.segment().into_iter().collect::<Vec<_>>())?
            } else {
                serde_json::to_value(&report.outcome)?
            };
            let reports = if trace { vec![report] } else { Vec::new() };
            (result, reports)
        }
    };

    if trace {
        Ok(serde_json::to_value(TracedOutput { result, reports })?)
    } else {
        Ok(result)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load("segment-eval").unwrap_or_else(|e| {
        eprintln!("Failed to load config, using defaults: {}", e);
        AppConfig::default()
    });
    observability::init(&config.observability)?;

    let segments = read_json(&cli.segments)?;
    let state = read_json(&cli.state)?;

    let output = evaluate(
        segments,
        &state,
        cli.all,
        cli.trace || config.engine.trace_enabled,
    )?;
    println!("{}", serde_json::to_string_pretty(&output)?);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn segments() -> Value {
        json!([
            {
                "name": "senior",
                "conditions": [{
                    "variable_name": "age",
                    "condition_test": "greaterthanorequal",
                    "value_comparison": 65
                }]
            },
            {
                "name": "needs_income",
                "conditions": [{
                    "variable_name": "income",
                    "condition_test": "greaterthan",
                    "value_comparison": 0
                }]
            },
            {
                "name": "adult",
                "conditions": [{
                    "variable_name": "age",
                    "condition_test": "greaterthanorequal",
                    "value_comparison": 18
                }]
            },
            {
                "name": "everyone",
                "conditions": []
            }
        ])
    }

    fn adult() -> Value {
        segments()[2].clone()
    }

    #[test]
    fn test_cli_parse() {
        // 默认参数
        let cli = Cli::parse_from(["segment-eval", "-s", "segments.json", "--state", "user.json"]);
        assert_eq!(cli.segments, PathBuf::from("segments.json"));
        assert_eq!(cli.state, PathBuf::from("user.json"));
        assert!(!cli.all);
        assert!(!cli.trace);

        // 全部开关
        let cli = Cli::parse_from([
            "segment-eval",
            "--segments",
            "segments.json",
            "--state",
            "user.json",
            "--all",
            "--trace",
        ]);
        assert!(cli.all);
        assert!(cli.trace);
    }

    #[test]
    fn test_cli_requires_state() {
        assert!(Cli::try_parse_from(["segment-eval", "-s", "segments.json"]).is_err());
    }

    #[test]
    fn test_batch_first_match() {
        let output = evaluate(segments(), &json!({ "age": 30 }), false, false).unwrap();
        assert_eq!(output, adult());
    }

    #[test]
    fn test_batch_all_matches() {
        let output = evaluate(segments(), &json!({ "age": 30 }), true, false).unwrap();
        assert_eq!(output, json!([adult(), segments()[3].clone()]));
    }

    #[test]
    fn test_batch_trace_reports_every_segment() {
        let output = evaluate(segments(), &json!({ "age": 30 }), true, true).unwrap();

        assert_eq!(output["result"].as_array().unwrap().len(), 2);
        let reports = output["reports"].as_array().unwrap();
        let names: Vec<&str> = reports
            .iter()
            .map(|r| r["segment_name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["senior", "needs_income", "adult", "everyone"]);
        assert_eq!(
            reports[1]["outcome"]["message"],
            "The Variable income is required by a Rule but is not defined."
        );
    }

    #[test]
    fn test_single_segment_outcomes() {
        assert_eq!(
            evaluate(adult(), &json!({ "age": 30 }), false, false).unwrap(),
            adult()
        );
        assert_eq!(
            evaluate(adult(), &json!({ "age": 10 }), false, false).unwrap(),
            json!(false)
        );
        assert_eq!(
            evaluate(adult(), &json!({}), false, false).unwrap(),
            json!({
                "message": "The Variable age is required by a Rule but is not defined.",
                "error": ""
            })
        );
    }

    #[test]
    fn test_single_segment_all() {
        assert_eq!(
            evaluate(adult(), &json!({ "age": 30 }), true, false).unwrap(),
            json!([adult()])
        );
        assert_eq!(
            evaluate(adult(), &json!({}), true, false).unwrap(),
            json!([])
        );
    }

    #[test]
    fn test_single_segment_trace() {
        let output = evaluate(adult(), &json!({ "age": 30 }), false, true).unwrap();

        assert_eq!(output["result"], adult());
        assert_eq!(output["reports"][0]["segment_name"], "adult");
        assert_eq!(output["reports"][0]["matched_conditions"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_compile_error_is_reported() {
        let err = evaluate(json!({ "name": "broken" }), &json!({}), false, false).unwrap_err();
        assert!(err.to_string().contains("分群编译失败"));

        let err = evaluate(json!([]), &json!({}), false, false).unwrap_err();
        assert!(err.to_string().contains("分群编译失败"));
    }
}
