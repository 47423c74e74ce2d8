//! 验证指标文本解析
//!
//! 文法：`(V|D)<数值><单位>[<结果单位>]` 或 `(Mean|Max|Min)[<结果单位>]`，
//! 大小写不敏感，方括号内的结果单位对所有指标类型都是必填项。
//! 整体不匹配文法是硬性格式错误；匹配成功但单位记号不可识别时，
//! 字段保持未设置并向调用方告警（不中止加载）。

use planval_core::{Result, ValidationError, WarningLog};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 指标查询类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MetricKind {
    Dose,
    Volume,
    Mean,
    Max,
    Min,
}

/// 指标单位（查询单位与结果单位共用）
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MetricUnit {
    Percent,
    CentiGray,
    Gray,
    CubicCentimeter,
    /// 未设置（Mean/Max/Min 的查询单位，或解析失败后的占位）
    NotApplicable,
}

impl fmt::Display for MetricUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricUnit::Percent => write!(f, "%"),
            MetricUnit::CentiGray => write!(f, "cGy"),
            MetricUnit::Gray => write!(f, "Gy"),
            MetricUnit::CubicCentimeter => write!(f, "cc"),
            MetricUnit::NotApplicable => write!(f, "n/a"),
        }
    }
}

/// 验证指标（约束），由文本解析而来，解析后不可变
///
/// 不变式：`query_value` 为 NaN 当且仅当 kind ∈ {Mean, Max, Min}。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metric {
    /// 原始约束文本
    pub original_text: String,
    /// 指标针对的模型结构ID
    pub structure_id: String,
    pub kind: MetricKind,
    pub query_value: f64,
    pub query_unit: MetricUnit,
    pub result_unit: MetricUnit,
}

/// 指标解析器，持有编译好的文法
#[derive(Debug)]
pub struct MetricParser {
    dose_volume: Regex,
    summary: Regex,
}

impl Default for MetricParser {
    fn default() -> Self {
        Self::new()
    }
}

fn unit_from_token(token: &str) -> Option<MetricUnit> {
    match token.to_lowercase().as_str() {
        "%" => Some(MetricUnit::Percent),
        "cgy" => Some(MetricUnit::CentiGray),
        "gy" => Some(MetricUnit::Gray),
        "cc" => Some(MetricUnit::CubicCentimeter),
        _ => None,
    }
}

impl MetricParser {
    pub fn new() -> Self {
        Self {
            dose_volume: Regex::new(r"(?i)^(V|D)\s*(\d+(?:\.\d+)?)\s*([a-z%]+)\s*\[\s*([a-z%]+)\s*\]$")
                .unwrap(),
            summary: Regex::new(r"(?i)^(Mean|Max|Min)\s*\[\s*([a-z%]+)\s*\]$").unwrap(),
        }
    }

    /// 解析单条指标文本
    ///
    /// 单位记号不可识别时对应字段保持 `NotApplicable` 并写入警告日志。
    pub fn parse(
        &self,
        structure_id: &str,
        text: &str,
        log: &mut WarningLog,
    ) -> Result<Metric> {
        if let Some(captures) = self.dose_volume.captures(text) {
            let kind = match captures[1].to_lowercase().as_str() {
                "d" => MetricKind::Dose,
                _ => MetricKind::Volume,
            };
            let query_value: f64 = captures[2].parse().map_err(|_| {
                ValidationError::Format(format!(
                    "invalid query value in constraint {text:?} for structure {structure_id}"
                ))
            })?;
            let query_unit = match unit_from_token(&captures[3]) {
                Some(unit) => unit,
                None => {
                    log.warn(
                        "Invalid Constraint",
                        format!(
                            "Invalid query units {:?} in constraint {text} for structure {structure_id}\nThis may cause incorrect analysis of the validation metrics",
                            &captures[3]
                        ),
                    );
                    MetricUnit::NotApplicable
                }
            };
            let result_unit = match unit_from_token(&captures[4]) {
                Some(unit) => unit,
                None => {
                    log.warn(
                        "Invalid Constraint",
                        format!(
                            "Invalid result units {:?} in constraint {text} for structure {structure_id}\nThis may cause incorrect analysis of the validation metrics",
                            &captures[4]
                        ),
                    );
                    MetricUnit::NotApplicable
                }
            };
            return Ok(Metric {
                original_text: text.to_string(),
                structure_id: structure_id.to_string(),
                kind,
                query_value,
                query_unit,
                result_unit,
            });
        }

        if let Some(captures) = self.summary.captures(text) {
            let kind = match captures[1].to_lowercase().as_str() {
                "mean" => MetricKind::Mean,
                "max" => MetricKind::Max,
                _ => MetricKind::Min,
            };
            let result_unit = match unit_from_token(&captures[2]) {
                Some(unit) => unit,
                None => {
                    log.warn(
                        "Invalid Constraint",
                        format!(
                            "Invalid result units {:?} in constraint {text} for structure {structure_id}\nThis may cause incorrect analysis of the validation metrics",
                            &captures[2]
                        ),
                    );
                    MetricUnit::NotApplicable
                }
            };
            return Ok(Metric {
                original_text: text.to_string(),
                structure_id: structure_id.to_string(),
                kind,
                // Mean/Max/Min 没有自由查询值
                query_value: f64::NAN,
                query_unit: MetricUnit::NotApplicable,
                result_unit,
            });
        }

        Err(ValidationError::Format(format!(
            "invalid dose metric formatting {text:?} for structure {structure_id}"
        )))
    }
}
