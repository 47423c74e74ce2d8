//! 目标剂量文本解析
//!
//! 文法：`<数值>[.<小数>]<可选空白><单位>`，单位 ∈ {cc, %, cGy, Gy}，
//! 大小写不敏感。目标剂量必须解析为绝对剂量，cc 与 % 虽然匹配文法
//! 但在这里是非法单位，同样报格式错误。

use planval_core::{DoseUnit, DoseValue, Result, ValidationError};
use regex::Regex;

/// 目标剂量解析器，持有编译好的文法
#[derive(Debug)]
pub struct DoseLevelParser {
    grammar: Regex,
}

impl Default for DoseLevelParser {
    fn default() -> Self {
        Self::new()
    }
}

impl DoseLevelParser {
    pub fn new() -> Self {
        Self {
            grammar: Regex::new(r"(?i)^\s*(\d+(?:\.\d+)?)\s*(cc|%|cGy|Gy)\s*$").unwrap(),
        }
    }

    /// 解析目标剂量文本
    ///
    /// 未给出文本（或全空白）不是错误，返回 `DoseValue::UNDEFINED`，
    /// 表示稍后回退为计划处方剂量。
    pub fn parse(&self, text: Option<&str>) -> Result<DoseValue> {
        let text = match text {
            Some(t) if !t.trim().is_empty() => t,
            _ => return Ok(DoseValue::UNDEFINED),
        };

        let captures = self.grammar.captures(text).ok_or_else(|| {
            ValidationError::Format(format!("invalid target dose level formatting: {text:?}"))
        })?;

        let value: f64 = captures[1].parse().map_err(|_| {
            ValidationError::Format(format!("invalid target dose value in {text:?}"))
        })?;

        match captures[2].to_lowercase().as_str() {
            "cgy" => Ok(DoseValue::new(value, DoseUnit::CentiGray)),
            "gy" => Ok(DoseValue::new(value, DoseUnit::Gray)),
            unit => Err(ValidationError::Format(format!(
                "invalid target dose unit {unit:?} in {text:?}, a dose level must be cGy or Gy"
            ))),
        }
    }
}
