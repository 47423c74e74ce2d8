//! 剂量与体积单位定义

use serde::{Deserialize, Serialize};
use std::fmt;

/// 剂量单位
///
/// 绝对单位（cGy/Gy）与相对单位（%）之间不允许算术换算，
/// 相对剂量依赖于计划的处方剂量，必须由计划引擎解析。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum DoseUnit {
    /// 绝对剂量 cGy
    CentiGray,
    /// 绝对剂量 Gy
    Gray,
    /// 相对剂量（处方剂量的百分比）
    Percent,
    /// 未知单位
    Unknown,
}

impl fmt::Display for DoseUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DoseUnit::CentiGray => write!(f, "cGy"),
            DoseUnit::Gray => write!(f, "Gy"),
            DoseUnit::Percent => write!(f, "%"),
            DoseUnit::Unknown => write!(f, "?"),
        }
    }
}

/// 体积单位
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum VolumeUnit {
    /// 相对体积（结构总体积的百分比）
    Percent,
    /// 绝对体积 cc
    CubicCentimeter,
}

impl fmt::Display for VolumeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VolumeUnit::Percent => write!(f, "%"),
            VolumeUnit::CubicCentimeter => write!(f, "cc"),
        }
    }
}

/// 剂量值：数值 + 单位
///
/// `UNDEFINED` 是区别于零剂量的哨兵值，表示"未指定剂量"，
/// 触发回退逻辑（使用计划处方剂量）。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct DoseValue {
    pub value: f64,
    pub unit: DoseUnit,
}

impl DoseValue {
    /// 未指定剂量。数值为NaN，与任何值（包括自身）都不相等
    pub const UNDEFINED: DoseValue = DoseValue {
        value: f64::NAN,
        unit: DoseUnit::Unknown,
    };

    pub fn new(value: f64, unit: DoseUnit) -> Self {
        Self { value, unit }
    }

    /// 判断是否为"未指定"哨兵值，这是唯一可靠的检测方式
    pub fn is_undefined(&self) -> bool {
        self.value.is_nan() && self.unit == DoseUnit::Unknown
    }
}

impl fmt::Display for DoseValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_undefined() {
            write!(f, "undefined")
        } else {
            write!(f, "{} {}", self.value, self.unit)
        }
    }
}
