//! # PlanVal 剂量学模块
//!
//! 提供验证所需的全部定量组件：
//! - 剂量单位换算（纯函数）
//! - 约束文法解析：目标剂量文本与指标文本
//! - 剂量指标求值（委托计划引擎查询DVH）
//! - 计划归一化因子计算

pub mod calculator;
pub mod converter;
pub mod dose_level;
pub mod metric;
pub mod normalization;

pub use calculator::DoseMetricCalculator;
pub use converter::{convert_dose, convert_to_plan_units};
pub use dose_level::DoseLevelParser;
pub use metric::{Metric, MetricKind, MetricParser, MetricUnit};
pub use normalization::normalization_factor;
