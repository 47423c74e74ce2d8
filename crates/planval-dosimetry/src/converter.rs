//! 剂量单位换算
//!
//! 纯函数换算。cGy与Gy之间为精确的 ×100/÷100；相对剂量(%)的数值
//! 依赖计划的处方剂量，必须由计划引擎解析呈现，不允许在这里与
//! 绝对单位做算术互转。

use planval_core::{DoseUnit, DoseValue, Result, TargetDoseLevels, ValidationError};

/// 剂量换算。涉及 % 或未知单位的跨族换算是语义错误
pub fn convert_dose(value: f64, from: DoseUnit, to: DoseUnit) -> Result<f64> {
    match (from, to) {
        (DoseUnit::CentiGray, DoseUnit::CentiGray)
        | (DoseUnit::Gray, DoseUnit::Gray)
        | (DoseUnit::Percent, DoseUnit::Percent) => Ok(value),
        (DoseUnit::CentiGray, DoseUnit::Gray) => Ok(value / 100.0),
        (DoseUnit::Gray, DoseUnit::CentiGray) => Ok(value * 100.0),
        (from, to) => Err(ValidationError::Domain(format!(
            "cannot convert dose from {from} to {to}"
        ))),
    }
}

/// 将配置的目标剂量重新表达为计划内部的剂量单位
///
/// 单位一致或无法判定（未指定剂量稍后回退为处方剂量）时原样保留。
pub fn convert_to_plan_units(doses: &TargetDoseLevels, plan_unit: DoseUnit) -> TargetDoseLevels {
    doses
        .iter()
        .map(|(structure_id, dose)| {
            let converted = match (dose.unit, plan_unit) {
                (DoseUnit::CentiGray, DoseUnit::Gray) => {
                    DoseValue::new(dose.value / 100.0, DoseUnit::Gray)
                }
                (DoseUnit::Gray, DoseUnit::CentiGray) => {
                    DoseValue::new(dose.value * 100.0, DoseUnit::CentiGray)
                }
                _ => *dose,
            };
            (structure_id.clone(), converted)
        })
        .collect()
}
