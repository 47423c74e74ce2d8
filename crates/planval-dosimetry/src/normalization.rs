//! 计划归一化
//!
//! 用目标结构 D98%（相对体积，相对剂量）把模型计划对齐到临床计划。

use planval_core::{PlanRef, Result, ValidationError};
use planval_engine::{DosePresentation, PlanningEngine, VolumePresentation};

/// 归一化参考体积（相对体积百分比）
const REFERENCE_VOLUME_PERCENT: f64 = 98.0;

/// 计算模型计划的归一化因子
///
/// 因子 = 模型目标D98%（相对剂量） / 临床目标D98%（相对剂量） × 100。
/// 临床侧分母为零或非有限值视为语义错误。
pub async fn normalization_factor(
    engine: &dyn PlanningEngine,
    model_plan: &PlanRef,
    model_target_id: &str,
    clinical_plan: &PlanRef,
    clinical_target_id: &str,
) -> Result<f64> {
    let model_dose = reference_dose(engine, model_plan, model_target_id).await?;
    let clinical_dose = reference_dose(engine, clinical_plan, clinical_target_id).await?;

    if !clinical_dose.is_finite() || clinical_dose == 0.0 {
        return Err(ValidationError::Domain(format!(
            "cannot normalize plan {model_plan}: clinical reference dose for structure \
             {clinical_target_id} in plan {clinical_plan} is {clinical_dose}"
        )));
    }

    Ok(model_dose / clinical_dose * 100.0)
}

async fn reference_dose(
    engine: &dyn PlanningEngine,
    plan: &PlanRef,
    structure_id: &str,
) -> Result<f64> {
    let dose = engine
        .dose_at_volume(
            plan,
            structure_id,
            REFERENCE_VOLUME_PERCENT,
            VolumePresentation::Relative,
            DosePresentation::Relative,
        )
        .await
        .map_err(|e| {
            ValidationError::Calculation(format!(
                "unable to calculate normalization reference dose for structure {structure_id} \
                 in plan {plan}: {e}"
            ))
        })?;
    Ok(dose.value)
}
