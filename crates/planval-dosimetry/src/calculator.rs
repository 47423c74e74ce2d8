//! 剂量指标求值
//!
//! 在（计划，结构）对上求值 Dose/Volume/Mean/Max/Min 查询，按请求的
//! 结果单位返回标量。所有DVH查询委托计划引擎；引擎的任何失败都统一
//! 包装为计算错误并携带计划/结构上下文，不把底层错误直接抛给调用方。

use crate::metric::MetricUnit;
use planval_core::{DoseUnit, DoseValue, PlanRef, Result, ValidationError};
use planval_engine::{DosePresentation, PlanningEngine, VolumePresentation};

/// 系统内部绝对剂量单位
const SYSTEM_DOSE_UNIT: DoseUnit = DoseUnit::CentiGray;

/// Mean/Max/Min 查询的累积DVH体积分辨率（cc）
const DVH_BIN_WIDTH: f64 = 0.01;

#[derive(Debug, Clone, Copy)]
enum SummaryField {
    Mean,
    Max,
    Min,
}

impl SummaryField {
    fn name(&self) -> &'static str {
        match self {
            SummaryField::Mean => "mean dose",
            SummaryField::Max => "maximum dose",
            SummaryField::Min => "minimum dose",
        }
    }
}

fn calculation_error(
    operation: &str,
    plan: &PlanRef,
    structure_id: &str,
    cause: impl std::fmt::Display,
) -> ValidationError {
    ValidationError::Calculation(format!(
        "unable to calculate {operation} for structure {structure_id} in plan {plan}: {cause}"
    ))
}

fn volume_presentation_for(unit: MetricUnit) -> VolumePresentation {
    if unit == MetricUnit::Percent {
        VolumePresentation::Relative
    } else {
        VolumePresentation::AbsoluteCm3
    }
}

fn dose_presentation_for(unit: MetricUnit) -> DosePresentation {
    if unit == MetricUnit::Percent {
        DosePresentation::Relative
    } else {
        DosePresentation::Absolute
    }
}

/// Dose/Volume 查询的结果换算：相对剂量按引擎呈现原样传递
fn convert_dose_result(
    dose: DoseValue,
    requested: MetricUnit,
    plan: &PlanRef,
    structure_id: &str,
) -> Result<f64> {
    match (dose.unit, requested) {
        (DoseUnit::CentiGray, MetricUnit::CentiGray) | (DoseUnit::Gray, MetricUnit::Gray) => {
            Ok(dose.value)
        }
        (DoseUnit::CentiGray, MetricUnit::Gray) => Ok(dose.value / 100.0),
        (DoseUnit::Gray, MetricUnit::CentiGray) => Ok(dose.value * 100.0),
        (DoseUnit::Percent, _) => Ok(dose.value),
        (unit, requested) => Err(calculation_error(
            "dose at volume",
            plan,
            structure_id,
            format!("invalid dose units {unit} for requested {requested}"),
        )),
    }
}

/// Mean/Max/Min 的结果换算：相对剂量只接受相对请求，严于 Dose/Volume 路径
fn convert_summary_result(
    dose: DoseValue,
    requested: MetricUnit,
    field: SummaryField,
    plan: &PlanRef,
    structure_id: &str,
) -> Result<f64> {
    match (dose.unit, requested) {
        (DoseUnit::CentiGray, MetricUnit::CentiGray)
        | (DoseUnit::Gray, MetricUnit::Gray)
        | (DoseUnit::Percent, MetricUnit::Percent) => Ok(dose.value),
        (DoseUnit::CentiGray, MetricUnit::Gray) => Ok(dose.value / 100.0),
        (DoseUnit::Gray, MetricUnit::CentiGray) => Ok(dose.value * 100.0),
        (unit, requested) => Err(calculation_error(
            field.name(),
            plan,
            structure_id,
            format!("could not convert dose units from {unit} to {requested}"),
        )),
    }
}

/// 剂量指标计算器
#[derive(Debug, Default)]
pub struct DoseMetricCalculator;

impl DoseMetricCalculator {
    pub fn new() -> Self {
        Self
    }

    /// 给定体积处的剂量，按 result_unit 返回
    pub async fn dose_at_volume(
        &self,
        engine: &dyn PlanningEngine,
        plan: &PlanRef,
        structure_id: &str,
        volume: f64,
        volume_unit: MetricUnit,
        result_unit: MetricUnit,
    ) -> Result<f64> {
        let dvh_result = engine
            .dose_at_volume(
                plan,
                structure_id,
                volume,
                volume_presentation_for(volume_unit),
                dose_presentation_for(result_unit),
            )
            .await
            .map_err(|e| calculation_error("dose at volume", plan, structure_id, e))?;

        convert_dose_result(dvh_result, result_unit, plan, structure_id)
    }

    /// 给定剂量处的体积，按 result_unit 的体积呈现返回
    ///
    /// 查询剂量先换算到系统内部单位再交给引擎。
    pub async fn volume_at_dose(
        &self,
        engine: &dyn PlanningEngine,
        plan: &PlanRef,
        structure_id: &str,
        dose: f64,
        dose_unit: MetricUnit,
        result_unit: MetricUnit,
    ) -> Result<f64> {
        let query_unit = match dose_unit {
            MetricUnit::CentiGray => DoseUnit::CentiGray,
            MetricUnit::Gray => DoseUnit::Gray,
            MetricUnit::Percent => DoseUnit::Percent,
            _ => DoseUnit::Unknown,
        };
        let query = convert_to_system_units(DoseValue::new(dose, query_unit), plan, structure_id)?;

        engine
            .volume_at_dose(plan, structure_id, query, volume_presentation_for(result_unit))
            .await
            .map_err(|e| calculation_error("volume at dose", plan, structure_id, e))
    }

    pub async fn mean_dose(
        &self,
        engine: &dyn PlanningEngine,
        plan: &PlanRef,
        structure_id: &str,
        result_unit: MetricUnit,
    ) -> Result<f64> {
        self.summary_dose(engine, plan, structure_id, result_unit, SummaryField::Mean)
            .await
    }

    pub async fn max_dose(
        &self,
        engine: &dyn PlanningEngine,
        plan: &PlanRef,
        structure_id: &str,
        result_unit: MetricUnit,
    ) -> Result<f64> {
        self.summary_dose(engine, plan, structure_id, result_unit, SummaryField::Max)
            .await
    }

    pub async fn min_dose(
        &self,
        engine: &dyn PlanningEngine,
        plan: &PlanRef,
        structure_id: &str,
        result_unit: MetricUnit,
    ) -> Result<f64> {
        self.summary_dose(engine, plan, structure_id, result_unit, SummaryField::Min)
            .await
    }

    /// Mean/Max/Min 共用路径：请求固定分辨率的累积DVH再取字段
    async fn summary_dose(
        &self,
        engine: &dyn PlanningEngine,
        plan: &PlanRef,
        structure_id: &str,
        result_unit: MetricUnit,
        field: SummaryField,
    ) -> Result<f64> {
        let dvh = engine
            .cumulative_dvh(
                plan,
                structure_id,
                dose_presentation_for(result_unit),
                VolumePresentation::AbsoluteCm3,
                DVH_BIN_WIDTH,
            )
            .await
            .map_err(|e| calculation_error(field.name(), plan, structure_id, e))?;

        let dose = match field {
            SummaryField::Mean => dvh.mean_dose,
            SummaryField::Max => dvh.max_dose,
            SummaryField::Min => dvh.min_dose,
        };
        convert_summary_result(dose, result_unit, field, plan, structure_id)
    }
}

/// 把查询剂量换算到系统内部单位；相对剂量由引擎解析，原样传递
fn convert_to_system_units(dose: DoseValue, plan: &PlanRef, structure_id: &str) -> Result<DoseValue> {
    if dose.unit == SYSTEM_DOSE_UNIT || dose.unit == DoseUnit::Percent {
        return Ok(dose);
    }
    match dose.unit {
        DoseUnit::Gray => Ok(DoseValue::new(dose.value * 100.0, DoseUnit::CentiGray)),
        unit => Err(calculation_error(
            "volume at dose",
            plan,
            structure_id,
            format!("invalid dose units {unit}, could not convert to system dose units {SYSTEM_DOSE_UNIT}"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use planval_core::{DvhPoint, StructureColor};
    use planval_engine::{
        PatientFixture, PlanFixture, ScriptedEngine, StructureFixture, StructureInfo,
    };

    fn test_engine() -> (ScriptedEngine, PlanRef) {
        let plan = PlanRef::new("C1", "RapAuto");
        let mut fixture = PlanFixture::new(plan.clone(), 7000.0);
        fixture.structures.insert(
            "PTV_7000".to_string(),
            StructureFixture {
                info: StructureInfo {
                    id: "PTV_7000".to_string(),
                    codes: vec!["PTV1".to_string()],
                    dicom_type: "PTV".to_string(),
                    is_empty: false,
                    color: StructureColor { r: 255, g: 0, b: 0 },
                },
                curve: vec![
                    DvhPoint { dose: 0.0, volume: 100.0 },
                    DvhPoint { dose: 6800.0, volume: 98.0 },
                    DvhPoint { dose: 7000.0, volume: 50.0 },
                    DvhPoint { dose: 7200.0, volume: 0.0 },
                ],
                volume_cc: 200.0,
                mean_dose_cgy: 7000.0,
                max_dose_cgy: 7200.0,
                min_dose_cgy: 6500.0,
            },
        );
        let patient = PatientFixture {
            patient_id: "PAT001".to_string(),
            last_name: "Doe".to_string(),
            first_name: "Jane".to_string(),
            plans: vec![fixture],
        };
        (ScriptedEngine::new(vec![patient]), plan)
    }

    #[tokio::test]
    async fn test_dose_at_volume_in_requested_units() {
        let (engine, plan) = test_engine();
        engine.open_patient("PAT001").await.unwrap();
        let calc = DoseMetricCalculator::new();

        let cgy = calc
            .dose_at_volume(&engine, &plan, "PTV_7000", 98.0, MetricUnit::Percent, MetricUnit::CentiGray)
            .await
            .unwrap();
        assert!((cgy - 6800.0).abs() < 1e-9);

        // 引擎返回计划单位(cGy)，计算器负责换算到Gy
        let gy = calc
            .dose_at_volume(&engine, &plan, "PTV_7000", 98.0, MetricUnit::Percent, MetricUnit::Gray)
            .await
            .unwrap();
        assert!((gy - 68.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_percent_dose_result_passes_through() {
        let (engine, plan) = test_engine();
        engine.open_patient("PAT001").await.unwrap();
        let calc = DoseMetricCalculator::new();

        let percent = calc
            .dose_at_volume(&engine, &plan, "PTV_7000", 98.0, MetricUnit::Percent, MetricUnit::Percent)
            .await
            .unwrap();
        assert!((percent - 6800.0 / 7000.0 * 100.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_volume_at_dose_converts_query_to_system_units() {
        let (engine, plan) = test_engine();
        engine.open_patient("PAT001").await.unwrap();
        let calc = DoseMetricCalculator::new();

        let from_gy = calc
            .volume_at_dose(&engine, &plan, "PTV_7000", 68.0, MetricUnit::Gray, MetricUnit::Percent)
            .await
            .unwrap();
        let from_cgy = calc
            .volume_at_dose(&engine, &plan, "PTV_7000", 6800.0, MetricUnit::CentiGray, MetricUnit::Percent)
            .await
            .unwrap();
        assert!((from_gy - 98.0).abs() < 1e-9);
        assert!((from_gy - from_cgy).abs() < 1e-9);

        // 绝对体积请求
        let cc = calc
            .volume_at_dose(&engine, &plan, "PTV_7000", 6800.0, MetricUnit::CentiGray, MetricUnit::CubicCentimeter)
            .await
            .unwrap();
        assert!((cc - 196.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_summary_doses() {
        let (engine, plan) = test_engine();
        engine.open_patient("PAT001").await.unwrap();
        let calc = DoseMetricCalculator::new();

        let mean = calc
            .mean_dose(&engine, &plan, "PTV_7000", MetricUnit::CentiGray)
            .await
            .unwrap();
        assert!((mean - 7000.0).abs() < 1e-9);

        let max_gy = calc
            .max_dose(&engine, &plan, "PTV_7000", MetricUnit::Gray)
            .await
            .unwrap();
        assert!((max_gy - 72.0).abs() < 1e-9);

        // Mean/Max/Min 的百分比路径走相对剂量呈现的DVH
        let min_percent = calc
            .min_dose(&engine, &plan, "PTV_7000", MetricUnit::Percent)
            .await
            .unwrap();
        assert!((min_percent - 6500.0 / 7000.0 * 100.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_engine_failure_becomes_calculation_error() {
        let (engine, plan) = test_engine();
        engine.open_patient("PAT001").await.unwrap();
        let calc = DoseMetricCalculator::new();

        let result = calc
            .mean_dose(&engine, &plan, "Missing", MetricUnit::CentiGray)
            .await;
        assert!(matches!(result, Err(ValidationError::Calculation(_))));
    }

    #[tokio::test]
    async fn test_unknown_query_unit_is_calculation_error() {
        let (engine, plan) = test_engine();
        engine.open_patient("PAT001").await.unwrap();
        let calc = DoseMetricCalculator::new();

        let result = calc
            .volume_at_dose(&engine, &plan, "PTV_7000", 50.0, MetricUnit::NotApplicable, MetricUnit::Percent)
            .await;
        assert!(matches!(result, Err(ValidationError::Calculation(_))));
    }
}
