//! DVH序列整形
//!
//! 把病人记录中的曲线数据整理成绘图协作方可直接消费的序列：
//! 每个结构每个计划角色一条曲线，临床侧虚线；模型侧附带估计区间。
//! 这里只整形数据，不做任何渲染。

use planval_core::{
    DvhPoint, DoseUnit, PatientRecord, PlanRole, Result, StructureColor, StructureCurveData,
};
use planval_engine::PlanningEngine;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 体积轴固定上限（相对体积 %）
pub const VOLUME_AXIS_MAX: f64 = 100.0;

/// 曲线线型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum LineStyle {
    Solid,
    Dashed,
}

/// 单条DVH曲线序列
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DvhSeries {
    pub model_structure_id: String,
    pub role: PlanRole,
    pub label: String,
    pub color: StructureColor,
    pub line_style: LineStyle,
    pub points: Vec<DvhPoint>,
}

/// 估计区间序列（下界/上界）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EstimateBandSeries {
    pub model_structure_id: String,
    pub lower: Vec<DvhPoint>,
    pub upper: Vec<DvhPoint>,
}

/// 从病人记录整形全部曲线与估计区间序列
pub fn shape_series(record: &PatientRecord) -> (Vec<DvhSeries>, Vec<EstimateBandSeries>) {
    let mut series = Vec::new();
    let mut bands = Vec::new();

    for (role, data) in [
        (PlanRole::Model, &record.model_structure_data),
        (PlanRole::Clinical, &record.clinical_structure_data),
    ] {
        series.extend(shape_role(role, data));
    }

    for data in record.model_structure_data.values() {
        // 单点区间没有可画的面积
        if let Some(band) = &data.estimate {
            if band.lower.len() > 1 && band.upper.len() > 1 {
                bands.push(EstimateBandSeries {
                    model_structure_id: data.model_structure_id.clone(),
                    lower: band.lower.clone(),
                    upper: band.upper.clone(),
                });
            }
        }
    }

    (series, bands)
}

fn shape_role(
    role: PlanRole,
    data: &BTreeMap<String, StructureCurveData>,
) -> Vec<DvhSeries> {
    let line_style = match role {
        PlanRole::Model => LineStyle::Solid,
        PlanRole::Clinical => LineStyle::Dashed,
    };
    data.values()
        .map(|d| DvhSeries {
            model_structure_id: d.model_structure_id.clone(),
            role,
            label: format!("{} ({})", d.model_structure_id, role.label()),
            color: d.color,
            line_style,
            points: d.curve.clone(),
        })
        .collect()
}

/// 剂量轴上限：两计划三维最大剂量中的较大者
///
/// 百分比形式的最大剂量按该计划处方总剂量换回绝对值再比较。
pub async fn dose_axis_max(engine: &dyn PlanningEngine, record: &PatientRecord) -> Result<f64> {
    let mut axis_max: f64 = 0.0;
    for plan in [&record.model_plan, &record.clinical_plan] {
        let max_dose = engine.max_dose_3d(plan).await?;
        let absolute = if max_dose.unit == DoseUnit::Percent {
            let total = engine.total_prescribed_dose(plan).await?;
            max_dose.value / 100.0 * total.value
        } else {
            max_dose.value
        };
        axis_max = axis_max.max(absolute);
    }
    Ok(axis_max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use planval_core::{EstimateBand, PlanRef};

    fn curve_data(model_id: &str, with_band: bool) -> StructureCurveData {
        StructureCurveData {
            model_structure_id: model_id.to_string(),
            color: StructureColor { r: 255, g: 0, b: 0 },
            curve: vec![
                DvhPoint { dose: 0.0, volume: 100.0 },
                DvhPoint { dose: 7000.0, volume: 0.0 },
            ],
            estimate: with_band.then(|| EstimateBand {
                lower: vec![
                    DvhPoint { dose: 0.0, volume: 95.0 },
                    DvhPoint { dose: 6900.0, volume: 0.0 },
                ],
                upper: vec![
                    DvhPoint { dose: 0.0, volume: 100.0 },
                    DvhPoint { dose: 7100.0, volume: 0.0 },
                ],
            }),
        }
    }

    #[test]
    fn test_labels_and_line_styles() {
        let mut record = PatientRecord::new(
            "PAT001",
            "Prostate",
            PlanRef::new("C1", "RapAuto"),
            PlanRef::new("C1", "Clinical"),
        );
        record
            .model_structure_data
            .insert("PTV_7000".to_string(), curve_data("PTV", true));
        record
            .clinical_structure_data
            .insert("PTV_7000".to_string(), curve_data("PTV", false));

        let (series, bands) = shape_series(&record);
        assert_eq!(series.len(), 2);

        let model = series.iter().find(|s| s.role == PlanRole::Model).unwrap();
        assert_eq!(model.label, "PTV (Model)");
        assert_eq!(model.line_style, LineStyle::Solid);

        let clinical = series.iter().find(|s| s.role == PlanRole::Clinical).unwrap();
        assert_eq!(clinical.label, "PTV (Clinical)");
        assert_eq!(clinical.line_style, LineStyle::Dashed);

        assert_eq!(bands.len(), 1);
        assert_eq!(bands[0].model_structure_id, "PTV");
    }

    #[test]
    fn test_single_point_band_is_dropped() {
        let mut record = PatientRecord::new(
            "PAT001",
            "Prostate",
            PlanRef::new("C1", "RapAuto"),
            PlanRef::new("C1", "Clinical"),
        );
        let mut data = curve_data("PTV", true);
        data.estimate = Some(EstimateBand {
            lower: vec![DvhPoint { dose: 0.0, volume: 95.0 }],
            upper: vec![DvhPoint { dose: 0.0, volume: 100.0 }],
        });
        record.model_structure_data.insert("PTV_7000".to_string(), data);

        let (_, bands) = shape_series(&record);
        assert!(bands.is_empty());
    }

    #[tokio::test]
    async fn test_dose_axis_max_takes_larger_plan_maximum() {
        use planval_engine::{PatientFixture, PlanFixture, ScriptedEngine};

        let model_plan = PlanRef::new("C1", "RapAuto");
        let clinical_plan = PlanRef::new("C1", "Clinical");
        let mut model = PlanFixture::new(model_plan.clone(), 7000.0);
        model.max_dose_3d_cgy = 7560.0;
        let mut clinical = PlanFixture::new(clinical_plan.clone(), 7000.0);
        clinical.max_dose_3d_cgy = 7200.0;
        let engine = ScriptedEngine::new(vec![PatientFixture {
            patient_id: "PAT001".to_string(),
            last_name: "Doe".to_string(),
            first_name: "Jane".to_string(),
            plans: vec![model, clinical],
        }]);
        engine.open_patient("PAT001").await.unwrap();

        let record = PatientRecord::new("PAT001", "Prostate", model_plan, clinical_plan);
        let axis_max = dose_axis_max(&engine, &record).await.unwrap();
        assert!((axis_max - 7560.0).abs() < 1e-9);
    }
}
