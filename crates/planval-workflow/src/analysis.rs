//! 计划分析
//!
//! 对选中病人的两个计划求值全部配置指标。任一侧缺失或为空的结构
//! 静默跳过（逐病人勾画不全是预期情况）；单个结构的求值失败只跳过
//! 该结构并告警，不中断其余分析。

use planval_core::{MetricResult, PatientRecord, PlanRef, PlanRole, Result, WarningLog};
use planval_dosimetry::{DoseMetricCalculator, Metric, MetricKind};
use planval_engine::{PlanningEngine, StructureInfo};
use std::collections::BTreeMap;

pub async fn analyze_plans(
    engine: &dyn PlanningEngine,
    record: &PatientRecord,
    metrics: &[Metric],
    log: &mut WarningLog,
) -> Result<Vec<MetricResult>> {
    let calculator = DoseMetricCalculator::new();
    let model_infos = structure_map(engine.list_structures(&record.model_plan).await?);
    let clinical_infos = structure_map(engine.list_structures(&record.clinical_plan).await?);

    let mut results = Vec::new();
    for metric in metrics {
        let model_sid = record.plan_structure_for(PlanRole::Model, &metric.structure_id);
        let clinical_sid = record.plan_structure_for(PlanRole::Clinical, &metric.structure_id);
        let (Some(model_sid), Some(clinical_sid)) = (model_sid, clinical_sid) else {
            continue;
        };
        if !usable(&model_infos, model_sid) || !usable(&clinical_infos, clinical_sid) {
            continue;
        }

        let model_value =
            evaluate(&calculator, engine, &record.model_plan, model_sid, metric).await;
        let clinical_value =
            evaluate(&calculator, engine, &record.clinical_plan, clinical_sid, metric).await;
        let (model_value, clinical_value) = match (model_value, clinical_value) {
            (Ok(m), Ok(c)) => (m, c),
            (Err(e), _) | (_, Err(e)) => {
                log.warn_for(
                    "Metric Evaluation Skipped",
                    format!("{} on {}: {}", metric.original_text, metric.structure_id, e),
                    Some(record.label()),
                    None,
                );
                continue;
            }
        };

        results.push(MetricResult {
            structure: metric.structure_id.clone(),
            metric: metric.original_text.clone(),
            clinical_value,
            model_value,
            difference: model_value - clinical_value,
            clinical_plan_structure_id: clinical_sid.to_string(),
            model_plan_structure_id: model_sid.to_string(),
        });
    }

    Ok(results)
}

fn structure_map(infos: Vec<StructureInfo>) -> BTreeMap<String, StructureInfo> {
    infos.into_iter().map(|s| (s.id.clone(), s)).collect()
}

fn usable(infos: &BTreeMap<String, StructureInfo>, structure_id: &str) -> bool {
    infos.get(structure_id).is_some_and(|s| !s.is_empty)
}

async fn evaluate(
    calculator: &DoseMetricCalculator,
    engine: &dyn PlanningEngine,
    plan: &PlanRef,
    structure_id: &str,
    metric: &Metric,
) -> Result<f64> {
    match metric.kind {
        MetricKind::Dose => {
            calculator
                .dose_at_volume(
                    engine,
                    plan,
                    structure_id,
                    metric.query_value,
                    metric.query_unit,
                    metric.result_unit,
                )
                .await
        }
        MetricKind::Volume => {
            calculator
                .volume_at_dose(
                    engine,
                    plan,
                    structure_id,
                    metric.query_value,
                    metric.query_unit,
                    metric.result_unit,
                )
                .await
        }
        MetricKind::Mean => {
            calculator
                .mean_dose(engine, plan, structure_id, metric.result_unit)
                .await
        }
        MetricKind::Max => {
            calculator
                .max_dose(engine, plan, structure_id, metric.result_unit)
                .await
        }
        MetricKind::Min => {
            calculator
                .min_dose(engine, plan, structure_id, metric.result_unit)
                .await
        }
    }
}
