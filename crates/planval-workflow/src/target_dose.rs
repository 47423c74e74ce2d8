//! 目标剂量解析
//!
//! 为每个目标模型结构确定处方剂量，并裁剪掉没有可用剂量的目标匹配，
//! 保证提交给模型估计的目标结构都带有剂量。

use planval_core::{
    DoseValue, ModelStructureDefinition, StructureMatch, TargetDoseLevels, WarningLog,
};

/// 解析目标剂量：计划结构ID -> 剂量
///
/// 配置剂量按模型结构ID查找；缺失或Undefined回退为计划处方总剂量
/// 并告警。没有计划侧匹配的目标结构跳过并告警。
pub fn resolve_target_doses(
    plan_total_dose: DoseValue,
    matches: &StructureMatch,
    configured: &TargetDoseLevels,
    model_structures: &[ModelStructureDefinition],
    patient_label: &str,
    plan_label: &str,
    log: &mut WarningLog,
) -> TargetDoseLevels {
    let mut resolved = TargetDoseLevels::new();

    for target in model_structures.iter().filter(|m| m.is_target) {
        let plan_structure = matches
            .iter()
            .find(|(_, model_id)| model_id.as_str() == target.model_structure_id)
            .map(|(plan_id, _)| plan_id.clone());

        let Some(plan_structure) = plan_structure else {
            log.warn_for(
                "Target Not Matched",
                format!(
                    "target structure {} has no matched plan structure; skipping its dose level",
                    target.model_structure_id
                ),
                Some(patient_label.to_string()),
                Some(plan_label.to_string()),
            );
            continue;
        };

        let configured_dose = configured
            .get(&target.model_structure_id)
            .copied()
            .unwrap_or(DoseValue::UNDEFINED);

        let dose = if configured_dose.is_undefined() {
            log.warn_for(
                "Dose Level Not Specified",
                format!(
                    "no dose level configured for target structure {}; using plan total dose {}",
                    target.model_structure_id, plan_total_dose
                ),
                Some(patient_label.to_string()),
                Some(plan_label.to_string()),
            );
            plan_total_dose
        } else {
            configured_dose
        };

        resolved.insert(plan_structure, dose);
    }

    resolved
}

/// 裁剪没有解析剂量的目标匹配
///
/// 非目标匹配原样保留。
pub fn prune_non_target_matches(
    matches: &StructureMatch,
    model_structures: &[ModelStructureDefinition],
    resolved: &TargetDoseLevels,
    patient_label: &str,
    plan_label: &str,
    log: &mut WarningLog,
) -> StructureMatch {
    let mut pruned = StructureMatch::new();

    for (plan_id, model_id) in matches {
        let is_target = model_structures
            .iter()
            .any(|m| &m.model_structure_id == model_id && m.is_target);
        if is_target && !resolved.contains_key(plan_id) {
            log.warn_for(
                "Target Match Pruned",
                format!(
                    "dropping match {} -> {}: no resolvable dose level for the target",
                    plan_id, model_id
                ),
                Some(patient_label.to_string()),
                Some(plan_label.to_string()),
            );
            continue;
        }
        pruned.insert(plan_id.clone(), model_id.clone());
    }

    pruned
}
