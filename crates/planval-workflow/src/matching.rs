//! 结构匹配
//!
//! 把计划中的解剖结构匹配到模型声明的结构标识。编码匹配优先于
//! ID匹配；候选多于一个时取模型结构的配置顺序首位，这一平局
//! 策略是有意固定的行为。

use planval_core::{ModelStructureDefinition, StructureMatch, WarningLog};
use planval_engine::StructureInfo;
use std::collections::BTreeSet;

/// 不参与匹配的DICOM解剖类别
const SKIPPED_DICOM_TYPES: [&str; 2] = ["SUPPORT", "MARKER"];

/// 为单个计划建立 计划结构ID -> 模型结构ID 的匹配表
pub fn match_structures(
    plan_structures: &[StructureInfo],
    model_structures: &[ModelStructureDefinition],
    patient_label: &str,
    plan_label: &str,
    log: &mut WarningLog,
) -> StructureMatch {
    let mut matches = StructureMatch::new();

    for structure in plan_structures {
        if structure.is_empty {
            continue;
        }
        if SKIPPED_DICOM_TYPES
            .iter()
            .any(|t| structure.dicom_type.eq_ignore_ascii_case(t))
        {
            continue;
        }

        // 编码匹配，按模型结构的配置顺序
        let code_matches: Vec<&ModelStructureDefinition> = model_structures
            .iter()
            .filter(|m| {
                !m.structure_code.is_empty()
                    && structure.codes.iter().any(|c| c == &m.structure_code)
            })
            .collect();

        if let Some(first) = code_matches.first() {
            if code_matches.len() > 1 {
                log.warn_for(
                    "Multiple Structure Matches",
                    format!(
                        "structure {} matches {} model structures by code; using {}",
                        structure.id,
                        code_matches.len(),
                        first.model_structure_id
                    ),
                    Some(patient_label.to_string()),
                    Some(plan_label.to_string()),
                );
            }
            matches.insert(structure.id.clone(), first.model_structure_id.clone());
            continue;
        }

        // 退而求其次：ID精确匹配
        if let Some(by_id) = model_structures
            .iter()
            .find(|m| m.model_structure_id == structure.id)
        {
            matches.insert(structure.id.clone(), by_id.model_structure_id.clone());
        }
    }

    if matches.len() != model_structures.len() {
        let matched_models: BTreeSet<&str> = matches.values().map(String::as_str).collect();
        let unmatched: Vec<&str> = model_structures
            .iter()
            .map(|m| m.model_structure_id.as_str())
            .filter(|id| !matched_models.contains(id))
            .collect();
        log.warn_for(
            "Unmatched Model Structures",
            format!(
                "no plan structure matched model structures: {}",
                unmatched.join(", ")
            ),
            Some(patient_label.to_string()),
            Some(plan_label.to_string()),
        );
    }

    matches
}
