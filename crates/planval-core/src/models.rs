//! 核心数据模型定义

use crate::units::DoseValue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// 模型结构定义（来自配置，加载后不可变，以 model_structure_id 为标识）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelStructureDefinition {
    pub model_structure_id: String,
    pub structure_code: String,
    pub is_target: bool,
}

/// 配置中 is_target 字段允许的"真"记号
const TARGET_TOKENS: [&str; 7] = ["yes", "check", "checked", "target", "true", "1", "one"];

impl ModelStructureDefinition {
    pub fn new(
        model_structure_id: impl Into<String>,
        structure_code: impl Into<String>,
        is_target_token: &str,
    ) -> Self {
        let token = is_target_token.to_lowercase();
        Self {
            model_structure_id: model_structure_id.into(),
            structure_code: structure_code.into(),
            is_target: TARGET_TOKENS.contains(&token.as_str()),
        }
    }
}

/// 计划角色：模型生成计划 vs 临床参考计划
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum PlanRole {
    Model,
    Clinical,
}

impl PlanRole {
    pub fn label(&self) -> &'static str {
        match self {
            PlanRole::Model => "Model",
            PlanRole::Clinical => "Clinical",
        }
    }
}

/// 计划引用：疗程ID + 计划ID
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct PlanRef {
    pub course_id: String,
    pub plan_id: String,
}

impl PlanRef {
    pub fn new(course_id: impl Into<String>, plan_id: impl Into<String>) -> Self {
        Self {
            course_id: course_id.into(),
            plan_id: plan_id.into(),
        }
    }
}

impl fmt::Display for PlanRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.course_id, self.plan_id)
    }
}

/// 结构匹配表：计划结构ID -> 模型结构ID
///
/// BTreeMap保证确定性的遍历顺序，每个计划独立构建一张表。
pub type StructureMatch = BTreeMap<String, String>;

/// 目标剂量表：计划结构ID -> 剂量
pub type TargetDoseLevels = BTreeMap<String, DoseValue>;

/// DVH曲线点（剂量，体积）
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct DvhPoint {
    pub dose: f64,
    pub volume: f64,
}

/// 结构显示颜色 (RGB)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct StructureColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

/// DVH估计区间（下界/上界曲线）
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EstimateBand {
    pub lower: Vec<DvhPoint>,
    pub upper: Vec<DvhPoint>,
}

/// 单个结构在某一计划中的曲线数据
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructureCurveData {
    pub model_structure_id: String,
    pub color: StructureColor,
    pub curve: Vec<DvhPoint>,
    pub estimate: Option<EstimateBand>,
}

/// 病人记录
///
/// 单次验证运行中逐阶段充实的快照。流水线各阶段按值接收并返回
/// 更新后的记录，病人之间不共享任何可变状态。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatientRecord {
    pub patient_id: String,
    pub last_name: String,
    pub first_name: String,
    pub model_name: String,
    pub model_plan: PlanRef,
    pub clinical_plan: PlanRef,
    pub model_matches: StructureMatch,
    pub clinical_matches: StructureMatch,
    pub model_structure_data: BTreeMap<String, StructureCurveData>,
    pub clinical_structure_data: BTreeMap<String, StructureCurveData>,
    /// 配置中声明的目标剂量（可能为 UNDEFINED）
    pub target_doses: TargetDoseLevels,
    /// 解析后的目标剂量（UNDEFINED 已回退为计划处方剂量）
    pub resolved_target_doses: TargetDoseLevels,
}

impl PatientRecord {
    pub fn new(
        patient_id: impl Into<String>,
        model_name: impl Into<String>,
        model_plan: PlanRef,
        clinical_plan: PlanRef,
    ) -> Self {
        Self {
            patient_id: patient_id.into(),
            last_name: String::new(),
            first_name: String::new(),
            model_name: model_name.into(),
            model_plan,
            clinical_plan,
            model_matches: StructureMatch::new(),
            clinical_matches: StructureMatch::new(),
            model_structure_data: BTreeMap::new(),
            clinical_structure_data: BTreeMap::new(),
            target_doses: TargetDoseLevels::new(),
            resolved_target_doses: TargetDoseLevels::new(),
        }
    }

    /// 日志用病人标签："Last, First (ID)"，缺姓名时退化为ID
    pub fn label(&self) -> String {
        if self.last_name.is_empty() && self.first_name.is_empty() {
            self.patient_id.clone()
        } else {
            format!("{}, {} ({})", self.last_name, self.first_name, self.patient_id)
        }
    }

    pub fn plan(&self, role: PlanRole) -> &PlanRef {
        match role {
            PlanRole::Model => &self.model_plan,
            PlanRole::Clinical => &self.clinical_plan,
        }
    }

    pub fn matches(&self, role: PlanRole) -> &StructureMatch {
        match role {
            PlanRole::Model => &self.model_matches,
            PlanRole::Clinical => &self.clinical_matches,
        }
    }

    /// 反查：匹配到给定模型结构的首个计划侧结构ID
    pub fn plan_structure_for(&self, role: PlanRole, model_structure_id: &str) -> Option<&str> {
        self.matches(role)
            .iter()
            .find(|(_, model_id)| model_id.as_str() == model_structure_id)
            .map(|(plan_id, _)| plan_id.as_str())
    }
}

/// 指标计算结果
///
/// 每次分析运行重新生成，生成后不再修改。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricResult {
    /// 模型结构ID
    pub structure: String,
    /// 指标原始文本
    pub metric: String,
    pub clinical_value: f64,
    pub model_value: f64,
    /// model_value - clinical_value
    pub difference: f64,
    /// 临床计划中实际参与计算的结构ID
    pub clinical_plan_structure_id: String,
    /// 模型计划中实际参与计算的结构ID
    pub model_plan_structure_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_target_tokens() {
        assert!(ModelStructureDefinition::new("PTV", "PTV1", "yes").is_target);
        assert!(ModelStructureDefinition::new("PTV", "PTV1", "Target").is_target);
        assert!(ModelStructureDefinition::new("PTV", "PTV1", "1").is_target);
        assert!(ModelStructureDefinition::new("PTV", "PTV1", "CHECKED").is_target);
        assert!(!ModelStructureDefinition::new("Bladder", "BLA1", "no").is_target);
        assert!(!ModelStructureDefinition::new("Bladder", "BLA1", "").is_target);
    }

    #[test]
    fn test_plan_structure_reverse_lookup() {
        let mut record = PatientRecord::new(
            "PAT001",
            "HN_Model",
            PlanRef::new("C1", "RapAuto"),
            PlanRef::new("C1", "Clinical"),
        );
        record
            .model_matches
            .insert("PTV_7000".to_string(), "PTV".to_string());
        record
            .model_matches
            .insert("Bladder".to_string(), "BLADDER".to_string());

        assert_eq!(
            record.plan_structure_for(PlanRole::Model, "PTV"),
            Some("PTV_7000")
        );
        assert_eq!(record.plan_structure_for(PlanRole::Model, "Rectum"), None);
    }

    #[test]
    fn test_patient_label() {
        let mut record = PatientRecord::new(
            "PAT001",
            "HN_Model",
            PlanRef::new("C1", "RapAuto"),
            PlanRef::new("C1", "Clinical"),
        );
        assert_eq!(record.label(), "PAT001");
        record.last_name = "Doe".to_string();
        record.first_name = "Jane".to_string();
        assert_eq!(record.label(), "Doe, Jane (PAT001)");
    }
}
