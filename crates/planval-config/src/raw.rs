//! 原始配置条目
//!
//! 与配置文件一一对应的serde结构，未经解析与校验。约束字符串
//! （目标剂量、指标）保持原文，由dosimetry的文法解析器处理。

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 配置文件根：一个文件可声明多个模型
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawValidationConfig {
    pub models: Vec<RawModel>,
}

/// 单个模型的原始定义
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawModel {
    /// 模型名称
    pub name: String,
    /// 模型结构条目
    #[serde(default)]
    pub structures: Vec<RawStructure>,
    /// 参与验证的病人
    #[serde(default)]
    pub patients: Vec<RawPatient>,
    /// 指标条目
    #[serde(default)]
    pub metrics: Vec<RawMetric>,
}

/// 模型结构条目
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawStructure {
    /// 模型结构ID
    pub id: String,
    /// 编码标识（用于编码匹配）
    #[serde(default)]
    pub code: String,
    /// 自由格式的目标标记（yes/check/target/...），缺省按非目标处理
    #[serde(default)]
    pub target: Option<String>,
}

/// 病人条目：两侧计划 + 逐目标的原始剂量字符串
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawPatient {
    /// 病人ID
    #[serde(default)]
    pub patient_id: String,
    /// 计划条目（每侧应恰好一条，多余的取首条并告警）
    #[serde(default)]
    pub plans: Vec<RawPlanEntry>,
    /// 目标剂量：模型结构ID -> 原始剂量字符串（如 "7000 cGy"）
    #[serde(default)]
    pub target_doses: BTreeMap<String, String>,
}

/// 计划条目
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawPlanEntry {
    /// 计划角色：model 或 clinical
    pub role: String,
    /// 疗程ID
    pub course: String,
    /// 计划ID
    pub plan: String,
}

/// 指标条目
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawMetric {
    /// 模型结构ID
    pub structure: String,
    /// 指标原始文本（如 "D95%[cGy]"）
    pub metric: String,
}
