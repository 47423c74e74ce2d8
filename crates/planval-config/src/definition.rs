//! 模型定义的解析与静态校验

use crate::raw::{RawModel, RawPatient, RawValidationConfig};
use config::{Config, Environment, File};
use planval_core::{
    ModelStructureDefinition, PlanRef, Result, TargetDoseLevels, ValidationError, WarningLog,
};
use planval_dosimetry::{DoseLevelParser, Metric, MetricParser};
use tracing::info;

/// 解析完成的病人定义
#[derive(Debug, Clone)]
pub struct PatientDefinition {
    pub patient_id: String,
    pub model_plan: PlanRef,
    pub clinical_plan: PlanRef,
    /// 配置声明的目标剂量：模型结构ID -> 剂量（可为 UNDEFINED）
    pub target_doses: TargetDoseLevels,
}

/// 解析完成的模型定义
#[derive(Debug, Clone)]
pub struct ModelDefinition {
    pub name: String,
    pub structures: Vec<ModelStructureDefinition>,
    pub patients: Vec<PatientDefinition>,
    pub metrics: Vec<Metric>,
}

/// 从分层配置源加载原始配置（文件 + PLANVAL_* 环境变量覆盖）
pub fn load_validation_config(path: &str) -> Result<RawValidationConfig> {
    let settings = Config::builder()
        .add_source(File::with_name(path))
        .add_source(Environment::with_prefix("PLANVAL").separator("__"))
        .build()
        .map_err(|e| ValidationError::Config(format!("failed to load configuration {path}: {e}")))?;

    let raw: RawValidationConfig = settings
        .try_deserialize()
        .map_err(|e| ValidationError::Config(format!("failed to deserialize configuration {path}: {e}")))?;

    info!("configuration loaded from {} ({} models)", path, raw.models.len());
    Ok(raw)
}

/// 加载并校验单个模型
///
/// 任何约束字符串的格式错误中止该模型的加载；静态校验失败
/// 在日志中留下Error条目并返回配置错误。
pub fn load_model(path: &str, model_name: &str, log: &mut WarningLog) -> Result<ModelDefinition> {
    let raw = load_validation_config(path)?;
    let model = raw
        .models
        .into_iter()
        .find(|m| m.name == model_name)
        .ok_or_else(|| ValidationError::NotFound(format!("model {model_name} in configuration {path}")))?;

    let definition = ModelDefinition::from_raw(model, log)?;
    if !definition.validate(log) {
        return Err(ValidationError::Config(format!(
            "configuration for model {model_name} failed validation"
        )));
    }
    Ok(definition)
}

impl ModelDefinition {
    /// 把原始条目解析为模型定义
    ///
    /// 剂量/指标字符串经文法解析器处理，格式错误直接上抛。
    pub fn from_raw(raw: RawModel, log: &mut WarningLog) -> Result<Self> {
        let dose_parser = DoseLevelParser::new();
        let metric_parser = MetricParser::new();

        let structures: Vec<ModelStructureDefinition> = raw
            .structures
            .iter()
            .map(|s| {
                ModelStructureDefinition::new(&s.id, &s.code, s.target.as_deref().unwrap_or(""))
            })
            .collect();

        let mut patients = Vec::with_capacity(raw.patients.len());
        for patient in &raw.patients {
            patients.push(parse_patient(&raw.name, patient, &dose_parser, log)?);
        }

        let mut metrics = Vec::with_capacity(raw.metrics.len());
        for entry in &raw.metrics {
            metrics.push(metric_parser.parse(&entry.structure, &entry.metric, log)?);
        }

        Ok(Self {
            name: raw.name,
            structures,
            patients,
            metrics,
        })
    }

    /// 静态输入校验
    ///
    /// 问题以Error条目写入日志，返回是否通过。不触碰引擎。
    pub fn validate(&self, log: &mut WarningLog) -> bool {
        let mut valid = true;

        if self.structures.is_empty() {
            log.error(
                "Invalid Configuration",
                format!("model {} declares no structure matching entries", self.name),
            );
            valid = false;
        }
        if self.metrics.is_empty() {
            log.error(
                "Invalid Configuration",
                format!("model {} declares no metric entries", self.name),
            );
            valid = false;
        }
        if !self.structures.iter().any(|s| s.is_target) {
            log.error(
                "Invalid Configuration",
                format!("model {} declares no target structure for the model plan", self.name),
            );
            valid = false;
        }

        for patient in &self.patients {
            if patient.patient_id.trim().is_empty() {
                log.error(
                    "Invalid Configuration",
                    format!("a patient entry in model {} is missing its patient id", self.name),
                );
                valid = false;
            }
        }

        for metric in &self.metrics {
            let known = self
                .structures
                .iter()
                .any(|s| s.model_structure_id == metric.structure_id);
            if !known {
                log.error(
                    "Invalid Configuration",
                    format!(
                        "metric {} references structure {} which is not a configured model structure",
                        metric.original_text, metric.structure_id
                    ),
                );
                valid = false;
            }
        }

        valid
    }

    /// 声明为目标的模型结构
    pub fn target_structures(&self) -> impl Iterator<Item = &ModelStructureDefinition> {
        self.structures.iter().filter(|s| s.is_target)
    }
}

fn parse_patient(
    model_name: &str,
    raw: &RawPatient,
    dose_parser: &DoseLevelParser,
    log: &mut WarningLog,
) -> Result<PatientDefinition> {
    let model_plan = plan_for_role(model_name, raw, "model", log)?;
    let clinical_plan = plan_for_role(model_name, raw, "clinical", log)?;

    let mut target_doses = TargetDoseLevels::new();
    for (structure_id, text) in &raw.target_doses {
        let dose = dose_parser.parse(Some(text))?;
        target_doses.insert(structure_id.clone(), dose);
    }

    Ok(PatientDefinition {
        patient_id: raw.patient_id.clone(),
        model_plan,
        clinical_plan,
        target_doses,
    })
}

/// 取指定角色的计划；缺失是配置错误，多余的取首条并告警
fn plan_for_role(
    model_name: &str,
    raw: &RawPatient,
    role: &str,
    log: &mut WarningLog,
) -> Result<PlanRef> {
    let mut entries = raw
        .plans
        .iter()
        .filter(|p| p.role.eq_ignore_ascii_case(role));

    let first = entries.next().ok_or_else(|| {
        ValidationError::Config(format!(
            "patient {} in model {} declares no {} plan",
            raw.patient_id, model_name, role
        ))
    })?;
    let extra = entries.count();
    if extra > 0 {
        log.warn_for(
            "Multiple Plans",
            format!(
                "patient {} declares {} extra {} plan entries; using {}/{}",
                raw.patient_id, extra, role, first.course, first.plan
            ),
            Some(raw.patient_id.clone()),
            Some(format!("{}/{}", first.course, first.plan)),
        );
    }
    Ok(PlanRef::new(&first.course, &first.plan))
}
