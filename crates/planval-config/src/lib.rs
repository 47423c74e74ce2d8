//! 验证配置加载
//!
//! 从分层配置源（TOML/JSON文件 + 环境变量覆盖）加载模型定义：
//! 结构条目、逐病人计划对、原始约束字符串，并做静态输入校验。

pub mod definition;
pub mod raw;

pub use definition::{load_model, load_validation_config, ModelDefinition, PatientDefinition};
pub use raw::{RawMetric, RawModel, RawPatient, RawPlanEntry, RawStructure, RawValidationConfig};
