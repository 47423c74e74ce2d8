//! # PlanVal Core
//!
//! 计划验证系统的核心模块，提供基础数据结构、单位定义、错误定义和运行期警告日志。

pub mod error;
pub mod models;
pub mod units;
pub mod warnings;

pub use error::{Result, ValidationError};
pub use models::*;
pub use units::{DoseUnit, DoseValue, VolumeUnit};
pub use warnings::{Severity, WarningLog, WarningLogEntry};
