//! 运行期警告日志
//!
//! 显式的运行作用域日志对象：运行开始时创建，过程中只追加，
//! 运行结束时统一导出展示。不使用进程级单例。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 日志严重级别
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => write!(f, "WARNING"),
            Severity::Error => write!(f, "ERROR"),
        }
    }
}

/// 单条日志：标题 + 正文，可选病人/计划上下文
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarningLogEntry {
    pub severity: Severity,
    pub title: String,
    pub message: String,
    pub patient: Option<String>,
    pub plan: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl WarningLogEntry {
    /// 渲染为展示用文本块：首行为级别与标题，后续行缩进4格
    pub fn render(&self) -> String {
        let mut text = format!("{} - {}", self.severity, self.title);
        if let Some(patient) = &self.patient {
            text.push_str(&format!("\nPatient: {patient}"));
        }
        if let Some(plan) = &self.plan {
            text.push_str(&format!("\nPlan: {plan}"));
        }
        text.push('\n');
        text.push_str(&self.message);
        text.replace('\n', "\n    ")
    }
}

/// 运行作用域的追加式警告日志
#[derive(Debug, Default)]
pub struct WarningLog {
    entries: Vec<WarningLogEntry>,
}

impl WarningLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn warn(&mut self, title: impl Into<String>, message: impl Into<String>) {
        self.push(Severity::Warning, title.into(), message.into(), None, None);
    }

    pub fn warn_for(
        &mut self,
        title: impl Into<String>,
        message: impl Into<String>,
        patient: Option<String>,
        plan: Option<String>,
    ) {
        self.push(Severity::Warning, title.into(), message.into(), patient, plan);
    }

    pub fn error(&mut self, title: impl Into<String>, message: impl Into<String>) {
        self.push(Severity::Error, title.into(), message.into(), None, None);
    }

    pub fn error_for(
        &mut self,
        title: impl Into<String>,
        message: impl Into<String>,
        patient: Option<String>,
        plan: Option<String>,
    ) {
        self.push(Severity::Error, title.into(), message.into(), patient, plan);
    }

    fn push(
        &mut self,
        severity: Severity,
        title: String,
        message: String,
        patient: Option<String>,
        plan: Option<String>,
    ) {
        match severity {
            Severity::Warning => tracing::warn!("{}: {}", title, message),
            Severity::Error => tracing::error!("{}: {}", title, message),
        }
        self.entries.push(WarningLogEntry {
            severity,
            title,
            message,
            patient,
            plan,
            timestamp: Utc::now(),
        });
    }

    pub fn entries(&self) -> &[WarningLogEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// 合并另一个日志（例如配置加载阶段产生的日志）
    pub fn extend(&mut self, other: WarningLog) {
        self.entries.extend(other.entries);
    }

    /// 渲染整个日志为按序拼接的文本
    pub fn render(&self) -> String {
        self.entries
            .iter()
            .map(WarningLogEntry::render)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// 运行结束时取出全部条目
    pub fn drain(self) -> Vec<WarningLogEntry> {
        self.entries
    }
}
