//! 错误定义模块

use thiserror::Error;

/// 计划验证系统统一错误类型
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("格式错误: {0}")]
    Format(String),

    #[error("语义错误: {0}")]
    Domain(String),

    #[error("剂量指标计算失败: {0}")]
    Calculation(String),

    #[error("资源未找到: {0}")]
    NotFound(String),

    #[error("引擎操作失败: {0}")]
    EngineOperation(String),

    #[error("配置错误: {0}")]
    Config(String),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),
}

/// 计划验证系统统一结果类型
pub type Result<T> = std::result::Result<T, ValidationError>;
