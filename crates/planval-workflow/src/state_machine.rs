//! 流水线状态机
//!
//! 单个病人的验证阶段严格线性推进，不允许跳级。

use planval_core::{Result, ValidationError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// 流水线状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum PipelineState {
    Idle,
    StructureMatching,
    DoseEstimating,
    Optimizing,
    DoseCalculating,
    Normalizing,
    Saved,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Idle => "Idle",
            PipelineState::StructureMatching => "Structure Matching",
            PipelineState::DoseEstimating => "Dose Estimating",
            PipelineState::Optimizing => "Optimizing",
            PipelineState::DoseCalculating => "Dose Calculating",
            PipelineState::Normalizing => "Normalizing",
            PipelineState::Saved => "Saved",
        };
        write!(f, "{name}")
    }
}

/// 流水线状态机
#[derive(Debug)]
pub struct PipelineStateMachine {
    transitions: HashMap<PipelineState, PipelineState>,
}

impl PipelineStateMachine {
    /// 创建新的状态机实例
    pub fn new() -> Self {
        let mut transitions = HashMap::new();

        // 定义状态转换规则：严格线性，Saved为终态
        transitions.insert(PipelineState::Idle, PipelineState::StructureMatching);
        transitions.insert(PipelineState::StructureMatching, PipelineState::DoseEstimating);
        transitions.insert(PipelineState::DoseEstimating, PipelineState::Optimizing);
        transitions.insert(PipelineState::Optimizing, PipelineState::DoseCalculating);
        transitions.insert(PipelineState::DoseCalculating, PipelineState::Normalizing);
        transitions.insert(PipelineState::Normalizing, PipelineState::Saved);

        Self { transitions }
    }

    /// 检查状态是否还能推进
    pub fn can_advance(&self, from: PipelineState) -> bool {
        self.transitions.contains_key(&from)
    }

    /// 推进到下一状态
    pub fn advance(&self, from: PipelineState) -> Result<PipelineState> {
        match self.transitions.get(&from) {
            Some(to) => Ok(*to),
            None => Err(ValidationError::Domain(format!(
                "no pipeline transition out of state {from}"
            ))),
        }
    }

    /// 全部状态，按推进顺序
    pub fn all_states() -> Vec<PipelineState> {
        vec![
            PipelineState::Idle,
            PipelineState::StructureMatching,
            PipelineState::DoseEstimating,
            PipelineState::Optimizing,
            PipelineState::DoseCalculating,
            PipelineState::Normalizing,
            PipelineState::Saved,
        ]
    }
}

impl Default for PipelineStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
