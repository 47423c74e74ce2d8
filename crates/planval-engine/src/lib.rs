//! # PlanVal 计划引擎接口
//!
//! 外部计划引擎协作者的抽象接口及内存脚本实现：
//! - `PlanningEngine`：会话管理、计划/结构查询、DVH查询、估计/优化/剂量计算操作
//! - `ScriptedEngine`：由测试夹具驱动的内存实现，用于测试与演练运行

pub mod engine;
pub mod scripted;

pub use engine::{
    DosePresentation, DvhSummary, OperationOutcome, PlanningEngine, StructureInfo,
    VolumePresentation,
};
pub use scripted::{PatientFixture, PlanFixture, ScriptedEngine, StructureFixture};
