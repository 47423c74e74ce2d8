//! 验证工作流
//!
//! 结构匹配、目标剂量解析、逐病人验证流水线、计划分析与DVH序列整形。

pub mod analysis;
pub mod matching;
pub mod pipeline;
pub mod series;
pub mod state_machine;
pub mod target_dose;

pub use analysis::analyze_plans;
pub use matching::match_structures;
pub use pipeline::{NoProgress, ProgressObserver, ValidationPipeline, ValidationRunReport};
pub use series::{dose_axis_max, shape_series, DvhSeries, EstimateBandSeries, LineStyle};
pub use state_machine::{PipelineState, PipelineStateMachine};
pub use target_dose::{prune_non_target_matches, resolve_target_doses};
