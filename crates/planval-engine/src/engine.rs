//! 计划引擎协作者接口
//!
//! 核心不做任何剂量计算：DVH估计、优化、剂量计算全部委托给外部
//! 计划引擎，这里只定义核心需要的操作契约。会话约束：同一时刻
//! 只允许一个打开的病人上下文，调用方负责 open → (work) → save/close
//! 的顺序。

use async_trait::async_trait;
use planval_core::{
    DoseUnit, DoseValue, DvhPoint, EstimateBand, PlanRef, Result, StructureColor, StructureMatch,
    TargetDoseLevels,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 剂量呈现方式：绝对值或相对处方剂量
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DosePresentation {
    Absolute,
    Relative,
}

/// 体积呈现方式：相对结构总体积或绝对cc
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum VolumePresentation {
    Relative,
    AbsoluteCm3,
}

/// 计划中结构的描述信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructureInfo {
    pub id: String,
    /// 结构编码标识（可能有多个）
    pub codes: Vec<String>,
    /// DICOM解剖类别，如 "SUPPORT"、"MARKER"
    pub dicom_type: String,
    pub is_empty: bool,
    pub color: StructureColor,
}

/// 累积DVH汇总
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DvhSummary {
    pub mean_dose: DoseValue,
    pub max_dose: DoseValue,
    pub min_dose: DoseValue,
    pub curve: Vec<DvhPoint>,
}

/// 长耗时引擎操作的完成标志
///
/// 操作被引擎接受但报告失败（success=false）是正常返回，
/// 由调用方决定如何归类。
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OperationOutcome {
    pub success: bool,
}

/// 计划引擎协作者接口
///
/// 所有操作都可能长耗时，必须在独立于交互界面的执行单元中调用。
/// 查询不到计划/结构属于正常结果（返回 false / NotFound），
/// 引擎内部故障以错误返回。
#[async_trait]
pub trait PlanningEngine: Send + Sync {
    /// 打开病人上下文，同一时刻最多一个
    async fn open_patient(&self, patient_id: &str) -> Result<()>;

    /// 关闭当前病人上下文；未打开任何病人时为无操作
    async fn close_patient(&self) -> Result<()>;

    /// 开启修改事务
    async fn begin_modifications(&self) -> Result<()>;

    /// 保存修改事务
    async fn save_modifications(&self) -> Result<()>;

    /// 当前打开病人的姓名 (last, first)
    async fn patient_name(&self) -> Result<(String, String)>;

    async fn plan_exists(&self, plan: &PlanRef) -> Result<bool>;

    async fn structure_exists(&self, plan: &PlanRef, structure_id: &str) -> Result<bool>;

    /// 列出计划结构集中的全部结构
    async fn list_structures(&self, plan: &PlanRef) -> Result<Vec<StructureInfo>>;

    /// 计划的总处方剂量
    async fn total_prescribed_dose(&self, plan: &PlanRef) -> Result<DoseValue>;

    /// 计划内部使用的绝对剂量单位
    async fn plan_dose_unit(&self, plan: &PlanRef) -> Result<DoseUnit>;

    /// 计划三维剂量最大值
    async fn max_dose_3d(&self, plan: &PlanRef) -> Result<DoseValue>;

    /// 给定体积处的剂量，按请求的呈现方式返回
    async fn dose_at_volume(
        &self,
        plan: &PlanRef,
        structure_id: &str,
        volume: f64,
        volume_presentation: VolumePresentation,
        dose_presentation: DosePresentation,
    ) -> Result<DoseValue>;

    /// 给定剂量处的体积，按请求的体积呈现方式返回
    async fn volume_at_dose(
        &self,
        plan: &PlanRef,
        structure_id: &str,
        dose: DoseValue,
        volume_presentation: VolumePresentation,
    ) -> Result<f64>;

    /// 按给定呈现方式与体积分辨率计算累积DVH
    async fn cumulative_dvh(
        &self,
        plan: &PlanRef,
        structure_id: &str,
        dose_presentation: DosePresentation,
        volume_presentation: VolumePresentation,
        bin_width: f64,
    ) -> Result<DvhSummary>;

    /// 各结构的DVH估计区间（模型估计已生成时）
    async fn dvh_estimate_bands(&self, plan: &PlanRef) -> Result<BTreeMap<String, EstimateBand>>;

    /// 以给定模型、目标剂量与结构匹配请求DVH估计
    async fn calculate_dvh_estimates(
        &self,
        plan: &PlanRef,
        model_name: &str,
        target_doses: &TargetDoseLevels,
        matches: &StructureMatch,
    ) -> Result<OperationOutcome>;

    async fn optimize(&self, plan: &PlanRef) -> Result<OperationOutcome>;

    async fn calculate_dose(&self, plan: &PlanRef) -> Result<OperationOutcome>;

    /// 写回计划归一化值
    async fn set_plan_normalization(&self, plan: &PlanRef, value: f64) -> Result<()>;

    /// 读取计划归一化值
    async fn plan_normalization(&self, plan: &PlanRef) -> Result<f64>;
}
