//! 脚本化内存引擎
//!
//! 由夹具数据驱动的 `PlanningEngine` 实现：DVH以折线插值求值，
//! 会话纪律（先开病人上下文、先开修改事务）与真实引擎一致地强制
//! 执行。供单元测试与演练运行使用。

use crate::engine::{
    DosePresentation, DvhSummary, OperationOutcome, PlanningEngine, StructureInfo,
    VolumePresentation,
};
use async_trait::async_trait;
use planval_core::{
    DoseUnit, DoseValue, DvhPoint, EstimateBand, PlanRef, Result, StructureMatch,
    TargetDoseLevels, ValidationError,
};
use std::collections::BTreeMap;
use tokio::sync::RwLock;

/// 结构夹具
///
/// DVH曲线以（绝对剂量cGy，相对体积%）点列给出，剂量升序、体积不增。
#[derive(Debug, Clone)]
pub struct StructureFixture {
    pub info: StructureInfo,
    pub curve: Vec<DvhPoint>,
    /// 结构总体积 cc
    pub volume_cc: f64,
    pub mean_dose_cgy: f64,
    pub max_dose_cgy: f64,
    pub min_dose_cgy: f64,
}

/// 计划夹具
#[derive(Debug, Clone)]
pub struct PlanFixture {
    pub plan: PlanRef,
    /// 总处方剂量 cGy
    pub total_dose_cgy: f64,
    /// 计划内部绝对剂量单位
    pub dose_unit: DoseUnit,
    /// 三维剂量最大值 cGy
    pub max_dose_3d_cgy: f64,
    pub structures: BTreeMap<String, StructureFixture>,
    pub estimate_bands: BTreeMap<String, EstimateBand>,
    pub normalization: f64,
    /// 注入失败：DVH估计操作报告不成功
    pub fail_estimates: bool,
    /// 注入失败：优化操作报告不成功
    pub fail_optimize: bool,
    /// 注入失败：剂量计算操作报告不成功
    pub fail_calculate: bool,
}

impl PlanFixture {
    pub fn new(plan: PlanRef, total_dose_cgy: f64) -> Self {
        Self {
            plan,
            total_dose_cgy,
            dose_unit: DoseUnit::CentiGray,
            max_dose_3d_cgy: total_dose_cgy,
            structures: BTreeMap::new(),
            estimate_bands: BTreeMap::new(),
            normalization: 100.0,
            fail_estimates: false,
            fail_optimize: false,
            fail_calculate: false,
        }
    }

    fn dose_in_plan_unit(&self, dose_cgy: f64) -> DoseValue {
        match self.dose_unit {
            DoseUnit::Gray => DoseValue::new(dose_cgy / 100.0, DoseUnit::Gray),
            _ => DoseValue::new(dose_cgy, DoseUnit::CentiGray),
        }
    }
}

/// 病人夹具
#[derive(Debug, Clone)]
pub struct PatientFixture {
    pub patient_id: String,
    pub last_name: String,
    pub first_name: String,
    pub plans: Vec<PlanFixture>,
}

#[derive(Debug, Default)]
struct Session {
    open_patient: Option<String>,
    modifications: bool,
}

/// 脚本化内存引擎
#[derive(Debug)]
pub struct ScriptedEngine {
    patients: RwLock<BTreeMap<String, PatientFixture>>,
    session: RwLock<Session>,
}

impl ScriptedEngine {
    pub fn new(fixtures: Vec<PatientFixture>) -> Self {
        let patients = fixtures
            .into_iter()
            .map(|p| (p.patient_id.clone(), p))
            .collect();
        Self {
            patients: RwLock::new(patients),
            session: RwLock::new(Session::default()),
        }
    }

    async fn open_patient_id(&self) -> Result<String> {
        self.session
            .read()
            .await
            .open_patient
            .clone()
            .ok_or_else(|| ValidationError::EngineOperation("no open patient context".to_string()))
    }

    async fn require_modifications(&self) -> Result<()> {
        let session = self.session.read().await;
        if session.open_patient.is_none() {
            return Err(ValidationError::EngineOperation(
                "no open patient context".to_string(),
            ));
        }
        if !session.modifications {
            return Err(ValidationError::EngineOperation(
                "no modification transaction in progress".to_string(),
            ));
        }
        Ok(())
    }

    async fn with_plan<T>(
        &self,
        plan: &PlanRef,
        f: impl FnOnce(&PlanFixture) -> Result<T>,
    ) -> Result<T> {
        let patient_id = self.open_patient_id().await?;
        let patients = self.patients.read().await;
        let patient = patients
            .get(&patient_id)
            .ok_or_else(|| ValidationError::NotFound(format!("patient {patient_id}")))?;
        let fixture = patient
            .plans
            .iter()
            .find(|p| &p.plan == plan)
            .ok_or_else(|| {
                ValidationError::NotFound(format!("plan {plan} for patient {patient_id}"))
            })?;
        f(fixture)
    }

    async fn with_structure<T>(
        &self,
        plan: &PlanRef,
        structure_id: &str,
        f: impl FnOnce(&PlanFixture, &StructureFixture) -> Result<T>,
    ) -> Result<T> {
        self.with_plan(plan, |fixture| {
            let structure = fixture.structures.get(structure_id).ok_or_else(|| {
                ValidationError::NotFound(format!("structure {structure_id} in plan {plan}"))
            })?;
            f(fixture, structure)
        })
        .await
    }
}

/// 在相对体积处求剂量（cGy），曲线间线性插值，端点截断
fn dose_at_relative_volume(curve: &[DvhPoint], volume: f64) -> Result<f64> {
    if curve.is_empty() {
        return Err(ValidationError::Calculation("empty DVH curve".to_string()));
    }
    let first = curve[0];
    let last = curve[curve.len() - 1];
    if volume >= first.volume {
        return Ok(first.dose);
    }
    if volume <= last.volume {
        return Ok(last.dose);
    }
    for pair in curve.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        if b.volume <= volume && volume <= a.volume {
            if (a.volume - b.volume).abs() < f64::EPSILON {
                return Ok(a.dose);
            }
            let t = (a.volume - volume) / (a.volume - b.volume);
            return Ok(a.dose + t * (b.dose - a.dose));
        }
    }
    Ok(last.dose)
}

/// 在绝对剂量（cGy）处求相对体积，曲线间线性插值，端点截断
fn volume_at_dose_cgy(curve: &[DvhPoint], dose: f64) -> Result<f64> {
    if curve.is_empty() {
        return Err(ValidationError::Calculation("empty DVH curve".to_string()));
    }
    let first = curve[0];
    let last = curve[curve.len() - 1];
    if dose <= first.dose {
        return Ok(first.volume);
    }
    if dose >= last.dose {
        return Ok(last.volume);
    }
    for pair in curve.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        if a.dose <= dose && dose <= b.dose {
            if (b.dose - a.dose).abs() < f64::EPSILON {
                return Ok(a.volume);
            }
            let t = (dose - a.dose) / (b.dose - a.dose);
            return Ok(a.volume + t * (b.volume - a.volume));
        }
    }
    Ok(last.volume)
}

#[async_trait]
impl PlanningEngine for ScriptedEngine {
    async fn open_patient(&self, patient_id: &str) -> Result<()> {
        let mut session = self.session.write().await;
        if let Some(open) = &session.open_patient {
            return Err(ValidationError::EngineOperation(format!(
                "patient context {open} is still open; close it first"
            )));
        }
        if !self.patients.read().await.contains_key(patient_id) {
            return Err(ValidationError::NotFound(format!("patient {patient_id}")));
        }
        tracing::debug!("opening patient context {}", patient_id);
        session.open_patient = Some(patient_id.to_string());
        session.modifications = false;
        Ok(())
    }

    async fn close_patient(&self) -> Result<()> {
        let mut session = self.session.write().await;
        session.open_patient = None;
        session.modifications = false;
        Ok(())
    }

    async fn begin_modifications(&self) -> Result<()> {
        let mut session = self.session.write().await;
        if session.open_patient.is_none() {
            return Err(ValidationError::EngineOperation(
                "no open patient context".to_string(),
            ));
        }
        session.modifications = true;
        Ok(())
    }

    async fn save_modifications(&self) -> Result<()> {
        self.require_modifications().await?;
        let mut session = self.session.write().await;
        session.modifications = false;
        Ok(())
    }

    async fn patient_name(&self) -> Result<(String, String)> {
        let patient_id = self.open_patient_id().await?;
        let patients = self.patients.read().await;
        let patient = patients
            .get(&patient_id)
            .ok_or_else(|| ValidationError::NotFound(format!("patient {patient_id}")))?;
        Ok((patient.last_name.clone(), patient.first_name.clone()))
    }

    async fn plan_exists(&self, plan: &PlanRef) -> Result<bool> {
        let patient_id = self.open_patient_id().await?;
        let patients = self.patients.read().await;
        let patient = patients
            .get(&patient_id)
            .ok_or_else(|| ValidationError::NotFound(format!("patient {patient_id}")))?;
        Ok(patient.plans.iter().any(|p| &p.plan == plan))
    }

    async fn structure_exists(&self, plan: &PlanRef, structure_id: &str) -> Result<bool> {
        self.with_plan(plan, |fixture| {
            Ok(fixture.structures.contains_key(structure_id))
        })
        .await
    }

    async fn list_structures(&self, plan: &PlanRef) -> Result<Vec<StructureInfo>> {
        self.with_plan(plan, |fixture| {
            Ok(fixture.structures.values().map(|s| s.info.clone()).collect())
        })
        .await
    }

    async fn total_prescribed_dose(&self, plan: &PlanRef) -> Result<DoseValue> {
        self.with_plan(plan, |fixture| Ok(fixture.dose_in_plan_unit(fixture.total_dose_cgy)))
            .await
    }

    async fn plan_dose_unit(&self, plan: &PlanRef) -> Result<DoseUnit> {
        self.with_plan(plan, |fixture| Ok(fixture.dose_unit)).await
    }

    async fn max_dose_3d(&self, plan: &PlanRef) -> Result<DoseValue> {
        self.with_plan(plan, |fixture| Ok(fixture.dose_in_plan_unit(fixture.max_dose_3d_cgy)))
            .await
    }

    async fn dose_at_volume(
        &self,
        plan: &PlanRef,
        structure_id: &str,
        volume: f64,
        volume_presentation: VolumePresentation,
        dose_presentation: DosePresentation,
    ) -> Result<DoseValue> {
        self.with_structure(plan, structure_id, |fixture, structure| {
            let relative_volume = match volume_presentation {
                VolumePresentation::Relative => volume,
                VolumePresentation::AbsoluteCm3 => volume / structure.volume_cc * 100.0,
            };
            let dose_cgy = dose_at_relative_volume(&structure.curve, relative_volume)?;
            match dose_presentation {
                DosePresentation::Relative => Ok(DoseValue::new(
                    dose_cgy / fixture.total_dose_cgy * 100.0,
                    DoseUnit::Percent,
                )),
                DosePresentation::Absolute => Ok(fixture.dose_in_plan_unit(dose_cgy)),
            }
        })
        .await
    }

    async fn volume_at_dose(
        &self,
        plan: &PlanRef,
        structure_id: &str,
        dose: DoseValue,
        volume_presentation: VolumePresentation,
    ) -> Result<f64> {
        self.with_structure(plan, structure_id, |fixture, structure| {
            let dose_cgy = match dose.unit {
                DoseUnit::CentiGray => dose.value,
                DoseUnit::Gray => dose.value * 100.0,
                DoseUnit::Percent => fixture.total_dose_cgy * dose.value / 100.0,
                DoseUnit::Unknown => {
                    return Err(ValidationError::Calculation(format!(
                        "cannot query volume at dose {dose} (unknown unit)"
                    )))
                }
            };
            let relative_volume = volume_at_dose_cgy(&structure.curve, dose_cgy)?;
            match volume_presentation {
                VolumePresentation::Relative => Ok(relative_volume),
                VolumePresentation::AbsoluteCm3 => {
                    Ok(relative_volume / 100.0 * structure.volume_cc)
                }
            }
        })
        .await
    }

    async fn cumulative_dvh(
        &self,
        plan: &PlanRef,
        structure_id: &str,
        dose_presentation: DosePresentation,
        volume_presentation: VolumePresentation,
        bin_width: f64,
    ) -> Result<DvhSummary> {
        if bin_width <= 0.0 {
            return Err(ValidationError::Calculation(format!(
                "invalid DVH bin width {bin_width}"
            )));
        }
        self.with_structure(plan, structure_id, |fixture, structure| {
            let present_dose = |dose_cgy: f64| match dose_presentation {
                DosePresentation::Relative => DoseValue::new(
                    dose_cgy / fixture.total_dose_cgy * 100.0,
                    DoseUnit::Percent,
                ),
                DosePresentation::Absolute => fixture.dose_in_plan_unit(dose_cgy),
            };
            let curve = structure
                .curve
                .iter()
                .map(|point| DvhPoint {
                    dose: present_dose(point.dose).value,
                    volume: match volume_presentation {
                        VolumePresentation::Relative => point.volume,
                        VolumePresentation::AbsoluteCm3 => {
                            point.volume / 100.0 * structure.volume_cc
                        }
                    },
                })
                .collect();
            Ok(DvhSummary {
                mean_dose: present_dose(structure.mean_dose_cgy),
                max_dose: present_dose(structure.max_dose_cgy),
                min_dose: present_dose(structure.min_dose_cgy),
                curve,
            })
        })
        .await
    }

    async fn dvh_estimate_bands(&self, plan: &PlanRef) -> Result<BTreeMap<String, EstimateBand>> {
        self.with_plan(plan, |fixture| Ok(fixture.estimate_bands.clone())).await
    }

    async fn calculate_dvh_estimates(
        &self,
        plan: &PlanRef,
        model_name: &str,
        target_doses: &TargetDoseLevels,
        matches: &StructureMatch,
    ) -> Result<OperationOutcome> {
        self.require_modifications().await?;
        tracing::info!(
            "calculating DVH estimates for plan {} with model {} ({} targets, {} matches)",
            plan,
            model_name,
            target_doses.len(),
            matches.len()
        );
        self.with_plan(plan, |fixture| {
            Ok(OperationOutcome {
                success: !fixture.fail_estimates,
            })
        })
        .await
    }

    async fn optimize(&self, plan: &PlanRef) -> Result<OperationOutcome> {
        self.require_modifications().await?;
        self.with_plan(plan, |fixture| {
            Ok(OperationOutcome {
                success: !fixture.fail_optimize,
            })
        })
        .await
    }

    async fn calculate_dose(&self, plan: &PlanRef) -> Result<OperationOutcome> {
        self.require_modifications().await?;
        self.with_plan(plan, |fixture| {
            Ok(OperationOutcome {
                success: !fixture.fail_calculate,
            })
        })
        .await
    }

    async fn set_plan_normalization(&self, plan: &PlanRef, value: f64) -> Result<()> {
        self.require_modifications().await?;
        let patient_id = self.open_patient_id().await?;
        let mut patients = self.patients.write().await;
        let patient = patients
            .get_mut(&patient_id)
            .ok_or_else(|| ValidationError::NotFound(format!("patient {patient_id}")))?;
        let fixture = patient
            .plans
            .iter_mut()
            .find(|p| &p.plan == plan)
            .ok_or_else(|| {
                ValidationError::NotFound(format!("plan {plan} for patient {patient_id}"))
            })?;
        fixture.normalization = value;
        Ok(())
    }

    async fn plan_normalization(&self, plan: &PlanRef) -> Result<f64> {
        self.with_plan(plan, |fixture| Ok(fixture.normalization)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use planval_core::StructureColor;

    fn ptv_fixture() -> StructureFixture {
        StructureFixture {
            info: StructureInfo {
                id: "PTV_7000".to_string(),
                codes: vec!["PTV1".to_string()],
                dicom_type: "PTV".to_string(),
                is_empty: false,
                color: StructureColor { r: 255, g: 0, b: 0 },
            },
            curve: vec![
                DvhPoint { dose: 0.0, volume: 100.0 },
                DvhPoint { dose: 6800.0, volume: 98.0 },
                DvhPoint { dose: 7200.0, volume: 0.0 },
            ],
            volume_cc: 200.0,
            mean_dose_cgy: 7000.0,
            max_dose_cgy: 7200.0,
            min_dose_cgy: 6500.0,
        }
    }

    fn engine_with_single_plan() -> (ScriptedEngine, PlanRef) {
        let plan = PlanRef::new("C1", "RapAuto");
        let mut fixture = PlanFixture::new(plan.clone(), 7000.0);
        fixture
            .structures
            .insert("PTV_7000".to_string(), ptv_fixture());
        let patient = PatientFixture {
            patient_id: "PAT001".to_string(),
            last_name: "Doe".to_string(),
            first_name: "Jane".to_string(),
            plans: vec![fixture],
        };
        (ScriptedEngine::new(vec![patient]), plan)
    }

    #[tokio::test]
    async fn test_rejects_work_without_open_patient() {
        let (engine, plan) = engine_with_single_plan();
        assert!(engine.plan_exists(&plan).await.is_err());
        assert!(engine.begin_modifications().await.is_err());
        // 关闭未打开的上下文是无操作
        assert!(engine.close_patient().await.is_ok());
    }

    #[tokio::test]
    async fn test_save_requires_begin_modifications() {
        let (engine, plan) = engine_with_single_plan();
        engine.open_patient("PAT001").await.unwrap();
        assert!(engine.save_modifications().await.is_err());
        engine.begin_modifications().await.unwrap();
        assert!(engine.optimize(&plan).await.unwrap().success);
        assert!(engine.save_modifications().await.is_ok());
    }

    #[tokio::test]
    async fn test_single_open_context_at_a_time() {
        let (engine, _plan) = engine_with_single_plan();
        engine.open_patient("PAT001").await.unwrap();
        assert!(engine.open_patient("PAT001").await.is_err());
        engine.close_patient().await.unwrap();
        assert!(engine.open_patient("PAT001").await.is_ok());
    }

    #[tokio::test]
    async fn test_dose_at_volume_presentations() {
        let (engine, plan) = engine_with_single_plan();
        engine.open_patient("PAT001").await.unwrap();

        let absolute = engine
            .dose_at_volume(
                &plan,
                "PTV_7000",
                98.0,
                VolumePresentation::Relative,
                DosePresentation::Absolute,
            )
            .await
            .unwrap();
        assert_eq!(absolute.unit, DoseUnit::CentiGray);
        assert!((absolute.value - 6800.0).abs() < 1e-9);

        let relative = engine
            .dose_at_volume(
                &plan,
                "PTV_7000",
                98.0,
                VolumePresentation::Relative,
                DosePresentation::Relative,
            )
            .await
            .unwrap();
        assert_eq!(relative.unit, DoseUnit::Percent);
        assert!((relative.value - 6800.0 / 7000.0 * 100.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_volume_at_dose_accepts_gray() {
        let (engine, plan) = engine_with_single_plan();
        engine.open_patient("PAT001").await.unwrap();

        let from_cgy = engine
            .volume_at_dose(
                &plan,
                "PTV_7000",
                DoseValue::new(6800.0, DoseUnit::CentiGray),
                VolumePresentation::Relative,
            )
            .await
            .unwrap();
        let from_gy = engine
            .volume_at_dose(
                &plan,
                "PTV_7000",
                DoseValue::new(68.0, DoseUnit::Gray),
                VolumePresentation::Relative,
            )
            .await
            .unwrap();
        assert!((from_cgy - 98.0).abs() < 1e-9);
        assert!((from_cgy - from_gy).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_set_normalization_round_trip() {
        let (engine, plan) = engine_with_single_plan();
        engine.open_patient("PAT001").await.unwrap();
        engine.begin_modifications().await.unwrap();
        engine.set_plan_normalization(&plan, 104.6).await.unwrap();
        let value = engine.plan_normalization(&plan).await.unwrap();
        assert!((value - 104.6).abs() < 1e-12);
    }
}
