//! 验证流水线
//!
//! 逐病人驱动外部计划引擎完成 结构匹配 → DVH估计 → 优化 → 剂量计算 →
//! 归一化 → 保存 的全部状态。病人之间严格串行，先关旧上下文再开新
//! 上下文；任一阶段失败只中止该病人的剩余状态，运行继续。

use crate::analysis::analyze_plans;
use crate::matching::match_structures;
use crate::series::{shape_series, DvhSeries, EstimateBandSeries};
use crate::state_machine::{PipelineState, PipelineStateMachine};
use crate::target_dose::{prune_non_target_matches, resolve_target_doses};
use chrono::{DateTime, Utc};
use planval_config::{ModelDefinition, PatientDefinition};
use planval_core::{
    EstimateBand, MetricResult, PatientRecord, PlanRef, Result, StructureCurveData,
    StructureMatch, ValidationError, WarningLog, WarningLogEntry,
};
use planval_dosimetry::{convert_to_plan_units, normalization_factor};
use planval_engine::{DosePresentation, PlanningEngine, StructureInfo, VolumePresentation};
use std::collections::BTreeMap;
use uuid::Uuid;

/// 曲线采集用的累积DVH分辨率
const CURVE_BIN_WIDTH: f64 = 0.01;

/// 进度观察者：每次状态转换收到一次通知
pub trait ProgressObserver: Send + Sync {
    fn on_state(&self, patient_index: usize, patient_total: usize, state: PipelineState);
}

/// 不汇报进度的观察者
#[derive(Debug, Default)]
pub struct NoProgress;

impl ProgressObserver for NoProgress {
    fn on_state(&self, _patient_index: usize, _patient_total: usize, _state: PipelineState) {}
}

/// 一次验证运行的结果
#[derive(Debug)]
pub struct ValidationRunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// 完整走完流水线的病人记录，按处理顺序
    pub patients: Vec<PatientRecord>,
    /// 选中病人（首个完成者）的指标结果
    pub metric_results: Vec<MetricResult>,
    /// 选中病人的DVH序列
    pub series: Vec<DvhSeries>,
    pub estimate_series: Vec<EstimateBandSeries>,
    /// 运行期间累积的全部告警
    pub warnings: Vec<WarningLogEntry>,
}

/// 验证流水线
pub struct ValidationPipeline<'a> {
    engine: &'a dyn PlanningEngine,
    machine: PipelineStateMachine,
}

impl<'a> ValidationPipeline<'a> {
    pub fn new(engine: &'a dyn PlanningEngine) -> Self {
        Self {
            engine,
            machine: PipelineStateMachine::new(),
        }
    }

    /// 运行前检查：病人可打开、两侧计划存在、目标剂量键指向声明的结构
    ///
    /// 任何失败在引擎开始实际工作前上报。
    pub async fn validate_inputs(&self, model: &ModelDefinition) -> Result<()> {
        for patient in &model.patients {
            for key in patient.target_doses.keys() {
                let known = model
                    .structures
                    .iter()
                    .any(|s| &s.model_structure_id == key);
                if !known {
                    return Err(ValidationError::Config(format!(
                        "target dose for {} does not name a configured model structure",
                        key
                    )));
                }
            }

            self.engine.close_patient().await?;
            self.engine.open_patient(&patient.patient_id).await?;
            let check = self.check_plans(patient).await;
            self.engine.close_patient().await?;
            check?;
        }
        Ok(())
    }

    async fn check_plans(&self, patient: &PatientDefinition) -> Result<()> {
        for plan in [&patient.model_plan, &patient.clinical_plan] {
            if !self.engine.plan_exists(plan).await? {
                return Err(ValidationError::NotFound(format!(
                    "plan {} for patient {}",
                    plan, patient.patient_id
                )));
            }
        }
        Ok(())
    }

    /// 执行整个验证运行
    pub async fn run(
        &self,
        model: &ModelDefinition,
        observer: &dyn ProgressObserver,
    ) -> Result<ValidationRunReport> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let total = model.patients.len();
        let mut log = WarningLog::new();
        tracing::info!(
            "starting validation run {} for model {} ({} patients)",
            run_id,
            model.name,
            total
        );

        let mut records = Vec::new();
        for (index, patient) in model.patients.iter().enumerate() {
            match self
                .run_patient(model, patient, index, total, observer, &mut log)
                .await
            {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::error!(
                        "validation aborted for patient {}: {}",
                        patient.patient_id,
                        e
                    );
                    log.error_for(
                        "Validation Failed",
                        e.to_string(),
                        Some(patient.patient_id.clone()),
                        None,
                    );
                }
            }
            if let Err(e) = self.engine.close_patient().await {
                tracing::error!("failed to close patient {}: {}", patient.patient_id, e);
                log.error_for(
                    "Validation Failed",
                    e.to_string(),
                    Some(patient.patient_id.clone()),
                    None,
                );
            }
        }

        // 首个完成的病人成为当前选择，对其重算指标并整形DVH序列；
        // 分析失败不吞掉已完成的运行结果
        let mut metric_results = Vec::new();
        let mut series = Vec::new();
        let mut estimate_series = Vec::new();
        if let Some(selected) = records.first() {
            match self.analyze_selected(selected, model, &mut log).await {
                Ok(results) => metric_results = results,
                Err(e) => {
                    tracing::error!(
                        "analysis failed for patient {}: {}",
                        selected.patient_id,
                        e
                    );
                    log.error_for(
                        "Analysis Failed",
                        e.to_string(),
                        Some(selected.patient_id.clone()),
                        None,
                    );
                }
            }
            let (shaped, bands) = shape_series(selected);
            series = shaped;
            estimate_series = bands;
        }

        tracing::info!(
            "validation run {} finished: {}/{} patients completed, {} warnings",
            run_id,
            records.len(),
            total,
            log.len()
        );

        Ok(ValidationRunReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            patients: records,
            metric_results,
            series,
            estimate_series,
            warnings: log.drain(),
        })
    }

    /// 单个病人的全部流水线状态
    async fn run_patient(
        &self,
        model: &ModelDefinition,
        patient: &PatientDefinition,
        index: usize,
        total: usize,
        observer: &dyn ProgressObserver,
        log: &mut WarningLog,
    ) -> Result<PatientRecord> {
        let mut state = PipelineState::Idle;
        let mut step = |state: &mut PipelineState| -> Result<()> {
            *state = self.machine.advance(*state)?;
            observer.on_state(index, total, *state);
            tracing::debug!("patient {} entering state {}", patient.patient_id, state);
            Ok(())
        };

        // 结构匹配。先关旧上下文再开，首个病人时关闭是无操作
        step(&mut state)?;
        self.engine.close_patient().await?;
        self.engine.open_patient(&patient.patient_id).await?;
        self.engine.begin_modifications().await?;

        let mut record = PatientRecord::new(
            &patient.patient_id,
            &model.name,
            patient.model_plan.clone(),
            patient.clinical_plan.clone(),
        );
        let (last_name, first_name) = self.engine.patient_name().await?;
        record.last_name = last_name;
        record.first_name = first_name;
        record.target_doses = patient.target_doses.clone();

        let model_infos = self.engine.list_structures(&patient.model_plan).await?;
        let clinical_infos = self.engine.list_structures(&patient.clinical_plan).await?;
        let patient_label = record.label();
        record.model_matches = match_structures(
            &model_infos,
            &model.structures,
            &patient_label,
            &patient.model_plan.to_string(),
            log,
        );
        record.clinical_matches = match_structures(
            &clinical_infos,
            &model.structures,
            &patient_label,
            &patient.clinical_plan.to_string(),
            log,
        );

        let total_dose = self.engine.total_prescribed_dose(&patient.model_plan).await?;
        let resolved = resolve_target_doses(
            total_dose,
            &record.model_matches,
            &patient.target_doses,
            &model.structures,
            &patient_label,
            &patient.model_plan.to_string(),
            log,
        );
        record.model_matches = prune_non_target_matches(
            &record.model_matches,
            &model.structures,
            &resolved,
            &patient_label,
            &patient.model_plan.to_string(),
            log,
        );
        record.resolved_target_doses = resolved;

        // DVH估计
        step(&mut state)?;
        let plan_unit = self.engine.plan_dose_unit(&patient.model_plan).await?;
        let estimate_doses = convert_to_plan_units(&record.resolved_target_doses, plan_unit);
        let outcome = self
            .engine
            .calculate_dvh_estimates(
                &patient.model_plan,
                &model.name,
                &estimate_doses,
                &record.model_matches,
            )
            .await?;
        if !outcome.success {
            return Err(ValidationError::EngineOperation(format!(
                "DVH estimation failed for plan {}",
                patient.model_plan
            )));
        }
        let estimate_bands = self.engine.dvh_estimate_bands(&patient.model_plan).await?;

        // 优化
        step(&mut state)?;
        let outcome = self.engine.optimize(&patient.model_plan).await?;
        if !outcome.success {
            return Err(ValidationError::EngineOperation(format!(
                "optimization failed for plan {}",
                patient.model_plan
            )));
        }

        // 剂量计算，随后采集两侧曲线
        step(&mut state)?;
        let outcome = self.engine.calculate_dose(&patient.model_plan).await?;
        if !outcome.success {
            return Err(ValidationError::EngineOperation(format!(
                "dose calculation failed for plan {}",
                patient.model_plan
            )));
        }
        record.model_structure_data = self
            .gather_curves(
                &patient.model_plan,
                &record.model_matches,
                &model_infos,
                Some(&estimate_bands),
            )
            .await?;
        record.clinical_structure_data = self
            .gather_curves(
                &patient.clinical_plan,
                &record.clinical_matches,
                &clinical_infos,
                None,
            )
            .await?;

        // 归一化：把模型计划对齐到临床计划
        step(&mut state)?;
        let (model_target, clinical_target) = self.normalization_targets(model, &record)?;
        let factor = normalization_factor(
            self.engine,
            &patient.model_plan,
            model_target,
            &patient.clinical_plan,
            clinical_target,
        )
        .await?;
        self.engine
            .set_plan_normalization(&patient.model_plan, factor)
            .await?;

        // 保存
        step(&mut state)?;
        self.engine.save_modifications().await?;

        Ok(record)
    }

    /// 选中病人的指标求值，打开与关闭都在本函数内配对
    async fn analyze_selected(
        &self,
        selected: &PatientRecord,
        model: &ModelDefinition,
        log: &mut WarningLog,
    ) -> Result<Vec<MetricResult>> {
        self.engine.open_patient(&selected.patient_id).await?;
        let analysis = analyze_plans(self.engine, selected, &model.metrics, log).await;
        let closed = self.engine.close_patient().await;
        let results = analysis?;
        closed?;
        Ok(results)
    }

    /// 首个两侧都有匹配的目标结构，作为归一化参考
    fn normalization_targets<'r>(
        &self,
        model: &ModelDefinition,
        record: &'r PatientRecord,
    ) -> Result<(&'r str, &'r str)> {
        for target in model.structures.iter().filter(|s| s.is_target) {
            let model_sid = record
                .plan_structure_for(planval_core::PlanRole::Model, &target.model_structure_id);
            let clinical_sid = record
                .plan_structure_for(planval_core::PlanRole::Clinical, &target.model_structure_id);
            if let (Some(m), Some(c)) = (model_sid, clinical_sid) {
                return Ok((m, c));
            }
        }
        Err(ValidationError::NotFound(format!(
            "matched target structure for normalization of plan {}",
            record.model_plan
        )))
    }

    async fn gather_curves(
        &self,
        plan: &PlanRef,
        matches: &StructureMatch,
        infos: &[StructureInfo],
        bands: Option<&BTreeMap<String, EstimateBand>>,
    ) -> Result<BTreeMap<String, StructureCurveData>> {
        let mut data = BTreeMap::new();
        for (plan_sid, model_sid) in matches {
            let Some(info) = infos.iter().find(|i| &i.id == plan_sid) else {
                continue;
            };
            let dvh = self
                .engine
                .cumulative_dvh(
                    plan,
                    plan_sid,
                    DosePresentation::Absolute,
                    VolumePresentation::Relative,
                    CURVE_BIN_WIDTH,
                )
                .await?;
            data.insert(
                plan_sid.clone(),
                StructureCurveData {
                    model_structure_id: model_sid.clone(),
                    color: info.color,
                    curve: dvh.curve,
                    estimate: bands.and_then(|b| b.get(plan_sid).cloned()),
                },
            );
        }
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use planval_core::{
        DoseUnit, DoseValue, DvhPoint, ModelStructureDefinition, Severity, StructureColor,
        TargetDoseLevels,
    };
    use planval_dosimetry::MetricParser;
    use planval_engine::{
        DvhSummary, OperationOutcome, PatientFixture, PlanFixture, ScriptedEngine,
        StructureFixture,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn fixture(
        id: &str,
        code: &str,
        dicom_type: &str,
        d98_cgy: f64,
        mean_cgy: f64,
    ) -> StructureFixture {
        StructureFixture {
            info: StructureInfo {
                id: id.to_string(),
                codes: vec![code.to_string()],
                dicom_type: dicom_type.to_string(),
                is_empty: false,
                color: StructureColor { r: 255, g: 0, b: 0 },
            },
            curve: vec![
                DvhPoint { dose: 0.0, volume: 100.0 },
                DvhPoint { dose: d98_cgy, volume: 98.0 },
                DvhPoint { dose: 7200.0, volume: 0.0 },
            ],
            volume_cc: 150.0,
            mean_dose_cgy: mean_cgy,
            max_dose_cgy: 7200.0,
            min_dose_cgy: 1000.0,
        }
    }

    fn plan_fixture(plan: PlanRef, ptv_d98: f64) -> PlanFixture {
        let mut f = PlanFixture::new(plan, 7000.0);
        f.structures.insert(
            "PTV_7000".to_string(),
            fixture("PTV_7000", "PTV1", "PTV", ptv_d98, 7000.0),
        );
        f.structures.insert(
            "Bladder".to_string(),
            fixture("Bladder", "BLADDER1", "ORGAN", 3000.0, 3500.0),
        );
        f
    }

    fn patient_fixture(patient_id: &str, course: &str, fail_optimize: bool) -> PatientFixture {
        let mut model = plan_fixture(PlanRef::new(course, "RapAuto"), 6800.0);
        model.fail_optimize = fail_optimize;
        let clinical = plan_fixture(PlanRef::new(course, "Clinical"), 6500.0);
        PatientFixture {
            patient_id: patient_id.to_string(),
            last_name: "Doe".to_string(),
            first_name: "Jane".to_string(),
            plans: vec![model, clinical],
        }
    }

    fn model_definition(patients: Vec<PatientDefinition>) -> ModelDefinition {
        let mut log = WarningLog::new();
        let parser = MetricParser::new();
        ModelDefinition {
            name: "Prostate".to_string(),
            structures: vec![
                ModelStructureDefinition::new("PTV", "PTV1", "yes"),
                ModelStructureDefinition::new("BLADDER", "BLADDER1", "no"),
            ],
            patients,
            metrics: vec![
                parser.parse("PTV", "D98%[cGy]", &mut log).unwrap(),
                parser.parse("BLADDER", "Mean[cGy]", &mut log).unwrap(),
            ],
        }
    }

    fn patient_definition(patient_id: &str, course: &str) -> PatientDefinition {
        PatientDefinition {
            patient_id: patient_id.to_string(),
            model_plan: PlanRef::new(course, "RapAuto"),
            clinical_plan: PlanRef::new(course, "Clinical"),
            target_doses: Default::default(),
        }
    }

    /// 结构列举配额用尽后开始报错的委托引擎
    struct LimitedEngine {
        inner: ScriptedEngine,
        list_calls_left: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl PlanningEngine for LimitedEngine {
        async fn open_patient(&self, patient_id: &str) -> Result<()> {
            self.inner.open_patient(patient_id).await
        }

        async fn close_patient(&self) -> Result<()> {
            self.inner.close_patient().await
        }

        async fn begin_modifications(&self) -> Result<()> {
            self.inner.begin_modifications().await
        }

        async fn save_modifications(&self) -> Result<()> {
            self.inner.save_modifications().await
        }

        async fn patient_name(&self) -> Result<(String, String)> {
            self.inner.patient_name().await
        }

        async fn plan_exists(&self, plan: &PlanRef) -> Result<bool> {
            self.inner.plan_exists(plan).await
        }

        async fn structure_exists(&self, plan: &PlanRef, structure_id: &str) -> Result<bool> {
            self.inner.structure_exists(plan, structure_id).await
        }

        async fn list_structures(&self, plan: &PlanRef) -> Result<Vec<StructureInfo>> {
            let granted = self
                .list_calls_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if !granted {
                return Err(ValidationError::EngineOperation(
                    "structure listing unavailable".to_string(),
                ));
            }
            self.inner.list_structures(plan).await
        }

        async fn total_prescribed_dose(&self, plan: &PlanRef) -> Result<DoseValue> {
            self.inner.total_prescribed_dose(plan).await
        }

        async fn plan_dose_unit(&self, plan: &PlanRef) -> Result<DoseUnit> {
            self.inner.plan_dose_unit(plan).await
        }

        async fn max_dose_3d(&self, plan: &PlanRef) -> Result<DoseValue> {
            self.inner.max_dose_3d(plan).await
        }

        async fn dose_at_volume(
            &self,
            plan: &PlanRef,
            structure_id: &str,
            volume: f64,
            volume_presentation: VolumePresentation,
            dose_presentation: DosePresentation,
        ) -> Result<DoseValue> {
            self.inner
                .dose_at_volume(plan, structure_id, volume, volume_presentation, dose_presentation)
                .await
        }

        async fn volume_at_dose(
            &self,
            plan: &PlanRef,
            structure_id: &str,
            dose: DoseValue,
            volume_presentation: VolumePresentation,
        ) -> Result<f64> {
            self.inner
                .volume_at_dose(plan, structure_id, dose, volume_presentation)
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
            self.inner
                .cumulative_dvh(plan, structure_id, dose_presentation, volume_presentation, bin_width)
                .await
        }

        async fn dvh_estimate_bands(
            &self,
            plan: &PlanRef,
        ) -> Result<BTreeMap<String, EstimateBand>> {
            self.inner.dvh_estimate_bands(plan).await
        }

        async fn calculate_dvh_estimates(
            &self,
            plan: &PlanRef,
            model_name: &str,
            target_doses: &TargetDoseLevels,
            matches: &StructureMatch,
        ) -> Result<OperationOutcome> {
            self.inner
                .calculate_dvh_estimates(plan, model_name, target_doses, matches)
                .await
        }

        async fn optimize(&self, plan: &PlanRef) -> Result<OperationOutcome> {
            self.inner.optimize(plan).await
        }

        async fn calculate_dose(&self, plan: &PlanRef) -> Result<OperationOutcome> {
            self.inner.calculate_dose(plan).await
        }

        async fn set_plan_normalization(&self, plan: &PlanRef, value: f64) -> Result<()> {
            self.inner.set_plan_normalization(plan, value).await
        }

        async fn plan_normalization(&self, plan: &PlanRef) -> Result<f64> {
            self.inner.plan_normalization(plan).await
        }
    }

    /// 记录收到的状态通知
    #[derive(Default)]
    struct RecordingObserver {
        states: Mutex<Vec<(usize, PipelineState)>>,
    }

    impl ProgressObserver for RecordingObserver {
        fn on_state(&self, patient_index: usize, _total: usize, state: PipelineState) {
            self.states.lock().unwrap().push((patient_index, state));
        }
    }

    #[tokio::test]
    async fn test_full_run_single_patient() {
        let engine = ScriptedEngine::new(vec![patient_fixture("PAT001", "C1", false)]);
        let model = model_definition(vec![patient_definition("PAT001", "C1")]);
        let pipeline = ValidationPipeline::new(&engine);

        pipeline.validate_inputs(&model).await.unwrap();

        let observer = RecordingObserver::default();
        let report = pipeline.run(&model, &observer).await.unwrap();

        assert_eq!(report.patients.len(), 1);
        let record = &report.patients[0];
        assert_eq!(
            record.model_matches.get("PTV_7000").map(String::as_str),
            Some("PTV")
        );
        assert_eq!(
            record.model_matches.get("Bladder").map(String::as_str),
            Some("BLADDER")
        );
        // 未配置剂量回退为处方总剂量
        let dose = record.resolved_target_doses.get("PTV_7000").unwrap();
        assert!((dose.value - 7000.0).abs() < 1e-9);
        assert!(report
            .warnings
            .iter()
            .any(|w| w.title == "Dose Level Not Specified"));

        // 归一化因子写回模型计划
        engine.open_patient("PAT001").await.unwrap();
        let factor = engine
            .plan_normalization(&PlanRef::new("C1", "RapAuto"))
            .await
            .unwrap();
        assert!((factor - 6800.0 / 6500.0 * 100.0).abs() < 1e-9);

        // 选中病人的指标：模型D98 6800 vs 临床6500
        let d98 = report
            .metric_results
            .iter()
            .find(|r| r.metric == "D98%[cGy]")
            .unwrap();
        assert!((d98.difference - 300.0).abs() < 1e-9);

        // 每个状态一次通知，顺序严格线性
        let states: Vec<PipelineState> = observer
            .states
            .lock()
            .unwrap()
            .iter()
            .map(|(_, s)| *s)
            .collect();
        assert_eq!(
            states,
            vec![
                PipelineState::StructureMatching,
                PipelineState::DoseEstimating,
                PipelineState::Optimizing,
                PipelineState::DoseCalculating,
                PipelineState::Normalizing,
                PipelineState::Saved,
            ]
        );

        // 两侧都有曲线序列
        assert!(!report.series.is_empty());
    }

    #[tokio::test]
    async fn test_failure_isolated_to_one_patient() {
        let engine = ScriptedEngine::new(vec![
            patient_fixture("PAT001", "C1", true),
            patient_fixture("PAT002", "C2", false),
        ]);
        let model = model_definition(vec![
            patient_definition("PAT001", "C1"),
            patient_definition("PAT002", "C2"),
        ]);
        let pipeline = ValidationPipeline::new(&engine);

        let report = pipeline.run(&model, &NoProgress).await.unwrap();

        // 病人1优化失败，病人2完整走完
        assert_eq!(report.patients.len(), 1);
        assert_eq!(report.patients[0].patient_id, "PAT002");

        let errors: Vec<_> = report
            .warnings
            .iter()
            .filter(|w| w.severity == Severity::Error)
            .collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].patient.as_deref(), Some("PAT001"));
    }

    #[tokio::test]
    async fn test_analysis_failure_keeps_partial_report() {
        // 流水线本体跑完（list_structures调用2次），选中病人的
        // 指标分析阶段引擎故障：运行仍返回报告，指标为空，
        // 曲线序列与病人记录保留，故障记为一条Error
        let engine = LimitedEngine {
            inner: ScriptedEngine::new(vec![patient_fixture("PAT001", "C1", false)]),
            list_calls_left: AtomicUsize::new(2),
        };
        let model = model_definition(vec![patient_definition("PAT001", "C1")]);
        let pipeline = ValidationPipeline::new(&engine);

        let report = pipeline.run(&model, &NoProgress).await.unwrap();

        assert_eq!(report.patients.len(), 1);
        assert!(report.metric_results.is_empty());
        assert!(!report.series.is_empty());

        let errors: Vec<_> = report
            .warnings
            .iter()
            .filter(|w| w.severity == Severity::Error)
            .collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].title, "Analysis Failed");
        assert_eq!(errors[0].patient.as_deref(), Some("PAT001"));
    }

    #[tokio::test]
    async fn test_preflight_rejects_missing_plan() {
        let engine = ScriptedEngine::new(vec![patient_fixture("PAT001", "C1", false)]);
        let mut model = model_definition(vec![patient_definition("PAT001", "C1")]);
        model.patients[0].clinical_plan = PlanRef::new("C1", "Missing");
        let pipeline = ValidationPipeline::new(&engine);

        let result = pipeline.validate_inputs(&model).await;
        assert!(matches!(result, Err(ValidationError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_preflight_rejects_unknown_target_dose_key() {
        let engine = ScriptedEngine::new(vec![patient_fixture("PAT001", "C1", false)]);
        let mut model = model_definition(vec![patient_definition("PAT001", "C1")]);
        model.patients[0].target_doses.insert(
            "RECTUM".to_string(),
            planval_core::DoseValue::new(5000.0, planval_core::DoseUnit::CentiGray),
        );
        let pipeline = ValidationPipeline::new(&engine);

        let result = pipeline.validate_inputs(&model).await;
        assert!(matches!(result, Err(ValidationError::Config(_))));
    }
}
