//! 计划验证演练主程序
//!
//! 加载验证配置，依据配置给脚本化引擎生成演练数据，跑完整个验证
//! 流水线，最后打印指标结果表与告警日志。

use anyhow::{Context, Result};
use clap::Parser;
use planval_config::{load_model, ModelDefinition, PatientDefinition};
use planval_core::{
    DoseUnit, DvhPoint, ModelStructureDefinition, PlanRef, StructureColor, WarningLog,
};
use planval_engine::{PatientFixture, PlanFixture, ScriptedEngine, StructureFixture, StructureInfo};
use planval_workflow::{PipelineState, ProgressObserver, ValidationPipeline, ValidationRunReport};
use std::path::Path;
use tracing::{error, info};

/// 告警日志落盘文件名，写在配置文件旁边
const LOG_FILE_NAME: &str = "PlanValidationLog.txt";

/// 演练用结构着色盘
const PALETTE: [StructureColor; 4] = [
    StructureColor { r: 220, g: 60, b: 60 },
    StructureColor { r: 60, g: 140, b: 220 },
    StructureColor { r: 60, g: 180, b: 90 },
    StructureColor { r: 200, g: 160, b: 40 },
];

/// 验证演练命令行参数
#[derive(Parser, Debug)]
#[command(name = "planval-runner")]
#[command(about = "自动剂量规划模型验证演练器")]
struct Args {
    /// 配置文件路径
    #[arg(short, long)]
    config: String,

    /// 要验证的模型名称
    #[arg(short, long)]
    model: String,

    /// 日志级别
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

/// 把状态转换打到日志的进度观察者
struct ConsoleProgress;

impl ProgressObserver for ConsoleProgress {
    fn on_state(&self, patient_index: usize, patient_total: usize, state: PipelineState) {
        info!("病人 {}/{}: {}", patient_index + 1, patient_total, state);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(&args.log_level)
        .init();

    info!("加载验证配置 {} (模型 {})...", args.config, args.model);
    let mut log = WarningLog::new();
    let model = load_model(&args.config, &args.model, &mut log)?;
    info!(
        "模型 {} 加载完成: {} 结构, {} 病人, {} 指标",
        model.name,
        model.structures.len(),
        model.patients.len(),
        model.metrics.len()
    );

    // 依据配置生成脚本化引擎演练数据
    let engine = seed_engine(&model);
    let pipeline = ValidationPipeline::new(&engine);

    if let Err(e) = pipeline.validate_inputs(&model).await {
        error!("运行前检查失败: {}", e);
        return Err(e.into());
    }

    let report = pipeline.run(&model, &ConsoleProgress).await?;
    print_metric_results(&report);

    // 配置阶段与运行阶段的告警合并输出
    let mut rendered: Vec<String> = log.entries().iter().map(|e| e.render()).collect();
    rendered.extend(report.warnings.iter().map(|e| e.render()));
    if !rendered.is_empty() {
        let text = rendered.join("\n");
        println!("\n{text}");

        let log_path = Path::new(&args.config)
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(LOG_FILE_NAME);
        std::fs::write(&log_path, &text)
            .with_context(|| format!("Failed to write warning log to {}", log_path.display()))?;
        info!("告警日志已写入 {}", log_path.display());
    }

    Ok(())
}

fn print_metric_results(report: &ValidationRunReport) {
    println!(
        "Run {}: {} patients completed, {} DVH series",
        report.run_id,
        report.patients.len(),
        report.series.len()
    );
    println!(
        "{:<16} {:<14} {:>12} {:>12} {:>12}",
        "Structure", "Metric", "Clinical", "Model", "Difference"
    );
    for result in &report.metric_results {
        println!(
            "{:<16} {:<14} {:>12.2} {:>12.2} {:>12.2}",
            result.structure,
            result.metric,
            result.clinical_value,
            result.model_value,
            result.difference
        );
    }
}

/// 从模型定义生成演练夹具
///
/// 两侧计划共用处方剂量，模型侧目标覆盖略优于临床侧，
/// 使归一化与指标差值有非零的演示值。
fn seed_engine(model: &ModelDefinition) -> ScriptedEngine {
    let patients = model
        .patients
        .iter()
        .map(|patient| PatientFixture {
            patient_id: patient.patient_id.clone(),
            last_name: String::new(),
            first_name: String::new(),
            plans: vec![
                seed_plan(patient.model_plan.clone(), patient, &model.structures, 0.97),
                seed_plan(patient.clinical_plan.clone(), patient, &model.structures, 0.93),
            ],
        })
        .collect();
    ScriptedEngine::new(patients)
}

fn seed_plan(
    plan: PlanRef,
    patient: &PatientDefinition,
    structures: &[ModelStructureDefinition],
    coverage: f64,
) -> PlanFixture {
    let total_cgy = nominal_total_dose(patient);
    let mut fixture = PlanFixture::new(plan, total_cgy);

    for (index, structure) in structures.iter().enumerate() {
        let (d98, max_dose) = if structure.is_target {
            (total_cgy * coverage, total_cgy * 1.03)
        } else {
            (total_cgy * 0.35 * coverage, total_cgy * 0.6)
        };
        fixture.structures.insert(
            structure.model_structure_id.clone(),
            StructureFixture {
                info: StructureInfo {
                    id: structure.model_structure_id.clone(),
                    codes: vec![structure.structure_code.clone()],
                    dicom_type: if structure.is_target { "PTV" } else { "ORGAN" }.to_string(),
                    is_empty: false,
                    color: PALETTE[index % PALETTE.len()],
                },
                curve: vec![
                    DvhPoint { dose: 0.0, volume: 100.0 },
                    DvhPoint { dose: d98, volume: 98.0 },
                    DvhPoint { dose: max_dose, volume: 0.0 },
                ],
                volume_cc: 120.0,
                mean_dose_cgy: (d98 + max_dose) / 2.0,
                max_dose_cgy: max_dose,
                min_dose_cgy: d98 * 0.8,
            },
        );
    }
    fixture
}

/// 演练处方剂量：取首个已配置的目标剂量（换算到cGy），否则7000 cGy
fn nominal_total_dose(patient: &PatientDefinition) -> f64 {
    patient
        .target_doses
        .values()
        .find(|d| !d.is_undefined())
        .map(|d| match d.unit {
            DoseUnit::Gray => d.value * 100.0,
            _ => d.value,
        })
        .unwrap_or(7000.0)
}
