//! 导入服务命令行程序

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use ingest_admin::{init_logging, ConfigManager};
use ingest_core::utils::parse_dicom_date;
use ingest_core::{ErrorModel, ImportError, ImportJob};
use ingest_dicom::DicomQuery;
use ingest_staging::ArchiveInput;
use ingest_workflow::ImportEngine;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info};

/// 神经影像导入命令行参数
#[derive(Parser, Debug)]
#[command(name = "ingest-server")]
#[command(about = "神经影像导入流水线: DICOM / EEG 压缩包、厂商上传工具包与PACS查询")]
struct Cli {
    /// 配置文件路径，未指定时查找 ./ingest.*
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 上传含DICOMDIR的压缩包
    UploadDicom(UploadArgs),
    /// 上传厂商上传工具生成的压缩包，解析后直接提交
    UploadVendor(UploadArgs),
    /// 上传BrainVision EEG压缩包
    UploadEeg(UploadArgs),
    /// 查询PACS
    QueryPacs(QueryArgs),
    /// 提交导入任务描述 (JSON文件)
    StartImport {
        /// 任务描述文件
        job: PathBuf,
    },
    /// 输出生效配置
    ShowConfig,
}

#[derive(Args, Debug)]
struct UploadArgs {
    /// 压缩包路径
    archive: PathBuf,

    /// 用户ID，决定工作目录
    #[arg(short, long, default_value_t = 1)]
    user_id: u64,

    /// 移动压缩包而不是复制其内容
    #[arg(long = "move")]
    move_file: bool,
}

#[derive(Args, Debug)]
struct QueryArgs {
    /// 患者姓名，支持 * 与 ? 通配符
    #[arg(long)]
    patient_name: Option<String>,

    #[arg(long)]
    patient_id: Option<String>,

    /// 出生日期 (YYYYMMDD 或 YYYY-MM-DD)
    #[arg(long, value_parser = parse_date)]
    birth_date: Option<NaiveDate>,

    /// 检查日期起始
    #[arg(long, value_parser = parse_date)]
    from: Option<NaiveDate>,

    /// 检查日期结束
    #[arg(long, value_parser = parse_date)]
    to: Option<NaiveDate>,

    #[arg(long)]
    modality: Option<String>,

    #[arg(long)]
    description: Option<String>,
}

impl From<QueryArgs> for DicomQuery {
    fn from(args: QueryArgs) -> Self {
        DicomQuery {
            patient_name: args.patient_name,
            patient_id: args.patient_id,
            patient_birth_date: args.birth_date,
            study_date_from: args.from,
            study_date_to: args.to,
            modality: args.modality,
            study_description: args.description,
        }
    }
}

fn parse_date(value: &str) -> std::result::Result<NaiveDate, String> {
    parse_dicom_date(value).ok_or_else(|| format!("无效日期: {}", value))
}

fn archive_input(args: &UploadArgs) -> Result<ArchiveInput> {
    if args.move_file {
        return Ok(ArchiveInput::Path(args.archive.clone()));
    }
    let data = std::fs::read(&args.archive)
        .with_context(|| format!("无法读取压缩包 {}", args.archive.display()))?;
    Ok(ArchiveInput::Bytes {
        data,
        file_name: file_name(&args.archive),
        content_type: None,
    })
}

fn file_name(path: &Path) -> Option<String> {
    path.file_name().map(|name| name.to_string_lossy().into_owned())
}

fn to_json<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).context("无法序列化输出")
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Submitted {
    request_id: String,
}

async fn run(command: Command, manager: &ConfigManager) -> Result<String> {
    if let Command::ShowConfig = command {
        return manager.to_toml();
    }

    let engine = ImportEngine::from_config(manager.config())?;
    match command {
        Command::UploadDicom(args) => {
            let job = engine.upload_dicom_archive(args.user_id, archive_input(&args)?).await?;
            to_json(&job)
        }
        Command::UploadVendor(args) => {
            let job = engine
                .upload_from_vendor_tool(args.user_id, archive_input(&args)?)
                .await?;
            to_json(&job)
        }
        Command::UploadEeg(args) => {
            let job = engine.upload_eeg_archive(args.user_id, archive_input(&args)?).await?;
            to_json(&job)
        }
        Command::QueryPacs(args) => {
            let job = engine.query_pacs(&DicomQuery::from(args)).await?;
            if job.is_none() {
                info!("PACS没有匹配的检查");
            }
            to_json(&job)
        }
        Command::StartImport { job } => {
            let text = std::fs::read_to_string(&job)
                .with_context(|| format!("无法读取任务描述 {}", job.display()))?;
            let job: ImportJob = serde_json::from_str(&text)
                .map_err(|e| ImportError::JobFormat(e.to_string()))?;
            let request_id = engine.start_import(&job).await?;
            to_json(&Submitted { request_id })
        }
        Command::ShowConfig => manager.to_toml(),
    }
}

/// 边界错误只输出状态码与消息
fn error_model(error: &anyhow::Error) -> ErrorModel {
    match error.downcast_ref::<ImportError>() {
        Some(import_error) => import_error.to_error_model(),
        None => ErrorModel {
            code: 500,
            message: error.to_string(),
        },
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let manager = match ConfigManager::load(cli.config.as_deref()) {
        Ok(manager) => manager,
        Err(e) => {
            eprintln!("配置加载失败: {:#}", e);
            return ExitCode::from(2);
        }
    };

    if let Err(e) = init_logging(&manager.config().logging) {
        eprintln!("{:#}", e);
    }

    match run(cli.command, &manager).await {
        Ok(output) => {
            println!("{}", output);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("命令执行失败: {:#}", e);
            let model = error_model(&e);
            match serde_json::to_string_pretty(&model) {
                Ok(text) => eprintln!("{}", text),
                Err(_) => eprintln!("{}: {}", model.code, model.message),
            }
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_query_arguments() {
        let cli = Cli::parse_from([
            "ingest-server",
            "query-pacs",
            "--patient-name",
            "Doe*",
            "--from",
            "20190101",
            "--to",
            "2019-12-31",
            "--modality",
            "mr",
        ]);
        let Command::QueryPacs(args) = cli.command else {
            panic!("expected query-pacs");
        };
        let query = DicomQuery::from(args);
        assert_eq!(query.patient_name.as_deref(), Some("Doe*"));
        assert_eq!(query.study_date_from, NaiveDate::from_ymd_opt(2019, 1, 1));
        assert_eq!(query.study_date_to, NaiveDate::from_ymd_opt(2019, 12, 31));
        assert_eq!(query.study_date_range().as_deref(), Some("20190101-20191231"));
    }

    #[test]
    fn test_error_model_hides_internal_details() {
        let error = anyhow::Error::from(ImportError::MissingMarker("DICOMDIR".to_string()));
        assert_eq!(error_model(&error).code, 422);

        let error = anyhow::Error::from(ImportError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            "/srv/imports/7/123.upload",
        )));
        let model = error_model(&error);
        assert_eq!(model.code, 500);
        assert!(!model.message.contains("/srv/imports"));
    }
}
