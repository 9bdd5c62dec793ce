//! 配置管理
//!
//! 配置文件（TOML/JSON/YAML，可选）叠加 `INGEST__` 前缀的环境变量，
//! 例如 `INGEST__IMPORT__IMPORT_DIR=/data/imports`。

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use ingest_dicom::PacsNode;
use ingest_integration::DatasetServiceConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{error, info};

/// 未指定配置文件时查找的文件名（不含扩展名）
pub const DEFAULT_CONFIG_NAME: &str = "ingest";
/// 环境变量前缀
pub const ENV_PREFIX: &str = "INGEST";

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// 导入系统完整配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// 导入目录配置
    pub import: ImportConfig,
    /// PACS节点配置
    pub pacs: PacsNode,
    /// 数据集服务配置
    pub datasets: DatasetServiceConfig,
    /// 日志配置
    pub logging: LoggingConfig,
}

/// 导入目录配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    /// 所有工作目录的根
    pub import_dir: String,
    /// 压缩包根目录下的DICOMDIR文件名
    pub dicomdir_name: String,
    /// 厂商上传工具生成的任务文件名
    pub vendor_job_file: String,
    /// 每个序列最多尝试读取的图像数
    pub enrichment_attempts: usize,
    /// 固定随机种子，用于可复现的暂存目录
    pub random_seed: Option<u64>,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            import_dir: "./data/imports".to_string(),
            dicomdir_name: "DICOMDIR".to_string(),
            vendor_job_file: "importJob.json".to_string(),
            enrichment_attempts: 3,
            random_seed: None,
        }
    }
}

/// 日志输出格式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Plain,
    Json,
}

/// 日志配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 日志级别，`RUST_LOG` 优先
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Plain,
        }
    }
}

impl IngestConfig {
    pub fn import_root(&self) -> PathBuf {
        PathBuf::from(&self.import.import_dir)
    }
}

/// 配置验证器
#[derive(Debug)]
pub struct ConfigValidator {
    /// 验证规则
    validation_rules: Vec<ValidationRule>,
}

/// 验证规则
#[derive(Debug)]
struct ValidationRule {
    /// 字段路径
    field_path: &'static str,
    /// 验证函数
    validator: fn(&IngestConfig) -> Result<()>,
    /// 错误消息
    error_message: &'static str,
}

fn require_non_empty(value: &str, name: &str) -> Result<()> {
    if value.trim().is_empty() {
        anyhow::bail!("{} 不能为空", name);
    }
    Ok(())
}

fn require_http_url(value: &str) -> Result<()> {
    if !(value.starts_with("http://") || value.starts_with("https://")) {
        anyhow::bail!("不是HTTP地址: {:?}", value);
    }
    Ok(())
}

impl ConfigValidator {
    pub fn new() -> Self {
        let validation_rules = vec![
            ValidationRule {
                field_path: "import.import_dir",
                validator: |config| require_non_empty(&config.import.import_dir, "导入目录"),
                error_message: "Invalid import directory",
            },
            ValidationRule {
                field_path: "import.dicomdir_name",
                validator: |config| require_non_empty(&config.import.dicomdir_name, "DICOMDIR文件名"),
                error_message: "Invalid DICOMDIR name",
            },
            ValidationRule {
                field_path: "import.vendor_job_file",
                validator: |config| require_non_empty(&config.import.vendor_job_file, "任务文件名"),
                error_message: "Invalid vendor job file name",
            },
            ValidationRule {
                field_path: "import.enrichment_attempts",
                validator: |config| {
                    if config.import.enrichment_attempts == 0 {
                        anyhow::bail!("至少需要尝试1个实例");
                    }
                    Ok(())
                },
                error_message: "Invalid enrichment attempts",
            },
            ValidationRule {
                field_path: "pacs",
                validator: |config| config.pacs.validate().map_err(anyhow::Error::from),
                error_message: "Invalid PACS node",
            },
            ValidationRule {
                field_path: "datasets.dicom_url",
                validator: |config| require_http_url(&config.datasets.dicom_url),
                error_message: "Invalid DICOM dataset endpoint",
            },
            ValidationRule {
                field_path: "datasets.eeg_url",
                validator: |config| require_http_url(&config.datasets.eeg_url),
                error_message: "Invalid EEG dataset endpoint",
            },
            ValidationRule {
                field_path: "datasets.timeout_secs",
                validator: |config| {
                    if config.datasets.timeout_secs == 0 {
                        anyhow::bail!("超时时间必须大于0");
                    }
                    Ok(())
                },
                error_message: "Invalid dataset service timeout",
            },
            ValidationRule {
                field_path: "logging.level",
                validator: |config| {
                    let level = config.logging.level.to_ascii_lowercase();
                    if !LOG_LEVELS.contains(&level.as_str()) {
                        anyhow::bail!("未知日志级别: {}", config.logging.level);
                    }
                    Ok(())
                },
                error_message: "Invalid log level",
            },
        ];

        Self { validation_rules }
    }

    /// 验证配置
    pub fn validate(&self, config: &IngestConfig) -> Result<()> {
        for rule in &self.validation_rules {
            if let Err(e) = (rule.validator)(config) {
                error!("Configuration validation failed for {}: {}", rule.field_path, e);
                return Err(anyhow::anyhow!("{}: {}", rule.error_message, e));
            }
        }
        Ok(())
    }
}

impl Default for ConfigValidator {
    fn default() -> Self {
        Self::new()
    }
}

/// 配置管理器
#[derive(Debug)]
pub struct ConfigManager {
    config: IngestConfig,
    config_path: Option<PathBuf>,
}

impl ConfigManager {
    /// 加载并校验配置
    ///
    /// 指定路径时文件必须存在；未指定时查找当前目录下的 `ingest.*`。
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        Self::load_with_prefix(config_path, ENV_PREFIX)
    }

    fn load_with_prefix(config_path: Option<&Path>, env_prefix: &str) -> Result<Self> {
        let file = match config_path {
            Some(path) => File::from(path).required(true),
            None => File::with_name(DEFAULT_CONFIG_NAME).required(false),
        };

        let settings = Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix(env_prefix)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to load configuration")?;

        let config: IngestConfig = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        ConfigValidator::new().validate(&config)?;

        match config_path {
            Some(path) => info!("Configuration loaded successfully from: {}", path.display()),
            None => info!("Configuration loaded from defaults and environment"),
        }
        Ok(Self {
            config,
            config_path: config_path.map(Path::to_path_buf),
        })
    }

    /// 使用已构造的配置
    pub fn from_config(config: IngestConfig) -> Result<Self> {
        ConfigValidator::new().validate(&config)?;
        Ok(Self {
            config,
            config_path: None,
        })
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    pub fn into_config(self) -> IngestConfig {
        self.config
    }

    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    /// 以TOML输出生效配置
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(&self.config).context("Failed to serialize configuration")
    }
}
