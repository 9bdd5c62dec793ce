//! 数据集服务交接
//!
//! 导入任务以JSON文档形式同步提交，DICOM与EEG任务使用不同端点。

use async_trait::async_trait;
use ingest_core::{ImportError, ImportJob, JobPayload, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info, info_span, Instrument};

/// 请求ID头
pub const REQUEST_ID_HEADER: &str = "X-Request-Id";

/// 数据集服务端点配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetServiceConfig {
    pub dicom_url: String,
    pub eeg_url: String,
    pub timeout_secs: u64,
    /// 可选的 Bearer 令牌
    pub auth_token: Option<String>,
}

impl Default for DatasetServiceConfig {
    fn default() -> Self {
        Self {
            dicom_url: "http://localhost:9904/datasetacquisition_dicom/new_dicom".to_string(),
            eeg_url: "http://localhost:9904/datasetacquisition_eeg/new_eeg".to_string(),
            timeout_secs: 60,
            auth_token: None,
        }
    }
}

impl DatasetServiceConfig {
    /// 按任务内容选择端点
    pub fn endpoint_for(&self, job: &ImportJob) -> &str {
        match job.payload {
            JobPayload::Dicom { .. } => &self.dicom_url,
            JobPayload::Eeg { .. } => &self.eeg_url,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// 外部数据集服务
#[async_trait]
pub trait DatasetService: Send + Sync {
    /// 提交导入任务，成功返回时服务已接收
    async fn submit(&self, job: &ImportJob, request_id: &str) -> Result<()>;
}

/// 基于HTTP的数据集服务客户端
pub struct HttpDatasetService {
    config: DatasetServiceConfig,
    client: reqwest::Client,
}

impl HttpDatasetService {
    pub fn new(config: DatasetServiceConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .user_agent(concat!("neuro-ingest/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ImportError::Config(format!("无法创建HTTP客户端: {}", e)))?;
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &DatasetServiceConfig {
        &self.config
    }

    async fn post(&self, endpoint: &str, job: &ImportJob, request_id: &str) -> Result<()> {
        let mut request = self
            .client
            .post(endpoint)
            .header(REQUEST_ID_HEADER, request_id)
            .json(job);
        if let Some(token) = &self.config.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            error!("数据集服务请求失败: {}", e);
            if e.is_timeout() {
                ImportError::Timeout {
                    endpoint: endpoint.to_string(),
                    request_id: request_id.to_string(),
                }
            } else {
                ImportError::Transport {
                    endpoint: endpoint.to_string(),
                    request_id: request_id.to_string(),
                    message: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        if status.is_success() {
            info!("数据集服务已接收导入任务: {}", status);
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        error!("数据集服务返回错误状态 {}: {}", status, body);
        let message = format!("HTTP {}: {}", status, body.trim());
        // 5xx 视为服务不可用，可重试
        if status.is_server_error() {
            Err(ImportError::Transport {
                endpoint: endpoint.to_string(),
                request_id: request_id.to_string(),
                message,
            })
        } else {
            Err(ImportError::Protocol {
                endpoint: endpoint.to_string(),
                request_id: request_id.to_string(),
                message,
            })
        }
    }
}

#[async_trait]
impl DatasetService for HttpDatasetService {
    async fn submit(&self, job: &ImportJob, request_id: &str) -> Result<()> {
        let endpoint = self.config.endpoint_for(job).to_string();
        let span = info_span!("dataset_submit", request_id = %request_id, endpoint = %endpoint);
        self.post(&endpoint, job, request_id).instrument(span).await
    }
}
