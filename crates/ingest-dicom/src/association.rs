//! PACS关联参数

use ingest_core::{ImportError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// AE Title 最大长度
pub const MAX_AE_TITLE_LENGTH: usize = 16;
/// 最小PDU长度
pub const MIN_PDU_LENGTH: u32 = 4096;

/// 远程PACS节点
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PacsNode {
    pub calling_ae_title: String,
    pub called_ae_title: String,
    pub host: String,
    pub port: u16,
    pub max_pdu_length: u32,
    pub timeout_secs: u64,
}

impl Default for PacsNode {
    fn default() -> Self {
        Self {
            calling_ae_title: "NEURO-INGEST".to_string(),
            called_ae_title: "ANY-SCP".to_string(),
            host: "127.0.0.1".to_string(),
            port: 104,
            max_pdu_length: 16384,
            timeout_secs: 30,
        }
    }
}

impl PacsNode {
    /// TCP地址
    pub fn socket_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// 日志与错误中使用的节点标识
    pub fn endpoint(&self) -> String {
        format!("{}@{}:{}", self.called_ae_title, self.host, self.port)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// 校验关联参数
    pub fn validate(&self) -> Result<()> {
        validate_ae_title(&self.calling_ae_title)?;
        validate_ae_title(&self.called_ae_title)?;
        if self.host.trim().is_empty() {
            return Err(ImportError::Config("PACS主机地址不能为空".to_string()));
        }
        if self.port == 0 {
            return Err(ImportError::Config("PACS端口不能为0".to_string()));
        }
        if self.max_pdu_length < MIN_PDU_LENGTH {
            return Err(ImportError::Config(format!(
                "最大PDU长度不能小于 {}",
                MIN_PDU_LENGTH
            )));
        }
        if self.timeout_secs == 0 {
            return Err(ImportError::Config("PACS超时时间必须大于0".to_string()));
        }
        Ok(())
    }
}

/// 校验AE Title: 1-16个可打印ASCII字符，不含反斜杠
pub fn validate_ae_title(ae_title: &str) -> Result<()> {
    let trimmed = ae_title.trim();
    if trimmed.is_empty() || trimmed.len() > MAX_AE_TITLE_LENGTH {
        return Err(ImportError::Config(format!(
            "AE Title长度必须为1-{}个字符: {:?}",
            MAX_AE_TITLE_LENGTH, ae_title
        )));
    }
    if !trimmed.chars().all(|c| c.is_ascii_graphic() || c == ' ') || trimmed.contains('\\') {
        return Err(ImportError::Config(format!(
            "AE Title包含非法字符: {:?}",
            ae_title
        )));
    }
    Ok(())
}
