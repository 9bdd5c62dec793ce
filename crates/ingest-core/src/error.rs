//! 错误定义模块

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 导入系统统一错误类型
#[derive(Error, Debug)]
pub enum ImportError {
    #[error("未上传文件")]
    NoFile,

    #[error("上传文件类型错误，需要 .zip 文件: {0}")]
    UnsupportedArchive(String),

    #[error("压缩包格式无效: {0}")]
    InvalidArchive(String),

    #[error("压缩包中缺少 {0}")]
    MissingMarker(String),

    #[error("解压失败: 目录已存在 {0}")]
    FolderExists(String),

    #[error("压缩包条目路径不安全: {0}")]
    UnsafeEntry(String),

    #[error("导入任务内容为空")]
    EmptyJob,

    #[error("索引文件解析错误: {0}")]
    IndexFormat(String),

    #[error("EEG头文件格式错误: {0}")]
    EegFormat(String),

    #[error("导入任务描述格式错误: {0}")]
    JobFormat(String),

    #[error("网络错误: {endpoint} (请求 {request_id}): {message}")]
    Transport {
        endpoint: String,
        request_id: String,
        message: String,
    },

    #[error("请求超时: {endpoint} (请求 {request_id})")]
    Timeout { endpoint: String, request_id: String },

    #[error("协议错误: {endpoint} (请求 {request_id}): {message}")]
    Protocol {
        endpoint: String,
        request_id: String,
        message: String,
    },

    #[error("配置错误: {0}")]
    Config(String),

    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("系统内部错误: {0}")]
    Internal(String),
}

/// 错误分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// 输入被拒绝，解析之前即返回
    InputRejection,
    /// 格式错误，请求终止且不重试
    Format,
    /// 网络传输失败，调用方可重试
    Transport,
    /// 系统内部错误
    Internal,
}

/// 跨边界返回的结构化错误
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorModel {
    pub code: u16,
    pub message: String,
}

impl ImportError {
    /// 错误分类
    pub fn kind(&self) -> ErrorKind {
        match self {
            ImportError::NoFile
            | ImportError::UnsupportedArchive(_)
            | ImportError::InvalidArchive(_)
            | ImportError::MissingMarker(_)
            | ImportError::FolderExists(_)
            | ImportError::UnsafeEntry(_)
            | ImportError::EmptyJob => ErrorKind::InputRejection,
            ImportError::IndexFormat(_) | ImportError::EegFormat(_) | ImportError::JobFormat(_) => {
                ErrorKind::Format
            }
            ImportError::Transport { .. }
            | ImportError::Timeout { .. }
            | ImportError::Protocol { .. } => ErrorKind::Transport,
            ImportError::Config(_)
            | ImportError::Io(_)
            | ImportError::Serialization(_)
            | ImportError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// 对应的HTTP状态码
    pub fn status_code(&self) -> u16 {
        match self {
            ImportError::Timeout { .. } => 504,
            ImportError::Protocol { .. } => 502,
            ImportError::Transport { .. } => 503,
            _ => match self.kind() {
                ErrorKind::InputRejection | ErrorKind::Format => 422,
                _ => 500,
            },
        }
    }

    /// 调用方是否可以重试
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ImportError::Transport { .. } | ImportError::Timeout { .. }
        )
    }

    /// 转换为对外的错误模型，内部错误不暴露路径等细节
    pub fn to_error_model(&self) -> ErrorModel {
        let message = match self {
            ImportError::Io(_) => "保存上传文件时出错".to_string(),
            ImportError::Serialization(_) => "数据序列化失败".to_string(),
            ImportError::Config(_) | ImportError::Internal(_) => "系统内部错误".to_string(),
            ImportError::FolderExists(_) => "解压失败: 目录已存在".to_string(),
            ImportError::Transport { endpoint, .. } => format!("与远程服务通信失败: {}", endpoint),
            ImportError::Timeout { endpoint, .. } => format!("远程服务请求超时: {}", endpoint),
            ImportError::Protocol { endpoint, .. } => format!("远程服务响应无效: {}", endpoint),
            other => other.to_string(),
        };

        ErrorModel {
            code: self.status_code(),
            message,
        }
    }
}

/// 导入系统统一结果类型
pub type Result<T> = std::result::Result<T, ImportError>;
