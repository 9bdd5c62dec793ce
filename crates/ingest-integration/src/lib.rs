//! # 导入集成模块
//!
//! 负责把组装完成的导入任务交给外部数据集服务：
//! - DICOM 与 EEG 任务分别提交到独立的服务端点
//! - 同步请求带超时，失败时携带端点与请求ID

pub mod dataset_service;

pub use dataset_service::{DatasetService, DatasetServiceConfig, HttpDatasetService};
