//! # 导入工作流模块
//!
//! 串联暂存、索引解析、分类补全、PACS查询、EEG解析与任务交接，
//! 每个请求独立处理，文件操作限定在该请求的解压目录内。

pub mod engine;

pub use engine::{EngineSettings, ImportEngine};
