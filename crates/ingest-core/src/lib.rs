//! # Ingest Core
//!
//! 导入流水线的核心模块，提供领域数据结构、错误定义、导入任务组装和通用工具。

pub mod error;
pub mod job;
pub mod models;
pub mod utils;

pub use error::{ErrorKind, ErrorModel, ImportError, Result};
pub use job::{ImportJob, JobAssembler, JobPayload, Provenance};
pub use models::*;
