//! # 导入管理模块
//!
//! 提供配置加载、校验与日志初始化等运维功能

pub mod config;
pub mod logging;

pub use config::{ConfigManager, ConfigValidator, ImportConfig, IngestConfig, LogFormat, LoggingConfig};
pub use logging::init_logging;
