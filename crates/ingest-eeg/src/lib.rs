//! # EEG导入模块
//!
//! 解析 BrainVision 格式 (`.vhdr` / `.vmrk`) 并按文件名前缀归组数据集文件。

pub mod brainvision;
pub mod scanner;

pub use brainvision::{BrainVisionReader, EegRecording};
pub use scanner::scan_datasets;
