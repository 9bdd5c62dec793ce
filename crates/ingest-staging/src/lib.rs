//! # 压缩包暂存模块
//!
//! 将上传的压缩包写入用户工作区并解压到独立目录。

pub mod stager;

pub use stager::{ArchiveInput, ArchiveStager, StagedArchive};
