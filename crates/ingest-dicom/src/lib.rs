//! # DICOM导入模块
//!
//! 提供DICOMDIR解析、文件分类与元数据补全、以及PACS C-FIND查询。

pub mod association;
pub mod classifier;
pub mod dicomdir;
pub mod dimse;
pub mod layout;
pub mod parser;
pub mod query;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use association::PacsNode;
pub use classifier::SeriesClassifier;
pub use dicomdir::DicomDirReader;
pub use dimse::DimseFindScu;
pub use parser::DicomParser;
pub use query::{DicomQuery, FindRequest, HierarchicalFind, PacsQueryClient, QueryLevel};
