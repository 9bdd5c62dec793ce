//! 文件分类与元数据补全
//!
//! 读取系列内每个文件的头部，区分图像与非图像；索引中缺少采集参数的系列
//! 从前几个图像文件的头部补全。

use crate::parser::DicomParser;
use dicom::dictionary_std::tags;
use dicom::object::DefaultDicomObject;
use ingest_core::utils::resolve_relative;
use ingest_core::{Patient, Series, SeriesClassification};
use std::path::Path;
use tracing::{debug, info, warn};

/// 默认尝试补全的图像文件数
pub const DEFAULT_ENRICHMENT_ATTEMPTS: usize = 3;

/// 非图像SOP类前缀: 结构化报告、显示状态、封装文档、波形、配准
const NON_IMAGE_SOP_PREFIXES: &[&str] = &[
    "1.2.840.10008.5.1.4.1.1.88.",
    "1.2.840.10008.5.1.4.1.1.11.",
    "1.2.840.10008.5.1.4.1.1.104.",
    "1.2.840.10008.5.1.4.1.1.9.",
    "1.2.840.10008.5.1.4.1.1.66.",
];

/// 非图像SOP类: 原始数据、MR波谱
const NON_IMAGE_SOP_CLASSES: &[&str] = &["1.2.840.10008.5.1.4.1.1.66", "1.2.840.10008.5.1.4.1.1.4.2"];

/// 是否为非图像SOP类
pub fn is_non_image_sop_class(uid: &str) -> bool {
    let uid = uid.trim_end_matches('\0').trim();
    NON_IMAGE_SOP_CLASSES.contains(&uid)
        || NON_IMAGE_SOP_PREFIXES
            .iter()
            .any(|prefix| uid.starts_with(prefix))
}

/// 单个文件的分类结果
enum FileKind {
    Image(Box<DefaultDicomObject>),
    NonImage,
    /// 无法解析，归入非图像
    Unparsable,
}

/// 系列分类器
#[derive(Debug, Clone)]
pub struct SeriesClassifier {
    enrichment_attempts: usize,
}

impl Default for SeriesClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_ENRICHMENT_ATTEMPTS)
    }
}

impl SeriesClassifier {
    pub fn new(enrichment_attempts: usize) -> Self {
        Self {
            enrichment_attempts: enrichment_attempts.max(1),
        }
    }

    pub fn enrichment_attempts(&self) -> usize {
        self.enrichment_attempts
    }

    /// 顺序处理所有系列
    pub fn classify_and_enrich(&self, patients: &mut [Patient], work_folder: &Path) {
        let mut total = 0usize;
        for series in patients
            .iter_mut()
            .flat_map(|patient| patient.studies.iter_mut())
            .flat_map(|study| study.series.iter_mut())
        {
            self.classify_series(series, work_folder);
            total += 1;
        }
        info!("完成 {} 个系列的分类", total);
    }

    /// 分类单个系列并在需要时补全采集参数
    ///
    /// 每个实例文件只归入一类；无法解析的文件归为非图像。
    pub fn classify_series(&self, series: &mut Series, work_folder: &Path) {
        let mut classification = SeriesClassification::default();
        let mut candidates: Vec<Box<DefaultDicomObject>> = Vec::new();
        let mut unparsable = 0usize;

        for instance in &series.instances {
            match Self::inspect(work_folder, &instance.file_path) {
                FileKind::Image(header) => {
                    classification.images.push(instance.file_path.clone());
                    if candidates.len() < self.enrichment_attempts {
                        candidates.push(header);
                    }
                }
                FileKind::NonImage => classification.non_images.push(instance.file_path.clone()),
                FileKind::Unparsable => {
                    unparsable += 1;
                    classification.non_images.push(instance.file_path.clone());
                }
            }
        }

        debug!(
            "系列 {} 分类: {} 个图像, {} 个非图像",
            series.series_instance_uid,
            classification.images.len(),
            classification.non_images.len()
        );

        if let Some(first) = candidates.first() {
            Self::fill_series_attributes(series, first);
        }

        if series.acquisition.has_missing() {
            let enriched = candidates.iter().any(|header| {
                let acquisition = DicomParser::extract_acquisition(header);
                if acquisition.is_empty() {
                    return false;
                }
                series.acquisition.fill_missing(acquisition);
                true
            });

            if !enriched && !candidates.is_empty() {
                warn!(
                    "系列 {} 的前 {} 个图像文件均无采集参数",
                    series.series_instance_uid,
                    candidates.len()
                );
                series.metadata_incomplete = true;
            } else if candidates.is_empty() && unparsable > 0 {
                warn!(
                    "系列 {} 的 {} 个文件无法解析，采集参数不完整",
                    series.series_instance_uid, unparsable
                );
                series.metadata_incomplete = true;
            }
        }

        series.classification = Some(classification);
    }

    fn inspect(work_folder: &Path, file_path: &str) -> FileKind {
        let Some(path) = resolve_relative(work_folder, file_path) else {
            warn!("实例路径无效: {}", file_path);
            return FileKind::NonImage;
        };

        let header = match DicomParser::open_header(&path) {
            Ok(header) => header,
            Err(e) => {
                debug!("文件 {} 无法解析为DICOM，归为非图像: {}", file_path, e);
                return FileKind::Unparsable;
            }
        };

        let sop_class = DicomParser::get_string_element(&header, tags::SOP_CLASS_UID)
            .unwrap_or_else(|| header.meta().media_storage_sop_class_uid().to_string());

        let has_geometry = DicomParser::has_element(&header, tags::ROWS)
            && DicomParser::has_element(&header, tags::COLUMNS);

        if has_geometry && !is_non_image_sop_class(&sop_class) {
            FileKind::Image(Box::new(header))
        } else {
            FileKind::NonImage
        }
    }

    /// 用文件头补全索引中缺失的系列属性
    fn fill_series_attributes(series: &mut Series, header: &DefaultDicomObject) {
        if series.modality.is_none() {
            series.modality = DicomParser::get_string_element(header, tags::MODALITY);
        }
        if series.series_description.is_none() {
            series.series_description =
                DicomParser::get_string_element(header, tags::SERIES_DESCRIPTION);
        }
        if series.protocol_name.is_none() {
            series.protocol_name = DicomParser::get_string_element(header, tags::PROTOCOL_NAME);
        }
        if series.series_date.is_none() {
            series.series_date = DicomParser::get_date_element(header, tags::SERIES_DATE);
        }
        if series.series_number.is_none() {
            series.series_number = DicomParser::get_integer_element(header, tags::SERIES_NUMBER);
        }
    }
}
