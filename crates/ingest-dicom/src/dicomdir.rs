//! DICOMDIR目录模型构建
//!
//! 读取DICOMDIR索引文件，按记录间的偏移引用重建 患者 → 检查 → 系列 → 实例 树。
//! 指向不存在的文件或无效记录的引用会被丢弃并记录警告，不会中断整个导入。

use crate::layout::scan_record_offsets;
use crate::parser::DicomParser;
use dicom::core::Tag;
use dicom::dictionary_std::{tags, uids};
use dicom::object::{open_file, InMemDicomObject};
use ingest_core::utils::{confined_join, relative_path_string};
use ingest_core::{prune_empty, ImportError, Instance, Patient, Result, Series, Sex, Study};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info, warn};

const ROOT_FIRST_RECORD: Tag = Tag(0x0004, 0x1200);
const DIRECTORY_RECORD_SEQUENCE: Tag = Tag(0x0004, 0x1220);
const NEXT_RECORD: Tag = Tag(0x0004, 0x1400);
const RECORD_IN_USE: Tag = Tag(0x0004, 0x1410);
const LOWER_LEVEL_RECORD: Tag = Tag(0x0004, 0x1420);
const RECORD_TYPE: Tag = Tag(0x0004, 0x1430);
const REFERENCED_FILE_ID: Tag = Tag(0x0004, 0x1500);
const REFERENCED_SOP_CLASS: Tag = Tag(0x0004, 0x1510);
const REFERENCED_SOP_INSTANCE: Tag = Tag(0x0004, 0x1511);
const REFERENCED_TRANSFER_SYNTAX: Tag = Tag(0x0004, 0x1512);

/// 非活动记录标记值
const RECORD_INACTIVE: u16 = 0x0000;

#[derive(Debug, Clone, PartialEq)]
enum RecordKind {
    Patient,
    Study,
    Series,
    /// 引用实例文件的叶子记录 (IMAGE、SR DOCUMENT、PRESENTATION 等)
    Leaf,
    /// 私有或不关心的记录
    Other(String),
}

impl RecordKind {
    fn of(record: &InMemDicomObject) -> Self {
        let record_type = DicomParser::get_string_element(record, RECORD_TYPE)
            .unwrap_or_default()
            .to_ascii_uppercase();
        match record_type.as_str() {
            "PATIENT" => RecordKind::Patient,
            "STUDY" => RecordKind::Study,
            "SERIES" => RecordKind::Series,
            _ if DicomParser::has_element(record, REFERENCED_FILE_ID) => RecordKind::Leaf,
            _ => RecordKind::Other(record_type),
        }
    }

    fn level(&self) -> Option<usize> {
        match self {
            RecordKind::Patient => Some(0),
            RecordKind::Study => Some(1),
            RecordKind::Series => Some(2),
            RecordKind::Leaf => Some(3),
            RecordKind::Other(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct RecordLinks {
    next: Option<usize>,
    lower: Option<usize>,
}

/// 已连接的目录记录
struct RecordGraph<'a> {
    records: &'a [InMemDicomObject],
    kinds: Vec<RecordKind>,
    links: Vec<RecordLinks>,
    root: Option<usize>,
}

/// DICOMDIR读取器
pub struct DicomDirReader;

impl DicomDirReader {
    /// 读取DICOMDIR并构建患者树
    ///
    /// 实例路径相对于索引文件所在目录；索引本身无法解析时返回 `IndexFormat`。
    pub fn read_patients(index_path: &Path) -> Result<Vec<Patient>> {
        info!("解析DICOMDIR: {:?}", index_path);
        let base = index_path.parent().unwrap_or_else(|| Path::new(""));

        let obj = open_file(index_path)
            .map_err(|e| ImportError::IndexFormat(format!("无法读取DICOMDIR: {}", e)))?;

        let records = obj
            .element(DIRECTORY_RECORD_SEQUENCE)
            .ok()
            .and_then(|element| element.items())
            .ok_or_else(|| ImportError::IndexFormat("缺少目录记录序列".to_string()))?;

        let transfer_syntax = obj.meta().transfer_syntax();
        let graph = if transfer_syntax == uids::EXPLICIT_VR_LITTLE_ENDIAN {
            let bytes = std::fs::read(index_path)?;
            match scan_record_offsets(&bytes) {
                Some(offsets) => Self::link_by_offsets(&obj, records, &offsets),
                None => None,
            }
        } else {
            None
        };

        let graph = match graph {
            Some(graph) => graph,
            None => {
                warn!("无法使用记录偏移，按记录顺序重建目录树: {:?}", index_path);
                Self::link_sequentially(records)
            }
        };

        let mut patients = Self::build_tree(&graph, base);
        prune_empty(&mut patients);

        info!(
            "DICOMDIR解析完成: {} 个患者, {} 条记录",
            patients.len(),
            records.len()
        );
        Ok(patients)
    }

    /// 按偏移引用连接记录，偏移与记录数不一致或根记录无效时返回 None
    fn link_by_offsets<'a>(
        obj: &InMemDicomObject,
        records: &'a [InMemDicomObject],
        offsets: &[u32],
    ) -> Option<RecordGraph<'a>> {
        if offsets.len() != records.len() {
            debug!(
                "偏移数量 {} 与记录数量 {} 不一致",
                offsets.len(),
                records.len()
            );
            return None;
        }

        let by_offset: HashMap<u32, usize> = offsets
            .iter()
            .enumerate()
            .map(|(index, offset)| (*offset, index))
            .collect();

        let root_offset = obj.element(ROOT_FIRST_RECORD).ok()?.to_int::<u32>().ok()?;
        let root = *by_offset.get(&root_offset)?;

        let resolve = |record: &InMemDicomObject, tag: Tag, index: usize| -> Option<usize> {
            let offset = record.element(tag).ok()?.to_int::<u32>().ok()?;
            if offset == 0 {
                return None;
            }
            let target = by_offset.get(&offset).copied();
            if target.is_none() {
                warn!("记录 {} 引用了不存在的偏移 {}", index, offset);
            }
            target
        };

        let links = records
            .iter()
            .enumerate()
            .map(|(index, record)| RecordLinks {
                next: resolve(record, NEXT_RECORD, index),
                lower: resolve(record, LOWER_LEVEL_RECORD, index),
            })
            .collect();

        Some(RecordGraph {
            records,
            kinds: records.iter().map(RecordKind::of).collect(),
            links,
            root: Some(root),
        })
    }

    /// 按记录出现顺序推断层级关系
    fn link_sequentially(records: &[InMemDicomObject]) -> RecordGraph<'_> {
        let kinds: Vec<RecordKind> = records.iter().map(RecordKind::of).collect();
        let mut links = vec![RecordLinks::default(); records.len()];
        let mut root = None;
        let mut current: [Option<usize>; 4] = [None; 4];
        let mut last_child: [Option<usize>; 4] = [None; 4];

        for (index, kind) in kinds.iter().enumerate() {
            let Some(level) = kind.level() else {
                continue;
            };

            if level > 0 && current[level - 1].is_none() {
                warn!("记录 {} 缺少上级记录，已忽略", index);
                continue;
            }

            match last_child[level] {
                Some(previous) => links[previous].next = Some(index),
                None if level == 0 => root = Some(index),
                None => {
                    if let Some(parent) = current[level - 1] {
                        links[parent].lower = Some(index);
                    }
                }
            }

            current[level] = Some(index);
            last_child[level] = Some(index);
            for deeper in level + 1..4 {
                current[deeper] = None;
                last_child[deeper] = None;
            }
        }

        RecordGraph {
            records,
            kinds,
            links,
            root,
        }
    }

    /// 沿 next 链收集同级记录，已访问的记录视为循环并终止
    fn siblings(graph: &RecordGraph<'_>, first: Option<usize>, visited: &mut [bool]) -> Vec<usize> {
        let mut chain = Vec::new();
        let mut cursor = first;
        while let Some(index) = cursor {
            if visited[index] {
                warn!("目录记录 {} 存在循环引用", index);
                break;
            }
            visited[index] = true;
            if Self::is_active(&graph.records[index]) {
                chain.push(index);
            } else {
                debug!("跳过非活动记录 {}", index);
            }
            cursor = graph.links[index].next;
        }
        chain
    }

    fn is_active(record: &InMemDicomObject) -> bool {
        match record.element(RECORD_IN_USE) {
            Ok(element) => element.to_int::<u16>().map_or(true, |flag| flag != RECORD_INACTIVE),
            Err(_) => true,
        }
    }

    fn build_tree(graph: &RecordGraph<'_>, base: &Path) -> Vec<Patient> {
        let mut visited = vec![false; graph.records.len()];
        let mut patients = Vec::new();

        for index in Self::siblings(graph, graph.root, &mut visited) {
            match &graph.kinds[index] {
                RecordKind::Patient => {
                    let mut patient = Self::patient_from_record(&graph.records[index]);
                    let lower = graph.links[index].lower;
                    for study_index in Self::siblings(graph, lower, &mut visited) {
                        if let Some(study) =
                            Self::build_study(graph, study_index, base, &mut visited)
                        {
                            patient.studies.push(study);
                        }
                    }
                    patients.push(patient);
                }
                other => warn!("根级别出现非患者记录 {:?}，已忽略", other),
            }
        }

        let unreachable = visited.iter().filter(|seen| !**seen).count();
        if unreachable > 0 {
            warn!("{} 条目录记录无法从根记录到达，已忽略", unreachable);
        }
        patients
    }

    fn build_study(
        graph: &RecordGraph<'_>,
        index: usize,
        base: &Path,
        visited: &mut [bool],
    ) -> Option<Study> {
        if graph.kinds[index] != RecordKind::Study {
            warn!("患者下出现非检查记录 {:?}，已忽略", graph.kinds[index]);
            return None;
        }
        let record = &graph.records[index];
        let Some(study_instance_uid) = DicomParser::get_string_element(record, tags::STUDY_INSTANCE_UID)
        else {
            warn!("检查记录 {} 缺少 StudyInstanceUID，已忽略", index);
            return None;
        };

        let mut study = Study {
            study_instance_uid,
            study_date: DicomParser::get_date_element(record, tags::STUDY_DATE),
            study_description: DicomParser::get_string_element(record, tags::STUDY_DESCRIPTION),
            study_id: DicomParser::get_string_element(record, tags::STUDY_ID),
            accession_number: DicomParser::get_string_element(record, tags::ACCESSION_NUMBER),
            series: Vec::new(),
        };

        for series_index in Self::siblings(graph, graph.links[index].lower, visited) {
            if let Some(series) = Self::build_series(graph, series_index, base, visited) {
                study.series.push(series);
            }
        }
        Some(study)
    }

    fn build_series(
        graph: &RecordGraph<'_>,
        index: usize,
        base: &Path,
        visited: &mut [bool],
    ) -> Option<Series> {
        if graph.kinds[index] != RecordKind::Series {
            warn!("检查下出现非系列记录 {:?}，已忽略", graph.kinds[index]);
            return None;
        }
        let record = &graph.records[index];
        let Some(series_instance_uid) =
            DicomParser::get_string_element(record, tags::SERIES_INSTANCE_UID)
        else {
            warn!("系列记录 {} 缺少 SeriesInstanceUID，已忽略", index);
            return None;
        };

        let mut series = Series {
            series_instance_uid,
            modality: DicomParser::get_string_element(record, tags::MODALITY),
            series_number: DicomParser::get_integer_element(record, tags::SERIES_NUMBER),
            series_description: DicomParser::get_string_element(record, tags::SERIES_DESCRIPTION),
            protocol_name: DicomParser::get_string_element(record, tags::PROTOCOL_NAME),
            series_date: DicomParser::get_date_element(record, tags::SERIES_DATE),
            acquisition: DicomParser::extract_acquisition(record),
            ..Default::default()
        };

        for leaf_index in Self::siblings(graph, graph.links[index].lower, visited) {
            if graph.kinds[leaf_index] != RecordKind::Leaf {
                debug!("系列下的记录 {:?} 不引用文件，已忽略", graph.kinds[leaf_index]);
                continue;
            }
            if let Some(instance) = Self::instance_from_record(&graph.records[leaf_index], base) {
                series.instances.push(instance);
            }
        }
        Some(series)
    }

    fn patient_from_record(record: &InMemDicomObject) -> Patient {
        Patient {
            patient_id: DicomParser::get_string_element(record, tags::PATIENT_ID),
            patient_name: DicomParser::get_string_element(record, tags::PATIENT_NAME),
            patient_birth_date: DicomParser::get_date_element(record, tags::PATIENT_BIRTH_DATE),
            patient_sex: DicomParser::get_string_element(record, tags::PATIENT_SEX)
                .and_then(|value| Sex::from_dicom(&value)),
            studies: Vec::new(),
        }
    }

    /// 解析叶子记录引用的文件，文件不存在或路径越界时返回 None
    fn instance_from_record(record: &InMemDicomObject, base: &Path) -> Option<Instance> {
        let components = DicomParser::get_strings_element(record, REFERENCED_FILE_ID);
        let Some(path) = confined_join(base, &components) else {
            warn!("引用文件路径无效: {:?}", components);
            return None;
        };
        if !path.is_file() {
            warn!("引用的文件不存在: {}", components.join("/"));
            return None;
        }
        let file_path = match relative_path_string(base, &path) {
            Ok(file_path) => file_path,
            Err(e) => {
                warn!("无法计算相对路径: {}", e);
                return None;
            }
        };

        Some(Instance {
            sop_instance_uid: DicomParser::get_string_element(record, REFERENCED_SOP_INSTANCE),
            sop_class_uid: DicomParser::get_string_element(record, REFERENCED_SOP_CLASS),
            transfer_syntax_uid: DicomParser::get_string_element(record, REFERENCED_TRANSFER_SYNTAX),
            instance_number: DicomParser::get_integer_element(record, tags::INSTANCE_NUMBER),
            file_path,
        })
    }
}
