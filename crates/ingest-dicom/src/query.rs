//! PACS查询客户端
//!
//! 先在检查级别执行 C-FIND，再对每个返回的检查执行系列级别 C-FIND，
//! 将结果映射为与DICOMDIR路径相同的 患者 → 检查 → 系列 树。系列不带本地实例文件。

use crate::parser::DicomParser;
use chrono::NaiveDate;
use dicom::core::{DataElement, PrimitiveValue, Tag, VR};
use dicom::dictionary_std::tags;
use dicom::object::InMemDicomObject;
use ingest_core::utils::format_dicom_date;
use ingest_core::{Patient, Result, Series, Sex, Study};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, info_span};

/// 查询条件
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DicomQuery {
    /// 支持 `*` / `?` 通配符
    pub patient_name: Option<String>,
    pub patient_id: Option<String>,
    pub patient_birth_date: Option<NaiveDate>,
    pub study_date_from: Option<NaiveDate>,
    pub study_date_to: Option<NaiveDate>,
    pub modality: Option<String>,
    pub study_description: Option<String>,
}

impl DicomQuery {
    /// DA范围匹配值: `from-to`、`from-`、`-to`
    pub fn study_date_range(&self) -> Option<String> {
        match (self.study_date_from, self.study_date_to) {
            (None, None) => None,
            (Some(from), Some(to)) if from == to => Some(format_dicom_date(from)),
            (from, to) => Some(format!(
                "{}-{}",
                from.map(format_dicom_date).unwrap_or_default(),
                to.map(format_dicom_date).unwrap_or_default()
            )),
        }
    }

    fn modality_filter(&self) -> Option<String> {
        self.modality
            .as_deref()
            .map(|modality| modality.trim().to_ascii_uppercase())
            .filter(|modality| !modality.is_empty())
    }
}

/// 查询级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryLevel {
    Study,
    Series,
}

impl QueryLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryLevel::Study => "STUDY",
            QueryLevel::Series => "SERIES",
        }
    }
}

/// 单次 C-FIND 请求
#[derive(Debug, Clone)]
pub struct FindRequest {
    pub request_id: String,
    pub level: QueryLevel,
    pub identifier: InMemDicomObject,
}

/// 可执行层级查询的远程节点
///
/// 阻塞调用；调用方负责超时控制。
pub trait HierarchicalFind: Send + Sync {
    /// 节点标识，用于日志与错误
    fn endpoint(&self) -> String;

    /// 执行查询，返回所有匹配的标识符数据集
    fn find(&self, request: &FindRequest) -> Result<Vec<InMemDicomObject>>;
}

fn put_key(identifier: &mut InMemDicomObject, tag: Tag, vr: VR, value: Option<&str>) {
    let value = match value {
        Some(value) if !value.trim().is_empty() => PrimitiveValue::from(value.trim()),
        _ => PrimitiveValue::Empty,
    };
    identifier.put(DataElement::new(tag, vr, value));
}

/// PACS查询客户端
#[derive(Clone)]
pub struct PacsQueryClient {
    finder: Arc<dyn HierarchicalFind>,
}

impl PacsQueryClient {
    pub fn new(finder: Arc<dyn HierarchicalFind>) -> Self {
        Self { finder }
    }

    pub fn endpoint(&self) -> String {
        self.finder.endpoint()
    }

    /// 检查级别查询标识符
    pub fn study_identifier(query: &DicomQuery) -> InMemDicomObject {
        let mut identifier = InMemDicomObject::new_empty();
        let birth_date = query.patient_birth_date.map(format_dicom_date);
        let study_dates = query.study_date_range();
        let modality = query.modality_filter();

        put_key(&mut identifier, tags::QUERY_RETRIEVE_LEVEL, VR::CS, Some(QueryLevel::Study.as_str()));
        put_key(&mut identifier, tags::PATIENT_NAME, VR::PN, query.patient_name.as_deref());
        put_key(&mut identifier, tags::PATIENT_ID, VR::LO, query.patient_id.as_deref());
        put_key(&mut identifier, tags::PATIENT_BIRTH_DATE, VR::DA, birth_date.as_deref());
        put_key(&mut identifier, tags::PATIENT_SEX, VR::CS, None);
        put_key(&mut identifier, tags::STUDY_INSTANCE_UID, VR::UI, None);
        put_key(&mut identifier, tags::STUDY_DATE, VR::DA, study_dates.as_deref());
        put_key(&mut identifier, tags::STUDY_DESCRIPTION, VR::LO, query.study_description.as_deref());
        put_key(&mut identifier, tags::STUDY_ID, VR::SH, None);
        put_key(&mut identifier, tags::ACCESSION_NUMBER, VR::SH, None);
        put_key(&mut identifier, tags::MODALITIES_IN_STUDY, VR::CS, modality.as_deref());
        identifier
    }

    /// 系列级别查询标识符
    pub fn series_identifier(study_instance_uid: &str) -> InMemDicomObject {
        let mut identifier = InMemDicomObject::new_empty();
        put_key(&mut identifier, tags::QUERY_RETRIEVE_LEVEL, VR::CS, Some(QueryLevel::Series.as_str()));
        put_key(&mut identifier, tags::STUDY_INSTANCE_UID, VR::UI, Some(study_instance_uid));
        put_key(&mut identifier, tags::SERIES_INSTANCE_UID, VR::UI, None);
        put_key(&mut identifier, tags::MODALITY, VR::CS, None);
        put_key(&mut identifier, tags::SERIES_NUMBER, VR::IS, None);
        put_key(&mut identifier, tags::SERIES_DESCRIPTION, VR::LO, None);
        put_key(&mut identifier, tags::SERIES_DATE, VR::DA, None);
        put_key(&mut identifier, tags::PROTOCOL_NAME, VR::LO, None);
        put_key(&mut identifier, tags::NUMBER_OF_SERIES_RELATED_INSTANCES, VR::IS, None);
        identifier
    }

    /// 执行一次查询，无匹配时返回空列表
    pub fn query(&self, query: &DicomQuery, request_id: &str) -> Result<Vec<Patient>> {
        let span = info_span!("pacs_query", request_id = %request_id, endpoint = %self.endpoint());
        let _guard = span.enter();

        let studies = self.finder.find(&FindRequest {
            request_id: request_id.to_string(),
            level: QueryLevel::Study,
            identifier: Self::study_identifier(query),
        })?;
        info!("检查级别查询返回 {} 条结果", studies.len());

        let modality = query.modality_filter();
        let mut patients: Vec<Patient> = Vec::new();

        for record in studies {
            let Some(study_instance_uid) =
                DicomParser::get_string_element(&record, tags::STUDY_INSTANCE_UID)
            else {
                debug!("忽略缺少 StudyInstanceUID 的检查结果");
                continue;
            };

            let series_records = self.finder.find(&FindRequest {
                request_id: request_id.to_string(),
                level: QueryLevel::Series,
                identifier: Self::series_identifier(&study_instance_uid),
            })?;

            let series: Vec<Series> = series_records
                .iter()
                .filter_map(Self::series_from_record)
                .filter(|series| match (&modality, &series.modality) {
                    (Some(wanted), Some(actual)) => actual.eq_ignore_ascii_case(wanted),
                    (Some(_), None) => false,
                    (None, _) => true,
                })
                .collect();

            if modality.is_some() && series.is_empty() {
                debug!("检查 {} 没有符合模态的系列，已忽略", study_instance_uid);
                continue;
            }

            let study = Study {
                study_instance_uid,
                study_date: DicomParser::get_date_element(&record, tags::STUDY_DATE),
                study_description: DicomParser::get_string_element(&record, tags::STUDY_DESCRIPTION),
                study_id: DicomParser::get_string_element(&record, tags::STUDY_ID),
                accession_number: DicomParser::get_string_element(&record, tags::ACCESSION_NUMBER),
                series,
            };

            let patient_id = DicomParser::get_string_element(&record, tags::PATIENT_ID);
            match patients
                .iter_mut()
                .find(|patient| patient.patient_id == patient_id)
            {
                Some(patient) => patient.studies.push(study),
                None => {
                    let mut patient = Self::patient_from_record(&record);
                    patient.studies.push(study);
                    patients.push(patient);
                }
            }
        }

        info!("PACS查询完成: {} 个患者", patients.len());
        Ok(patients)
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

    fn series_from_record(record: &InMemDicomObject) -> Option<Series> {
        let series_instance_uid =
            DicomParser::get_string_element(record, tags::SERIES_INSTANCE_UID)?;
        Some(Series {
            series_instance_uid,
            modality: DicomParser::get_string_element(record, tags::MODALITY),
            series_number: DicomParser::get_integer_element(record, tags::SERIES_NUMBER),
            series_description: DicomParser::get_string_element(record, tags::SERIES_DESCRIPTION),
            protocol_name: DicomParser::get_string_element(record, tags::PROTOCOL_NAME),
            series_date: DicomParser::get_date_element(record, tags::SERIES_DATE),
            number_of_instances: DicomParser::get_integer_element(
                record,
                tags::NUMBER_OF_SERIES_RELATED_INSTANCES,
            )
            .and_then(|count| u32::try_from(count).ok()),
            acquisition: DicomParser::extract_acquisition(record),
            ..Default::default()
        })
    }
}
