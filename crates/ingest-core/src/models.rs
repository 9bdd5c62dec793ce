//! 核心数据模型定义
//!
//! DICOM路径: Patient → Study → Series → Instance；EEG路径: EegDataset。

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// 患者信息
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Patient {
    pub patient_id: Option<String>,              // 机构内部患者ID
    pub patient_name: Option<String>,            // 患者姓名
    pub patient_birth_date: Option<NaiveDate>,   // 出生日期
    pub patient_sex: Option<Sex>,                // 性别
    #[serde(default)]
    pub studies: Vec<Study>,
}

/// 性别枚举
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sex {
    Male,
    Female,
    Other,
}

impl Sex {
    /// 解析DICOM PatientSex (CS) 值
    pub fn from_dicom(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "M" => Some(Sex::Male),
            "F" => Some(Sex::Female),
            "O" => Some(Sex::Other),
            _ => None,
        }
    }
}

/// 检查信息
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Study {
    pub study_instance_uid: String,              // DICOM Study Instance UID
    pub study_date: Option<NaiveDate>,
    pub study_description: Option<String>,
    pub study_id: Option<String>,
    pub accession_number: Option<String>,        // 检查号
    #[serde(default)]
    pub series: Vec<Series>,
}

/// 系列信息
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Series {
    pub series_instance_uid: String,             // DICOM Series Instance UID
    pub modality: Option<String>,
    pub series_number: Option<i32>,
    pub series_description: Option<String>,
    pub protocol_name: Option<String>,
    pub series_date: Option<NaiveDate>,
    /// PACS返回的实例数量，本地文件路径下为空
    pub number_of_instances: Option<u32>,
    #[serde(default)]
    pub acquisition: AcquisitionMetadata,
    #[serde(default)]
    pub instances: Vec<Instance>,
    /// 图像/非图像分类结果，由分类器填写
    #[serde(default)]
    pub classification: Option<SeriesClassification>,
    /// 元数据补全失败标记
    #[serde(default)]
    pub metadata_incomplete: bool,
}

impl Series {
    /// 分类后是否包含图像，未分类时返回 None
    pub fn is_image(&self) -> Option<bool> {
        self.classification
            .as_ref()
            .map(|classification| !classification.images.is_empty())
    }
}

/// 采集参数 (时间与几何相关字段)
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcquisitionMetadata {
    pub echo_time: Option<f64>,                  // 回波时间 ms
    pub repetition_time: Option<f64>,            // 重复时间 ms
    pub inversion_time: Option<f64>,             // 反转时间 ms
    pub flip_angle: Option<f64>,                 // 翻转角 度
    pub slice_thickness: Option<f64>,
    pub spacing_between_slices: Option<f64>,
    pub pixel_spacing: Option<[f64; 2]>,
    pub magnetic_field_strength: Option<f64>,    // 场强 T
    pub diffusion_b_value: Option<f64>,
    pub diffusion_gradient: Option<[f64; 3]>,
    pub manufacturer: Option<String>,
    pub manufacturer_model_name: Option<String>,
    pub station_name: Option<String>,
}

impl AcquisitionMetadata {
    /// 时间与几何字段是否全部缺失
    pub fn is_empty(&self) -> bool {
        self.echo_time.is_none()
            && self.repetition_time.is_none()
            && self.inversion_time.is_none()
            && self.flip_angle.is_none()
            && self.slice_thickness.is_none()
            && self.spacing_between_slices.is_none()
            && self.pixel_spacing.is_none()
            && self.magnetic_field_strength.is_none()
            && self.diffusion_b_value.is_none()
            && self.diffusion_gradient.is_none()
    }

    /// 是否有时间或几何字段缺失
    pub fn has_missing(&self) -> bool {
        self.echo_time.is_none()
            || self.repetition_time.is_none()
            || self.inversion_time.is_none()
            || self.flip_angle.is_none()
            || self.slice_thickness.is_none()
            || self.spacing_between_slices.is_none()
            || self.pixel_spacing.is_none()
            || self.magnetic_field_strength.is_none()
            || self.diffusion_b_value.is_none()
            || self.diffusion_gradient.is_none()
    }

    /// 只填充当前缺失的字段
    pub fn fill_missing(&mut self, other: AcquisitionMetadata) {
        fn fill<T>(slot: &mut Option<T>, value: Option<T>) {
            if slot.is_none() {
                *slot = value;
            }
        }

        fill(&mut self.echo_time, other.echo_time);
        fill(&mut self.repetition_time, other.repetition_time);
        fill(&mut self.inversion_time, other.inversion_time);
        fill(&mut self.flip_angle, other.flip_angle);
        fill(&mut self.slice_thickness, other.slice_thickness);
        fill(&mut self.spacing_between_slices, other.spacing_between_slices);
        fill(&mut self.pixel_spacing, other.pixel_spacing);
        fill(&mut self.magnetic_field_strength, other.magnetic_field_strength);
        fill(&mut self.diffusion_b_value, other.diffusion_b_value);
        fill(&mut self.diffusion_gradient, other.diffusion_gradient);
        fill(&mut self.manufacturer, other.manufacturer);
        fill(&mut self.manufacturer_model_name, other.manufacturer_model_name);
        fill(&mut self.station_name, other.station_name);
    }
}

/// 影像实例信息
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    pub sop_instance_uid: Option<String>,        // DICOM SOP Instance UID
    pub sop_class_uid: Option<String>,
    pub transfer_syntax_uid: Option<String>,
    pub instance_number: Option<i32>,
    /// 相对于工作目录的文件路径，以 '/' 分隔
    pub file_path: String,
}

/// 系列内文件的分类结果
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesClassification {
    pub images: Vec<String>,
    pub non_images: Vec<String>,
}

impl SeriesClassification {
    pub fn len(&self) -> usize {
        self.images.len() + self.non_images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// EEG数据集
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EegDataset {
    pub name: String,
    pub sampling_frequency: f64,                 // 采样频率 Hz
    pub channels: Vec<Channel>,
    pub events: Vec<Event>,
    /// 相对于工作目录的文件路径
    pub files: Vec<String>,
}

/// EEG通道描述
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    pub name: String,
    pub reference: Option<String>,
    pub resolution: Option<f64>,
    pub unit: Option<String>,
    pub coordinates: Option<Coordinates>,
}

/// 电极球坐标
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub radius: f64,
    pub theta: f64,
    pub phi: f64,
}

/// EEG事件标记
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub event_type: String,
    pub description: String,
    pub position: u64,                           // 数据点位置
    pub points: u64,
    pub channel_number: u32,                     // 0 表示所有通道
    pub date: Option<String>,
}

/// 删除空分支: 无实例的系列、无系列的检查、无检查的患者
pub fn prune_empty(patients: &mut Vec<Patient>) {
    for patient in patients.iter_mut() {
        for study in patient.studies.iter_mut() {
            study.series.retain(|series| {
                let keep = !series.instances.is_empty();
                if !keep {
                    debug!("删除空系列: {}", series.series_instance_uid);
                }
                keep
            });
        }
        patient.studies.retain(|study| !study.series.is_empty());
    }
    patients.retain(|patient| !patient.studies.is_empty());
}

/// 遍历所有实例
pub fn instances(patients: &[Patient]) -> impl Iterator<Item = &Instance> {
    patients
        .iter()
        .flat_map(|patient| patient.studies.iter())
        .flat_map(|study| study.series.iter())
        .flat_map(|series| series.instances.iter())
}
