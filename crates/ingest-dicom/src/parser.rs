//! DICOM数据解析器
//!
//! 提供文件头读取和元数据提取功能，目录记录与实例文件共用同一组访问函数。

use chrono::NaiveDate;
use dicom::core::Tag;
use dicom::dictionary_std::tags;
use dicom::object::{DefaultDicomObject, InMemDicomObject, OpenFileOptions};
use ingest_core::utils::{clean_dicom_string, parse_dicom_date};
use ingest_core::{AcquisitionMetadata, ImportError, Result};
use std::path::Path;
use tracing::debug;

/// 扩散b值 (0018,9087)
pub const DIFFUSION_B_VALUE: Tag = Tag(0x0018, 0x9087);
/// 扩散梯度方向 (0018,9089)
pub const DIFFUSION_GRADIENT_ORIENTATION: Tag = Tag(0x0018, 0x9089);

/// DICOM数据解析器
pub struct DicomParser;

impl Default for DicomParser {
    fn default() -> Self {
        Self::new()
    }
}

impl DicomParser {
    pub fn new() -> Self {
        Self
    }

    /// 读取DICOM文件头，在像素数据之前停止
    pub fn open_header<P: AsRef<Path>>(file_path: P) -> Result<DefaultDicomObject> {
        let file_path = file_path.as_ref();
        debug!("读取DICOM文件头: {:?}", file_path);

        OpenFileOptions::new()
            .read_until(tags::PIXEL_DATA)
            .open_file(file_path)
            .map_err(|e| ImportError::IndexFormat(format!("无法解析DICOM文件: {}", e)))
    }

    /// 提取采集参数
    pub fn extract_acquisition(obj: &InMemDicomObject) -> AcquisitionMetadata {
        AcquisitionMetadata {
            echo_time: Self::get_float_element(obj, tags::ECHO_TIME),
            repetition_time: Self::get_float_element(obj, tags::REPETITION_TIME),
            inversion_time: Self::get_float_element(obj, tags::INVERSION_TIME),
            flip_angle: Self::get_float_element(obj, tags::FLIP_ANGLE),
            slice_thickness: Self::get_float_element(obj, tags::SLICE_THICKNESS),
            spacing_between_slices: Self::get_float_element(obj, tags::SPACING_BETWEEN_SLICES),
            pixel_spacing: Self::get_float_array::<2>(obj, tags::PIXEL_SPACING),
            magnetic_field_strength: Self::get_float_element(obj, tags::MAGNETIC_FIELD_STRENGTH),
            diffusion_b_value: Self::get_float_element(obj, DIFFUSION_B_VALUE),
            diffusion_gradient: Self::get_float_array::<3>(obj, DIFFUSION_GRADIENT_ORIENTATION),
            manufacturer: Self::get_string_element(obj, tags::MANUFACTURER),
            manufacturer_model_name: Self::get_string_element(obj, tags::MANUFACTURER_MODEL_NAME),
            station_name: Self::get_string_element(obj, tags::STATION_NAME),
        }
    }

    /// 获取字符串类型元素的值，多值时取第一个
    pub fn get_string_element(obj: &InMemDicomObject, tag: Tag) -> Option<String> {
        match obj.element(tag) {
            Ok(element) => element
                .to_str()
                .ok()
                .and_then(|value| clean_dicom_string(value.split('\\').next().unwrap_or_default())),
            Err(_) => None,
        }
    }

    /// 获取多值字符串元素
    pub fn get_strings_element(obj: &InMemDicomObject, tag: Tag) -> Vec<String> {
        match obj.element(tag) {
            Ok(element) => element
                .to_multi_str()
                .map(|values| values.iter().filter_map(|v| clean_dicom_string(v)).collect())
                .unwrap_or_default(),
            Err(_) => Vec::new(),
        }
    }

    /// 获取浮点类型元素的值 (DS/FD/FL)
    pub fn get_float_element(obj: &InMemDicomObject, tag: Tag) -> Option<f64> {
        let element = obj.element(tag).ok()?;
        match element.to_float64() {
            Ok(value) if value.is_finite() => Some(value),
            Ok(_) => None,
            Err(e) => {
                debug!("标签 {:?} 无法转换为浮点数: {}", tag, e);
                None
            }
        }
    }

    /// 获取固定个数的浮点数组，个数不符时返回 None
    pub fn get_float_array<const N: usize>(obj: &InMemDicomObject, tag: Tag) -> Option<[f64; N]> {
        let element = obj.element(tag).ok()?;
        let values = element.to_multi_float64().ok()?;
        if values.len() < N {
            return None;
        }
        let mut out = [0.0; N];
        out.copy_from_slice(&values[..N]);
        Some(out)
    }

    /// 获取整数类型元素的值 (IS/US/UL)
    pub fn get_integer_element(obj: &InMemDicomObject, tag: Tag) -> Option<i32> {
        obj.element(tag).ok()?.to_int::<i32>().ok()
    }

    /// 获取日期类型元素的值
    pub fn get_date_element(obj: &InMemDicomObject, tag: Tag) -> Option<NaiveDate> {
        Self::get_string_element(obj, tag).and_then(|value| parse_dicom_date(&value))
    }

    /// 是否包含某个元素
    pub fn has_element(obj: &InMemDicomObject, tag: Tag) -> bool {
        obj.element(tag).is_ok()
    }
}
