//! 测试夹具
//!
//! 生成最小的DICOMDIR索引和实例文件，供本crate及上层crate的测试使用。
//! 夹具写入失败直接panic。

use crate::layout::scan_record_offsets;
use dicom::core::value::DataSetSequence;
use dicom::core::{DataElement, Length, PrimitiveValue, Tag, VR};
use dicom::dictionary_std::{tags, uids};
use dicom::object::{FileMetaTableBuilder, InMemDicomObject};
use std::path::Path;

const ROOT_FIRST_RECORD: Tag = Tag(0x0004, 0x1200);
const ROOT_LAST_RECORD: Tag = Tag(0x0004, 0x1202);
const FILE_SET_CONSISTENCY: Tag = Tag(0x0004, 0x1212);
const DIRECTORY_RECORD_SEQUENCE: Tag = Tag(0x0004, 0x1220);
const NEXT_RECORD: Tag = Tag(0x0004, 0x1400);
const RECORD_IN_USE: Tag = Tag(0x0004, 0x1410);
const LOWER_LEVEL_RECORD: Tag = Tag(0x0004, 0x1420);
const RECORD_TYPE: Tag = Tag(0x0004, 0x1430);
const REFERENCED_FILE_ID: Tag = Tag(0x0004, 0x1500);
const REFERENCED_SOP_CLASS: Tag = Tag(0x0004, 0x1510);
const REFERENCED_SOP_INSTANCE: Tag = Tag(0x0004, 0x1511);
const REFERENCED_TRANSFER_SYNTAX: Tag = Tag(0x0004, 0x1512);

pub const MEDIA_STORAGE_DIRECTORY: &str = "1.2.840.10008.1.3.10";
pub const MR_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.4";
pub const BASIC_TEXT_SR_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.88.11";

/// 记录间引用
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Link {
    None,
    /// 引用记录序列中的第 N 条记录
    Record(usize),
    /// 直接写入的原始偏移
    Offset(u32),
}

#[derive(Debug, Clone)]
pub struct FixtureRecord {
    pub dataset: InMemDicomObject,
    pub next: Link,
    pub lower: Link,
}

impl FixtureRecord {
    pub fn new(dataset: InMemDicomObject, next: Link, lower: Link) -> Self {
        Self {
            dataset,
            next,
            lower,
        }
    }
}

/// 以树形描述的目录记录
#[derive(Debug, Clone)]
pub struct TreeNode {
    pub dataset: InMemDicomObject,
    pub children: Vec<TreeNode>,
}

impl TreeNode {
    pub fn new(dataset: InMemDicomObject) -> Self {
        Self {
            dataset,
            children: Vec::new(),
        }
    }

    pub fn with_children(mut self, children: Vec<TreeNode>) -> Self {
        self.children = children;
        self
    }
}

fn put_str(obj: &mut InMemDicomObject, tag: Tag, vr: VR, value: &str) {
    obj.put(DataElement::new(tag, vr, PrimitiveValue::from(value)));
}

fn record(record_type: &str) -> InMemDicomObject {
    let mut obj = InMemDicomObject::new_empty();
    put_str(&mut obj, RECORD_TYPE, VR::CS, record_type);
    obj.put(DataElement::new(RECORD_IN_USE, VR::US, PrimitiveValue::from(0xFFFFu16)));
    obj
}

pub fn patient_record(patient_id: &str, patient_name: &str) -> InMemDicomObject {
    let mut obj = record("PATIENT");
    put_str(&mut obj, tags::PATIENT_ID, VR::LO, patient_id);
    put_str(&mut obj, tags::PATIENT_NAME, VR::PN, patient_name);
    obj
}

pub fn study_record(study_uid: &str, study_date: &str) -> InMemDicomObject {
    let mut obj = record("STUDY");
    put_str(&mut obj, tags::STUDY_INSTANCE_UID, VR::UI, study_uid);
    put_str(&mut obj, tags::STUDY_DATE, VR::DA, study_date);
    put_str(&mut obj, tags::STUDY_DESCRIPTION, VR::LO, "BRAIN");
    obj
}

pub fn series_record(series_uid: &str, modality: &str, number: i32) -> InMemDicomObject {
    let mut obj = record("SERIES");
    put_str(&mut obj, tags::SERIES_INSTANCE_UID, VR::UI, series_uid);
    put_str(&mut obj, tags::MODALITY, VR::CS, modality);
    put_str(&mut obj, tags::SERIES_NUMBER, VR::IS, &number.to_string());
    obj
}

pub fn image_record(file_id: &[&str], sop_instance_uid: &str) -> InMemDicomObject {
    let mut obj = record("IMAGE");
    obj.put(DataElement::new(
        REFERENCED_FILE_ID,
        VR::CS,
        PrimitiveValue::Strs(file_id.iter().map(|part| part.to_string()).collect()),
    ));
    put_str(&mut obj, REFERENCED_SOP_CLASS, VR::UI, MR_IMAGE_STORAGE);
    put_str(&mut obj, REFERENCED_SOP_INSTANCE, VR::UI, sop_instance_uid);
    put_str(
        &mut obj,
        REFERENCED_TRANSFER_SYNTAX,
        VR::UI,
        uids::EXPLICIT_VR_LITTLE_ENDIAN,
    );
    put_str(&mut obj, tags::INSTANCE_NUMBER, VR::IS, "1");
    obj
}

fn encode_dicomdir(root: u32, datasets: Vec<InMemDicomObject>) -> Vec<u8> {
    let mut obj = InMemDicomObject::new_empty();
    obj.put(DataElement::new(ROOT_FIRST_RECORD, VR::UL, PrimitiveValue::from(root)));
    obj.put(DataElement::new(ROOT_LAST_RECORD, VR::UL, PrimitiveValue::from(0u32)));
    obj.put(DataElement::new(FILE_SET_CONSISTENCY, VR::US, PrimitiveValue::from(0u16)));
    obj.put(DataElement::new(
        DIRECTORY_RECORD_SEQUENCE,
        VR::SQ,
        DataSetSequence::new(datasets, Length::UNDEFINED),
    ));

    let file = obj
        .with_meta(
            FileMetaTableBuilder::new()
                .media_storage_sop_class_uid(MEDIA_STORAGE_DIRECTORY)
                .media_storage_sop_instance_uid("2.25.1")
                .transfer_syntax(uids::EXPLICIT_VR_LITTLE_ENDIAN),
        )
        .expect("DICOMDIR文件元信息");

    let mut bytes = Vec::new();
    file.write_all(&mut bytes).expect("写入DICOMDIR");
    bytes
}

fn with_links(records: &[FixtureRecord], resolve: impl Fn(Link) -> u32) -> Vec<InMemDicomObject> {
    records
        .iter()
        .map(|record| {
            let mut dataset = record.dataset.clone();
            dataset.put(DataElement::new(
                NEXT_RECORD,
                VR::UL,
                PrimitiveValue::from(resolve(record.next)),
            ));
            dataset.put(DataElement::new(
                LOWER_LEVEL_RECORD,
                VR::UL,
                PrimitiveValue::from(resolve(record.lower)),
            ));
            dataset
        })
        .collect()
}

/// 写入DICOMDIR，返回每条记录的字节偏移
///
/// 先以占位偏移写一遍得到各记录位置，再回填真实偏移；偏移字段长度固定，两次布局一致。
pub fn write_dicomdir(path: &Path, root: Link, records: Vec<FixtureRecord>) -> Vec<u32> {
    let draft = encode_dicomdir(0, with_links(&records, |_| 0));
    let offsets = scan_record_offsets(&draft).expect("扫描记录偏移");

    let resolve = |link: Link| match link {
        Link::None => 0,
        Link::Record(index) => offsets[index],
        Link::Offset(offset) => offset,
    };
    let bytes = encode_dicomdir(resolve(root), with_links(&records, resolve));
    assert_eq!(scan_record_offsets(&bytes).as_deref(), Some(offsets.as_slice()));

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("创建目录");
    }
    std::fs::write(path, bytes).expect("写入DICOMDIR");
    offsets
}

fn flatten(nodes: Vec<TreeNode>, out: &mut Vec<FixtureRecord>) -> Option<usize> {
    let mut first = None;
    let mut previous: Option<usize> = None;
    for node in nodes {
        let index = out.len();
        out.push(FixtureRecord::new(node.dataset, Link::None, Link::None));
        match previous {
            Some(previous) => out[previous].next = Link::Record(index),
            None => first = Some(index),
        }
        if let Some(lower) = flatten(node.children, out) {
            out[index].lower = Link::Record(lower);
        }
        previous = Some(index);
    }
    first
}

/// 按先序展开记录树并写入DICOMDIR
pub fn write_tree(path: &Path, roots: Vec<TreeNode>) -> Vec<u32> {
    let mut records = Vec::new();
    let root = match flatten(roots, &mut records) {
        Some(index) => Link::Record(index),
        None => Link::None,
    };
    write_dicomdir(path, root, records)
}

/// 创建空文件
pub fn touch(path: &Path) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("创建目录");
    }
    std::fs::write(path, b"").expect("创建文件");
}

/// 实例文件夹具
#[derive(Debug, Clone)]
pub struct InstanceFixture {
    pub sop_class_uid: String,
    pub sop_instance_uid: String,
    pub series_instance_uid: String,
    pub modality: String,
    pub with_pixels: bool,
    pub echo_time: Option<f64>,
    pub repetition_time: Option<f64>,
    pub protocol_name: Option<String>,
}

impl InstanceFixture {
    /// 2x2 的MR图像
    pub fn mr_image(series_uid: &str, sop_instance_uid: &str) -> Self {
        Self {
            sop_class_uid: MR_IMAGE_STORAGE.to_string(),
            sop_instance_uid: sop_instance_uid.to_string(),
            series_instance_uid: series_uid.to_string(),
            modality: "MR".to_string(),
            with_pixels: true,
            echo_time: None,
            repetition_time: None,
            protocol_name: None,
        }
    }

    /// 结构化报告，不含像素数据
    pub fn sr_document(series_uid: &str, sop_instance_uid: &str) -> Self {
        Self {
            sop_class_uid: BASIC_TEXT_SR_STORAGE.to_string(),
            sop_instance_uid: sop_instance_uid.to_string(),
            series_instance_uid: series_uid.to_string(),
            modality: "SR".to_string(),
            with_pixels: false,
            echo_time: None,
            repetition_time: None,
            protocol_name: None,
        }
    }

    pub fn with_timing(mut self, echo_time: f64, repetition_time: f64) -> Self {
        self.echo_time = Some(echo_time);
        self.repetition_time = Some(repetition_time);
        self
    }

    pub fn with_protocol(mut self, protocol_name: &str) -> Self {
        self.protocol_name = Some(protocol_name.to_string());
        self
    }

    pub fn write(&self, path: &Path) {
        let mut obj = InMemDicomObject::new_empty();
        put_str(&mut obj, tags::SOP_CLASS_UID, VR::UI, &self.sop_class_uid);
        put_str(&mut obj, tags::SOP_INSTANCE_UID, VR::UI, &self.sop_instance_uid);
        put_str(&mut obj, tags::PATIENT_ID, VR::LO, "P1");
        put_str(&mut obj, tags::STUDY_INSTANCE_UID, VR::UI, "1.2.3");
        put_str(
            &mut obj,
            tags::SERIES_INSTANCE_UID,
            VR::UI,
            &self.series_instance_uid,
        );
        put_str(&mut obj, tags::MODALITY, VR::CS, &self.modality);
        put_str(&mut obj, tags::SERIES_DESCRIPTION, VR::LO, "T1 MPRAGE");
        if let Some(protocol) = &self.protocol_name {
            put_str(&mut obj, tags::PROTOCOL_NAME, VR::LO, protocol);
        }
        if let Some(echo_time) = self.echo_time {
            put_str(&mut obj, tags::ECHO_TIME, VR::DS, &echo_time.to_string());
        }
        if let Some(repetition_time) = self.repetition_time {
            put_str(
                &mut obj,
                tags::REPETITION_TIME,
                VR::DS,
                &repetition_time.to_string(),
            );
        }

        if self.with_pixels {
            obj.put(DataElement::new(tags::ROWS, VR::US, PrimitiveValue::from(2u16)));
            obj.put(DataElement::new(tags::COLUMNS, VR::US, PrimitiveValue::from(2u16)));
            obj.put(DataElement::new(tags::BITS_ALLOCATED, VR::US, PrimitiveValue::from(16u16)));
            obj.put(DataElement::new(tags::BITS_STORED, VR::US, PrimitiveValue::from(12u16)));
            obj.put(DataElement::new(tags::HIGH_BIT, VR::US, PrimitiveValue::from(11u16)));
            obj.put(DataElement::new(
                tags::PIXEL_REPRESENTATION,
                VR::US,
                PrimitiveValue::from(0u16),
            ));
            put_str(&mut obj, tags::PHOTOMETRIC_INTERPRETATION, VR::CS, "MONOCHROME2");
            obj.put(DataElement::new(
                tags::PIXEL_DATA,
                VR::OW,
                PrimitiveValue::U8(vec![0u8; 8].into()),
            ));
        }

        let file = obj
            .with_meta(
                FileMetaTableBuilder::new()
                    .media_storage_sop_class_uid(&self.sop_class_uid)
                    .media_storage_sop_instance_uid(&self.sop_instance_uid)
                    .transfer_syntax(uids::EXPLICIT_VR_LITTLE_ENDIAN),
            )
            .expect("实例文件元信息");

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("创建目录");
        }
        file.write_to_file(path).expect("写入实例文件");
    }
}
