//! BrainVision 头文件与标记文件解析

use ingest_core::utils::resolve_relative;
use ingest_core::{Channel, Coordinates, Event, ImportError, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const HEADER_SIGNATURE: &str = "Brain Vision Data Exchange Header File";
const COMMON_INFOS: &str = "Common Infos";
const CHANNEL_INFOS: &str = "Channel Infos";
const COORDINATES: &str = "Coordinates";
const MARKER_INFOS: &str = "Marker Infos";
const COMMENT: &str = "Comment";

/// 默认通道单位
const DEFAULT_UNIT: &str = "µV";

/// 解析结果
#[derive(Debug, Clone, PartialEq)]
pub struct EegRecording {
    pub sampling_frequency: f64,
    pub channels: Vec<Channel>,
    pub events: Vec<Event>,
    pub data_file: Option<String>,
    pub marker_file: Option<PathBuf>,
}

/// 键值形式的分节文本
#[derive(Debug, Default)]
struct Sections {
    sections: BTreeMap<String, Vec<(String, String)>>,
    first_line: String,
}

impl Sections {
    fn parse(text: &str) -> Self {
        let mut parsed = Sections::default();
        let mut current: Option<String> = None;

        for (index, raw) in text.lines().enumerate() {
            let line = raw.trim_start_matches('\u{feff}').trim();
            if index == 0 {
                parsed.first_line = line.to_string();
            }
            if line.is_empty() || line.starts_with(';') {
                continue;
            }
            if line.starts_with('[') && line.ends_with(']') {
                let name = line[1..line.len() - 1].trim().to_string();
                // [Comment] 之后是自由文本
                if name.eq_ignore_ascii_case(COMMENT) {
                    break;
                }
                current = Some(name);
                continue;
            }
            let (Some(section), Some((key, value))) = (&current, line.split_once('=')) else {
                continue;
            };
            parsed
                .sections
                .entry(section.clone())
                .or_default()
                .push((key.trim().to_string(), value.trim().to_string()));
        }
        parsed
    }

    fn entries(&self, section: &str) -> &[(String, String)] {
        self.sections
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(section))
            .map(|(_, entries)| entries.as_slice())
            .unwrap_or_default()
    }

    fn value(&self, section: &str, key: &str) -> Option<&str> {
        self.entries(section)
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
            .filter(|v| !v.is_empty())
    }

    /// 形如 `<prefix><N>=...` 的条目，按 N 排序
    fn numbered(&self, section: &str, prefix: &str) -> Vec<(u32, &str)> {
        let mut entries: Vec<(u32, &str)> = self
            .entries(section)
            .iter()
            .filter_map(|(key, value)| {
                let number = key.get(prefix.len()..)?;
                if !key[..prefix.len()].eq_ignore_ascii_case(prefix) {
                    return None;
                }
                number.parse::<u32>().ok().map(|n| (n, value.as_str()))
            })
            .collect();
        entries.sort_by_key(|(number, _)| *number);
        entries
    }
}

/// 读取文本，UTF-8 失败时按 Latin-1 解码
fn read_text(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path)?;
    match String::from_utf8(bytes) {
        Ok(text) => Ok(text),
        Err(e) => {
            debug!("{:?} 不是UTF-8编码，按Latin-1解码", path);
            Ok(e.into_bytes().iter().map(|&b| b as char).collect())
        }
    }
}

/// 拆分逗号分隔字段，`\1` 表示字段内的逗号
fn split_fields(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|field| field.replace("\\1", ",").trim().to_string())
        .collect()
}

fn non_empty(field: Option<&String>) -> Option<String> {
    field.filter(|value| !value.is_empty()).cloned()
}

/// BrainVision 读取器
pub struct BrainVisionReader;

impl BrainVisionReader {
    /// 解析 `.vhdr` 头文件及其引用的标记文件
    pub fn read(header_path: &Path) -> Result<EegRecording> {
        info!("解析EEG头文件: {:?}", header_path);
        let text = read_text(header_path)?;
        let header = Sections::parse(&text);

        if !header.first_line.starts_with(HEADER_SIGNATURE) {
            warn!("头文件缺少 BrainVision 标识行: {:?}", header_path);
        }

        let interval = header
            .value(COMMON_INFOS, "SamplingInterval")
            .ok_or_else(|| ImportError::EegFormat("缺少 SamplingInterval".to_string()))?;
        let interval: f64 = interval
            .parse()
            .map_err(|_| ImportError::EegFormat(format!("SamplingInterval 无效: {}", interval)))?;
        if !(interval.is_finite() && interval > 0.0) {
            return Err(ImportError::EegFormat(format!(
                "采样间隔必须为正数: {}",
                interval
            )));
        }
        let sampling_frequency = 1_000_000.0 / interval;

        let declared = header
            .value(COMMON_INFOS, "NumberOfChannels")
            .and_then(|value| value.parse::<usize>().ok());
        if declared == Some(0) {
            return Err(ImportError::EegFormat("通道数为0".to_string()));
        }

        let channels = Self::channels(&header);
        if channels.is_empty() {
            return Err(ImportError::EegFormat("头文件没有通道定义".to_string()));
        }
        if let Some(declared) = declared {
            if declared != channels.len() {
                warn!(
                    "声明的通道数 {} 与通道定义数 {} 不一致",
                    declared,
                    channels.len()
                );
            }
        }

        let base = header_path.parent().unwrap_or_else(|| Path::new(""));
        let marker_file = match header.value(COMMON_INFOS, "MarkerFile") {
            Some(name) => Self::companion(base, "MarkerFile", name),
            None => header_path
                .file_stem()
                .map(|stem| base.join(format!("{}.vmrk", stem.to_string_lossy()))),
        };
        let data_file = header
            .value(COMMON_INFOS, "DataFile")
            .filter(|name| Self::companion(base, "DataFile", name).is_some())
            .map(str::to_string);

        let events = match &marker_file {
            Some(path) if path.is_file() => Self::read_markers(path)?,
            Some(path) => {
                warn!("标记文件不存在，事件列表为空: {:?}", path);
                Vec::new()
            }
            None => Vec::new(),
        };

        debug!(
            "EEG头文件解析完成: {} 个通道, {} 个事件, {} Hz",
            channels.len(),
            events.len(),
            sampling_frequency
        );

        Ok(EegRecording {
            sampling_frequency,
            channels,
            events,
            data_file,
            marker_file,
        })
    }

    /// 头文件引用的文件必须位于头文件所在目录之下
    fn companion(base: &Path, key: &str, name: &str) -> Option<PathBuf> {
        let path = resolve_relative(base, name);
        if path.is_none() {
            warn!("{} 指向目录之外，已忽略: {}", key, name);
        }
        path
    }

    fn channels(header: &Sections) -> Vec<Channel> {
        let coordinates: BTreeMap<u32, Coordinates> = header
            .numbered(COORDINATES, "Ch")
            .into_iter()
            .filter_map(|(number, value)| {
                let fields = split_fields(value);
                let parse = |index: usize| fields.get(index)?.parse::<f64>().ok();
                Some((
                    number,
                    Coordinates {
                        radius: parse(0)?,
                        theta: parse(1)?,
                        phi: parse(2)?,
                    },
                ))
            })
            .collect();

        header
            .numbered(CHANNEL_INFOS, "Ch")
            .into_iter()
            .filter_map(|(number, value)| {
                let fields = split_fields(value);
                let name = non_empty(fields.first())?;
                Some(Channel {
                    name,
                    reference: non_empty(fields.get(1)),
                    resolution: fields.get(2).and_then(|value| value.parse::<f64>().ok()),
                    unit: non_empty(fields.get(3)).or_else(|| Some(DEFAULT_UNIT.to_string())),
                    coordinates: coordinates.get(&number).copied(),
                })
            })
            .collect()
    }

    /// 解析 `.vmrk` 标记文件，格式错误的条目被跳过
    pub fn read_markers(marker_path: &Path) -> Result<Vec<Event>> {
        let text = read_text(marker_path)?;
        let markers = Sections::parse(&text);

        let events = markers
            .numbered(MARKER_INFOS, "Mk")
            .into_iter()
            .filter_map(|(number, value)| {
                let parsed = Self::parse_marker(&split_fields(value));
                if parsed.is_none() {
                    warn!("跳过格式错误的标记 Mk{}: {}", number, value);
                }
                parsed
            })
            .collect();
        Ok(events)
    }

    /// `<type>,<description>,<position>,<points>,<channel>[,<date>]`
    fn parse_marker(fields: &[String]) -> Option<Event> {
        Some(Event {
            event_type: non_empty(fields.first())?,
            description: fields.get(1).cloned().unwrap_or_default(),
            position: fields.get(2)?.parse().ok()?,
            points: fields.get(3).and_then(|v| v.parse().ok()).unwrap_or(1),
            channel_number: fields.get(4).and_then(|v| v.parse().ok()).unwrap_or(0),
            date: non_empty(fields.get(5)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const HEADER: &str = "Brain Vision Data Exchange Header File Version 1.0
; Data created by the Vision Recorder

[Common Infos]
Codepage=UTF-8
DataFile=sub01.eeg
MarkerFile=sub01.vmrk
DataFormat=BINARY
NumberOfChannels=3
SamplingInterval=2000

[Channel Infos]
; Each entry: Ch<Channel number>=<Name>,<Reference channel name>,<Resolution in \"Unit\">,<Unit>
Ch2=Fp2,,0.1,µV
Ch1=Fp1,,0.1,µV
Ch3=A\\1B,REF,0.5

[Coordinates]
Ch1=1,-90,-72
Ch2=1,90,72

[Comment]
Ch4=not,a,channel
";

    const MARKERS: &str = "Brain Vision Data Exchange Marker File, Version 1.0

[Common Infos]
Codepage=UTF-8
DataFile=sub01.eeg

[Marker Infos]
Mk2=Stimulus,S  1,487,1,0
Mk1=New Segment,,1,1,0,20190325101500000000
Mk3=Response,R\\1 left,x,1,0
";

    #[test]
    fn test_read_header_and_markers() {
        let dir = TempDir::new().unwrap();
        let header_path = dir.path().join("sub01.vhdr");
        std::fs::write(&header_path, HEADER).unwrap();
        std::fs::write(dir.path().join("sub01.vmrk"), MARKERS).unwrap();

        let recording = BrainVisionReader::read(&header_path).unwrap();
        assert_eq!(recording.sampling_frequency, 500.0);
        assert_eq!(recording.data_file.as_deref(), Some("sub01.eeg"));

        let names: Vec<&str> = recording.channels.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Fp1", "Fp2", "A,B"]);
        assert_eq!(recording.channels[2].reference.as_deref(), Some("REF"));
        assert_eq!(recording.channels[2].unit.as_deref(), Some("µV"));
        assert_eq!(recording.channels[0].resolution, Some(0.1));
        assert_eq!(
            recording.channels[0].coordinates,
            Some(Coordinates {
                radius: 1.0,
                theta: -90.0,
                phi: -72.0
            })
        );
        assert!(recording.channels[2].coordinates.is_none());

        // 格式错误的 Mk3 被跳过
        assert_eq!(recording.events.len(), 2);
        assert_eq!(recording.events[0].event_type, "New Segment");
        assert_eq!(recording.events[0].date.as_deref(), Some("20190325101500000000"));
        assert_eq!(recording.events[1].description, "S  1");
        assert_eq!(recording.events[1].position, 487);
    }

    #[test]
    fn test_missing_marker_file_yields_no_events() {
        let dir = TempDir::new().unwrap();
        let header_path = dir.path().join("sub01.vhdr");
        std::fs::write(&header_path, HEADER).unwrap();

        let recording = BrainVisionReader::read(&header_path).unwrap();
        assert!(recording.events.is_empty());
        assert_eq!(recording.channels.len(), 3);
    }

    #[test]
    fn test_referenced_files_stay_inside_folder() {
        let dir = TempDir::new().unwrap();
        let work = dir.path().join("work");
        std::fs::create_dir(&work).unwrap();
        std::fs::write(dir.path().join("outside.vmrk"), MARKERS).unwrap();

        let header = HEADER
            .replace("MarkerFile=sub01.vmrk", "MarkerFile=../outside.vmrk")
            .replace("DataFile=sub01.eeg", "DataFile=../../sub01.eeg");
        let header_path = work.join("sub01.vhdr");
        std::fs::write(&header_path, header).unwrap();

        let recording = BrainVisionReader::read(&header_path).unwrap();
        assert!(recording.events.is_empty());
        assert!(recording.marker_file.is_none());
        assert!(recording.data_file.is_none());
        assert_eq!(recording.channels.len(), 3);
    }

    #[test]
    fn test_rejects_zero_channels_and_bad_interval() {
        let dir = TempDir::new().unwrap();
        let header_path = dir.path().join("bad.vhdr");

        std::fs::write(
            &header_path,
            "Brain Vision Data Exchange Header File Version 1.0\n[Common Infos]\nNumberOfChannels=0\nSamplingInterval=1000\n",
        )
        .unwrap();
        assert!(matches!(
            BrainVisionReader::read(&header_path),
            Err(ImportError::EegFormat(_))
        ));

        std::fs::write(
            &header_path,
            "[Common Infos]\nNumberOfChannels=1\nSamplingInterval=0\n[Channel Infos]\nCh1=Cz,,1,µV\n",
        )
        .unwrap();
        assert!(matches!(
            BrainVisionReader::read(&header_path),
            Err(ImportError::EegFormat(_))
        ));

        std::fs::write(
            &header_path,
            "[Common Infos]\nSamplingInterval=1000\n[Channel Infos]\n",
        )
        .unwrap();
        assert!(matches!(
            BrainVisionReader::read(&header_path),
            Err(ImportError::EegFormat(_))
        ));
    }

    #[test]
    fn test_latin1_fallback() {
        let dir = TempDir::new().unwrap();
        let header_path = dir.path().join("latin.vhdr");
        let mut bytes = b"[Common Infos]\nSamplingInterval=1000\n[Channel Infos]\nCh1=Cz,,1,".to_vec();
        bytes.push(0xB5); // Latin-1 µ
        bytes.extend_from_slice(b"V\n");
        std::fs::write(&header_path, bytes).unwrap();

        let recording = BrainVisionReader::read(&header_path).unwrap();
        assert_eq!(recording.sampling_frequency, 1000.0);
        assert_eq!(recording.channels[0].unit.as_deref(), Some("µV"));
    }
}
