//! 在解压目录中查找 BrainVision 记录并组装 EEG 数据集

use crate::brainvision::BrainVisionReader;
use ingest_core::utils::relative_path_string;
use ingest_core::{EegDataset, ImportError, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

/// 头文件扩展名
const HEADER_EXTENSION: &str = "vhdr";

/// 头文件可位于解压目录根下或其下一级目录
const MAX_SCAN_DEPTH: usize = 2;

fn is_header(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().eq_ignore_ascii_case(HEADER_EXTENSION))
        .unwrap_or(false)
}

fn find_headers(work_folder: &Path) -> Result<Vec<PathBuf>> {
    let mut headers = Vec::new();
    for entry in WalkDir::new(work_folder)
        .min_depth(1)
        .max_depth(MAX_SCAN_DEPTH)
        .sort_by_file_name()
    {
        let entry = entry.map_err(std::io::Error::from)?;
        if entry.file_type().is_file() && is_header(entry.path()) {
            headers.push(entry.into_path());
        }
    }
    Ok(headers)
}

/// 与头文件同目录且文件名以 `<stem>.` 开头的文件
fn companion_files(work_folder: &Path, header: &Path, stem: &str) -> Result<Vec<String>> {
    let directory = header.parent().unwrap_or(work_folder);
    let prefix = format!("{}.", stem);
    let mut files = Vec::new();
    for entry in std::fs::read_dir(directory)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        if entry.file_name().to_string_lossy().starts_with(&prefix) {
            files.push(relative_path_string(work_folder, &entry.path())?);
        }
    }
    files.sort();
    Ok(files)
}

/// 扫描解压目录，每个 `.vhdr` 头文件生成一个数据集
pub fn scan_datasets(work_folder: &Path) -> Result<Vec<EegDataset>> {
    let headers = find_headers(work_folder)?;
    if headers.is_empty() {
        return Err(ImportError::EegFormat(
            "压缩包中没有 .vhdr 文件".to_string(),
        ));
    }
    info!("找到 {} 个EEG头文件: {:?}", headers.len(), work_folder);

    let mut datasets = Vec::with_capacity(headers.len());
    for header in headers {
        let stem = header
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        let recording = BrainVisionReader::read(&header)?;
        let files = companion_files(work_folder, &header, &stem)?;
        debug!("EEG数据集 {}: {} 个文件", stem, files.len());

        datasets.push(EegDataset {
            name: stem,
            sampling_frequency: recording.sampling_frequency,
            channels: recording.channels,
            events: recording.events,
            files,
        });
    }
    Ok(datasets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn header(stem: &str, channels: usize) -> String {
        let mut text = format!(
            "Brain Vision Data Exchange Header File Version 1.0\n\
             [Common Infos]\n\
             DataFile={stem}.eeg\n\
             MarkerFile={stem}.vmrk\n\
             NumberOfChannels={channels}\n\
             SamplingInterval=2000\n\
             [Channel Infos]\n"
        );
        for n in 1..=channels {
            text.push_str(&format!("Ch{n}=E{n},,0.1,µV\n"));
        }
        text
    }

    #[test]
    fn test_scan_nested_recordings() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let session = root.join("session");
        fs::create_dir(&session).unwrap();

        fs::write(session.join("rest.vhdr"), header("rest", 2)).unwrap();
        fs::write(session.join("rest.eeg"), [0u8; 8]).unwrap();
        fs::write(
            session.join("rest.vmrk"),
            "Brain Vision Data Exchange Marker File Version 1.0\n\
             [Marker Infos]\n\
             Mk1=New Segment,,1,1,0,20240301101500000000\n",
        )
        .unwrap();
        fs::write(root.join("task.vhdr"), header("task", 1)).unwrap();
        fs::write(root.join("readme.txt"), "notes").unwrap();

        let datasets = scan_datasets(root).unwrap();
        assert_eq!(datasets.len(), 2);

        let rest = &datasets[0];
        assert_eq!(rest.name, "rest");
        assert_eq!(rest.sampling_frequency, 500.0);
        assert_eq!(rest.channels.len(), 2);
        assert_eq!(rest.events.len(), 1);
        assert_eq!(
            rest.files,
            vec!["session/rest.eeg", "session/rest.vhdr", "session/rest.vmrk"]
        );

        let task = &datasets[1];
        assert_eq!(task.name, "task");
        assert!(task.events.is_empty());
        assert_eq!(task.files, vec!["task.vhdr"]);
    }

    #[test]
    fn test_companion_files_do_not_overlap() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        for stem in ["sub1", "sub10"] {
            fs::write(root.join(format!("{stem}.vhdr")), header(stem, 1)).unwrap();
            fs::write(root.join(format!("{stem}.eeg")), [0u8; 4]).unwrap();
        }

        let datasets = scan_datasets(root).unwrap();
        assert_eq!(datasets.len(), 2);
        assert_eq!(datasets[0].name, "sub1");
        assert_eq!(datasets[0].files, vec!["sub1.eeg", "sub1.vhdr"]);
        assert_eq!(datasets[1].name, "sub10");
        assert_eq!(datasets[1].files, vec!["sub10.eeg", "sub10.vhdr"]);
    }

    #[test]
    fn test_scan_without_header_fails() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("data.eeg"), [0u8; 4]).unwrap();

        let result = scan_datasets(temp_dir.path());
        assert!(matches!(result, Err(ImportError::EegFormat(_))));
    }

    #[test]
    fn test_scan_propagates_header_errors() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("broken.vhdr"), header("broken", 0)).unwrap();

        let result = scan_datasets(temp_dir.path());
        assert!(matches!(result, Err(ImportError::EegFormat(_))));
    }
}
