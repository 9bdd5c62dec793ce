//! 压缩包暂存器
//!
//! 布局: `<importRoot>/<userId>/<randomId>.upload` 为暂存的压缩包，
//! `<importRoot>/<userId>/<randomId>/` 为解压目录。

use ingest_core::utils::RandomIdGenerator;
use ingest_core::{ImportError, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use zip::ZipArchive;

/// 暂存文件扩展名
pub const UPLOAD_EXTENSION: &str = "upload";

/// 生成唯一文件名的最大尝试次数
const MAX_NAME_ATTEMPTS: usize = 16;

/// 接受的内容类型
const ACCEPTED_CONTENT_TYPES: &[&str] = &[
    "application/zip",
    "application/x-zip-compressed",
    "application/octet-stream",
];

/// 压缩包来源
#[derive(Debug, Clone)]
pub enum ArchiveInput {
    /// 上传的字节内容
    Bytes {
        data: Vec<u8>,
        file_name: Option<String>,
        content_type: Option<String>,
    },
    /// 已在磁盘上的压缩包，暂存时被移动
    Path(PathBuf),
}

/// 暂存结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedArchive {
    pub archive_path: PathBuf,
    pub extraction_folder: PathBuf,
}

fn has_zip_suffix(name: &str) -> bool {
    name.trim().to_ascii_lowercase().ends_with(".zip")
}

fn is_accepted_content_type(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    ACCEPTED_CONTENT_TYPES.contains(&essence.as_str())
}

/// 压缩包暂存器
#[derive(Debug, Clone)]
pub struct ArchiveStager {
    import_root: PathBuf,
    ids: Arc<RandomIdGenerator>,
}

impl ArchiveStager {
    pub fn new(import_root: impl Into<PathBuf>, ids: Arc<RandomIdGenerator>) -> Self {
        Self {
            import_root: import_root.into(),
            ids,
        }
    }

    pub fn import_root(&self) -> &Path {
        &self.import_root
    }

    /// 暂存并解压压缩包
    ///
    /// 给定 `expected_marker` 时，解压前检查压缩包根目录下是否存在该文件 (不区分大小写)。
    /// 输入被拒绝时已写入的暂存文件保留，解压目录不会残留。
    pub fn stage(
        &self,
        user_id: u64,
        input: ArchiveInput,
        expected_marker: Option<&str>,
    ) -> Result<StagedArchive> {
        Self::check_input(&input)?;

        let user_folder = self.user_folder(user_id)?;
        let archive_path = match input {
            ArchiveInput::Bytes { data, .. } => self.write_bytes(&user_folder, &data)?,
            ArchiveInput::Path(source) => self.move_file(&user_folder, &source)?,
        };
        info!("压缩包已暂存: {:?}", archive_path);

        let extraction_folder = archive_path.with_extension("");
        Self::extract(&archive_path, &extraction_folder, expected_marker)?;

        info!("压缩包已解压: {:?}", extraction_folder);
        Ok(StagedArchive {
            archive_path,
            extraction_folder,
        })
    }

    fn check_input(input: &ArchiveInput) -> Result<()> {
        match input {
            ArchiveInput::Bytes {
                data,
                file_name,
                content_type,
            } => {
                if data.is_empty() {
                    return Err(ImportError::NoFile);
                }
                let by_type = content_type.as_deref().is_some_and(is_accepted_content_type);
                let by_name = file_name.as_deref().is_some_and(has_zip_suffix);
                if !by_type && !by_name {
                    let described = file_name
                        .clone()
                        .or_else(|| content_type.clone())
                        .unwrap_or_default();
                    warn!("拒绝不支持的上传类型: {}", described);
                    return Err(ImportError::UnsupportedArchive(described));
                }
                Ok(())
            }
            ArchiveInput::Path(path) => {
                if !path.is_file() {
                    return Err(ImportError::NoFile);
                }
                let name = path
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_default();
                if !has_zip_suffix(&name) {
                    return Err(ImportError::UnsupportedArchive(name));
                }
                Ok(())
            }
        }
    }

    /// 用户工作目录，首次使用时创建
    fn user_folder(&self, user_id: u64) -> Result<PathBuf> {
        let folder = self.import_root.join(user_id.to_string());
        if !folder.exists() {
            debug!("创建用户工作目录: {:?}", folder);
            fs::create_dir_all(&folder)?;
        }
        Ok(folder)
    }

    /// 以随机ID占用一个新文件名
    fn reserve(&self, user_folder: &Path) -> Result<(PathBuf, File)> {
        for _ in 0..MAX_NAME_ATTEMPTS {
            let id = self.ids.next_id();
            let path = user_folder.join(format!("{}.{}", id, UPLOAD_EXTENSION));
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => return Ok((path, file)),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    debug!("暂存文件名冲突，重新生成: {:?}", path);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(ImportError::Internal("无法生成唯一的暂存文件名".to_string()))
    }

    fn write_bytes(&self, user_folder: &Path, data: &[u8]) -> Result<PathBuf> {
        let (path, mut file) = self.reserve(user_folder)?;
        if let Err(e) = file.write_all(data).and_then(|_| file.sync_all()) {
            let _ = fs::remove_file(&path);
            return Err(e.into());
        }
        Ok(path)
    }

    /// 移动已有文件，跨设备时退化为复制后删除
    fn move_file(&self, user_folder: &Path, source: &Path) -> Result<PathBuf> {
        let (path, file) = self.reserve(user_folder)?;
        drop(file);

        if let Err(e) = fs::rename(source, &path) {
            debug!("重命名失败，改为复制: {}", e);
            if let Err(e) = fs::copy(source, &path) {
                let _ = fs::remove_file(&path);
                return Err(e.into());
            }
            if let Err(e) = fs::remove_file(source) {
                warn!("删除源文件失败 {:?}: {}", source, e);
            }
        }
        Ok(path)
    }

    fn extract(archive_path: &Path, folder: &Path, expected_marker: Option<&str>) -> Result<()> {
        let file = File::open(archive_path)?;
        let mut archive =
            ZipArchive::new(file).map_err(|e| ImportError::InvalidArchive(e.to_string()))?;

        if let Some(marker) = expected_marker {
            let found = archive
                .file_names()
                .any(|name| name.trim_start_matches("./").eq_ignore_ascii_case(marker));
            if !found {
                warn!("压缩包缺少 {}: {:?}", marker, archive_path);
                return Err(ImportError::MissingMarker(marker.to_string()));
            }
        }

        match fs::create_dir(folder) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                warn!("解压目录已存在: {:?}", folder);
                return Err(ImportError::FolderExists(folder.display().to_string()));
            }
            Err(e) => return Err(e.into()),
        }

        if let Err(e) = Self::unpack(&mut archive, folder) {
            warn!("解压失败，清理目录 {:?}: {}", folder, e);
            let _ = fs::remove_dir_all(folder);
            return Err(e);
        }
        Ok(())
    }

    fn unpack(archive: &mut ZipArchive<File>, folder: &Path) -> Result<()> {
        for index in 0..archive.len() {
            let mut entry = archive
                .by_index(index)
                .map_err(|e| ImportError::InvalidArchive(e.to_string()))?;

            let Some(relative) = entry.enclosed_name() else {
                return Err(ImportError::UnsafeEntry(entry.name().to_string()));
            };
            let target = folder.join(relative);

            if entry.is_dir() {
                fs::create_dir_all(&target)?;
                continue;
            }
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }

            let mut out = File::create(&target)?;
            io::copy(&mut entry, &mut out).map_err(|e| {
                ImportError::InvalidArchive(format!("{}: {}", entry.name(), e))
            })?;
        }
        Ok(())
    }
}
