//! 通用工具函数

use crate::{ImportError, Result};
use chrono::NaiveDate;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;

/// 暂存文件名的随机ID生成器
///
/// 每个进程持有一个实例并显式传入暂存器；测试中可用固定种子构造。
#[derive(Debug)]
pub struct RandomIdGenerator {
    rng: Mutex<StdRng>,
}

impl RandomIdGenerator {
    /// 使用操作系统熵源初始化
    pub fn from_entropy() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }

    /// 使用固定种子初始化
    pub fn from_seed(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// 生成63位非负随机数
    pub fn next_id(&self) -> u64 {
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        rng.random::<u64>() >> 1
    }
}

/// 将相对路径分量拼接到根目录下，拒绝越出根目录的路径
pub fn confined_join<I, S>(root: &Path, components: I) -> Option<PathBuf>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut path = root.to_path_buf();
    let mut depth = 0usize;

    for component in components {
        let component = component.as_ref().trim();
        if component.is_empty() {
            continue;
        }
        for part in Path::new(component).components() {
            match part {
                Component::Normal(name) => {
                    path.push(name);
                    depth += 1;
                }
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
            }
        }
    }

    if depth == 0 {
        return None;
    }
    Some(path)
}

/// 将 '/' 分隔的相对路径解析到根目录下
pub fn resolve_relative(root: &Path, relative: &str) -> Option<PathBuf> {
    confined_join(root, relative.split(['/', '\\']))
}

/// 计算相对于根目录的路径字符串，统一使用 '/' 分隔
pub fn relative_path_string(root: &Path, path: &Path) -> Result<String> {
    let relative = path.strip_prefix(root).map_err(|_| {
        ImportError::Internal(format!(
            "路径 {} 不在 {} 之下",
            path.display(),
            root.display()
        ))
    })?;

    let parts: Vec<String> = relative
        .components()
        .filter_map(|component| match component {
            Component::Normal(name) => Some(name.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    Ok(parts.join("/"))
}

/// 解析DICOM DA格式日期 (YYYYMMDD，兼容 YYYY.MM.DD)
pub fn parse_dicom_date(value: &str) -> Option<NaiveDate> {
    let digits: String = value.trim().chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() != 8 {
        return None;
    }
    NaiveDate::parse_from_str(&digits, "%Y%m%d").ok()
}

/// 格式化为DICOM DA格式
pub fn format_dicom_date(date: NaiveDate) -> String {
    date.format("%Y%m%d").to_string()
}

/// 去除DICOM字符串值的填充字符，空值返回 None
pub fn clean_dicom_string(value: &str) -> Option<String> {
    let trimmed = value.trim_matches(|c: char| c.is_whitespace() || c == '\0');
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// 验证DICOM UID格式
pub fn is_valid_dicom_uid(uid: &str) -> bool {
    !uid.is_empty() && uid.len() <= 64 && uid.chars().all(|c| c.is_ascii_digit() || c == '.')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_id_generator() {
        let a = RandomIdGenerator::from_seed(7);
        let b = RandomIdGenerator::from_seed(7);
        let ids: Vec<u64> = (0..16).map(|_| a.next_id()).collect();
        let again: Vec<u64> = (0..16).map(|_| b.next_id()).collect();
        assert_eq!(ids, again);
        assert!(ids.iter().all(|id| *id <= i64::MAX as u64));

        let entropy = RandomIdGenerator::from_entropy();
        assert!(entropy.next_id() <= i64::MAX as u64);
    }

    #[test]
    fn test_confined_join() {
        let root = Path::new("/work/42/7");
        assert_eq!(
            confined_join(root, ["IMAGES", "IMG001"]),
            Some(PathBuf::from("/work/42/7/IMAGES/IMG001"))
        );
        assert_eq!(confined_join(root, ["..", "etc", "passwd"]), None);
        assert_eq!(confined_join(root, ["IMG/../../x"]), None);
        assert_eq!(confined_join(root, ["/etc/passwd"]), None);
        assert_eq!(confined_join(root, ["", " "]), None);
        assert_eq!(
            resolve_relative(root, "IMAGES/./IMG001"),
            Some(PathBuf::from("/work/42/7/IMAGES/IMG001"))
        );
    }

    #[test]
    fn test_relative_path_string() {
        let root = Path::new("/import");
        assert_eq!(
            relative_path_string(root, Path::new("/import/42/9")).unwrap(),
            "42/9"
        );
        assert!(relative_path_string(root, Path::new("/other/42")).is_err());
    }

    #[test]
    fn test_dicom_helpers() {
        assert_eq!(
            parse_dicom_date("20190325"),
            NaiveDate::from_ymd_opt(2019, 3, 25)
        );
        assert_eq!(
            parse_dicom_date("2019.03.25"),
            NaiveDate::from_ymd_opt(2019, 3, 25)
        );
        assert_eq!(parse_dicom_date("2019"), None);
        assert_eq!(clean_dicom_string(" MR\0"), Some("MR".to_string()));
        assert_eq!(clean_dicom_string("  "), None);
        assert!(is_valid_dicom_uid("1.2.840.10008.5.1.4.1.1.4"));
        assert!(!is_valid_dicom_uid("invalid.uid"));
    }
}
