//! 导入任务组装
//!
//! 将DICOM树或EEG数据集列表与来源、工作目录组合为导入任务描述。

use crate::models::{EegDataset, Patient};
use crate::utils::relative_path_string;
use crate::{ImportError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// 导入任务来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Provenance {
    /// 上传的压缩包
    ArchiveUpload,
    /// 厂商上传工具生成的压缩包
    VendorUploadTool,
    /// PACS查询
    PacsQuery,
}

/// 导入任务内容，DICOM树与EEG数据集互斥
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum JobPayload {
    Dicom { patients: Vec<Patient> },
    Eeg { datasets: Vec<EegDataset> },
}

impl JobPayload {
    pub fn is_empty(&self) -> bool {
        match self {
            JobPayload::Dicom { patients } => patients.is_empty(),
            JobPayload::Eeg { datasets } => datasets.is_empty(),
        }
    }
}

/// 导入任务描述
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportJob {
    pub source: Provenance,
    /// 相对于导入根目录的工作目录，PACS任务为空
    pub work_folder: String,
    pub payload: JobPayload,
}

impl ImportJob {
    pub fn patients(&self) -> Option<&[Patient]> {
        match &self.payload {
            JobPayload::Dicom { patients } => Some(patients),
            JobPayload::Eeg { .. } => None,
        }
    }

    pub fn eeg_datasets(&self) -> Option<&[EegDataset]> {
        match &self.payload {
            JobPayload::Eeg { datasets } => Some(datasets),
            JobPayload::Dicom { .. } => None,
        }
    }
}

/// 导入任务组装器
#[derive(Debug, Clone)]
pub struct JobAssembler {
    import_root: PathBuf,
}

impl JobAssembler {
    pub fn new(import_root: impl Into<PathBuf>) -> Self {
        Self {
            import_root: import_root.into(),
        }
    }

    pub fn import_root(&self) -> &Path {
        &self.import_root
    }

    /// 组装导入任务
    ///
    /// 工作目录转换为相对于导入根目录的路径，不对外暴露文件系统布局。
    pub fn assemble(
        &self,
        source: Provenance,
        work_folder: Option<&Path>,
        payload: JobPayload,
    ) -> Result<ImportJob> {
        if payload.is_empty() {
            return Err(ImportError::EmptyJob);
        }

        let work_folder = match work_folder {
            Some(folder) => relative_path_string(&self.import_root, folder)?,
            None => String::new(),
        };

        info!("组装导入任务: 来源={:?}, 工作目录={}", source, work_folder);

        Ok(ImportJob {
            source,
            work_folder,
            payload,
        })
    }

    /// 将任务的相对工作目录还原为绝对路径
    pub fn resolve_work_folder(&self, job: &ImportJob) -> Option<PathBuf> {
        if job.work_folder.is_empty() {
            return None;
        }
        crate::utils::resolve_relative(&self.import_root, &job.work_folder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Instance, Series, Study};

    fn patients() -> Vec<Patient> {
        vec![Patient {
            patient_id: Some("P1".to_string()),
            studies: vec![Study {
                study_instance_uid: "1.2.3".to_string(),
                series: vec![Series {
                    series_instance_uid: "1.2.3.4".to_string(),
                    instances: vec![Instance {
                        file_path: "IMG001".to_string(),
                        ..Default::default()
                    }],
                    ..Default::default()
                }],
                ..Default::default()
            }],
            ..Default::default()
        }]
    }

    #[test]
    fn test_assemble_relative_work_folder() {
        let assembler = JobAssembler::new("/srv/import");
        let job = assembler
            .assemble(
                Provenance::ArchiveUpload,
                Some(Path::new("/srv/import/42/123")),
                JobPayload::Dicom {
                    patients: patients(),
                },
            )
            .unwrap();

        assert_eq!(job.source, Provenance::ArchiveUpload);
        assert_eq!(job.work_folder, "42/123");
        assert_eq!(job.patients().map(|p| p.len()), Some(1));
        assert!(job.eeg_datasets().is_none());
        assert_eq!(
            assembler.resolve_work_folder(&job),
            Some(PathBuf::from("/srv/import/42/123"))
        );
    }

    #[test]
    fn test_assemble_rejects_outside_root_and_empty() {
        let assembler = JobAssembler::new("/srv/import");
        let result = assembler.assemble(
            Provenance::ArchiveUpload,
            Some(Path::new("/tmp/elsewhere")),
            JobPayload::Dicom {
                patients: patients(),
            },
        );
        assert!(result.is_err());

        let result = assembler.assemble(
            Provenance::PacsQuery,
            None,
            JobPayload::Dicom { patients: vec![] },
        );
        assert!(matches!(result, Err(ImportError::EmptyJob)));
    }

    #[test]
    fn test_job_serialization_shape() {
        let assembler = JobAssembler::new("/srv/import");
        let job = assembler
            .assemble(
                Provenance::PacsQuery,
                None,
                JobPayload::Dicom {
                    patients: patients(),
                },
            )
            .unwrap();

        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["source"], "pacs-query");
        assert_eq!(value["workFolder"], "");
        assert_eq!(value["payload"]["kind"], "dicom");
        assert_eq!(
            value["payload"]["patients"][0]["studies"][0]["studyInstanceUid"],
            "1.2.3"
        );

        let back: ImportJob = serde_json::from_value(value).unwrap();
        assert_eq!(back, job);
    }
}
