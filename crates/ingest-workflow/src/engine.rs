//! 导入引擎
//!
//! 协调各组件完成端到端导入流程:
//! - DICOM压缩包: 暂存 → DICOMDIR解析 → 并行分类补全 → 组装
//! - 厂商上传工具: 暂存 → 读取任务描述 → 重新定位实例 → 组装并提交
//! - EEG压缩包: 暂存 → BrainVision解析 → 组装
//! - PACS: 检查/系列两级查询 → 组装

use ingest_admin::IngestConfig;
use ingest_core::utils::{relative_path_string, resolve_relative, RandomIdGenerator};
use ingest_core::{
    prune_empty, ImportError, ImportJob, JobAssembler, JobPayload, Patient, Provenance, Result,
};
use ingest_dicom::{
    DicomDirReader, DicomQuery, DimseFindScu, HierarchicalFind, PacsQueryClient, SeriesClassifier,
};
use ingest_eeg::scan_datasets;
use ingest_integration::{DatasetService, HttpDatasetService};
use ingest_staging::{ArchiveInput, ArchiveStager, StagedArchive};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

/// 引擎参数
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub import_root: PathBuf,
    pub dicomdir_name: String,
    pub vendor_job_file: String,
    pub enrichment_attempts: usize,
    /// PACS查询的总时限
    pub pacs_timeout: Duration,
}

impl EngineSettings {
    pub fn from_config(config: &IngestConfig) -> Self {
        Self {
            import_root: config.import_root(),
            dicomdir_name: config.import.dicomdir_name.clone(),
            vendor_job_file: config.import.vendor_job_file.clone(),
            enrichment_attempts: config.import.enrichment_attempts,
            pacs_timeout: config.pacs.timeout(),
        }
    }
}

/// 导入引擎
pub struct ImportEngine {
    settings: EngineSettings,
    stager: ArchiveStager,
    assembler: JobAssembler,
    classifier: Arc<SeriesClassifier>,
    pacs: Arc<PacsQueryClient>,
    datasets: Arc<dyn DatasetService>,
}

/// 在阻塞线程池中执行文件操作
async fn run_blocking<T, F>(task: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| ImportError::Internal(format!("后台任务失败: {}", e)))?
}

/// 在解压目录根下查找文件，文件名不区分大小写
fn find_root_file(folder: &Path, name: &str) -> Result<PathBuf> {
    for entry in std::fs::read_dir(folder)? {
        let entry = entry?;
        if entry.file_name().to_string_lossy().eq_ignore_ascii_case(name)
            && entry.file_type()?.is_file()
        {
            return Ok(entry.path());
        }
    }
    Err(ImportError::MissingMarker(name.to_string()))
}

fn new_request_id() -> String {
    Uuid::new_v4().to_string()
}

/// 将实例路径重新定位到解压目录，无法定位的实例被删除
fn reanchor_instances(patients: &mut Vec<Patient>, work_folder: &Path) {
    let mut dropped = 0usize;
    for series in patients
        .iter_mut()
        .flat_map(|patient| patient.studies.iter_mut())
        .flat_map(|study| study.series.iter_mut())
    {
        series.instances.retain_mut(|instance| {
            let resolved = resolve_relative(work_folder, &instance.file_path)
                .filter(|path| path.is_file())
                .and_then(|path| relative_path_string(work_folder, &path).ok());
            match resolved {
                Some(relative) => {
                    instance.file_path = relative;
                    true
                }
                None => {
                    warn!("实例文件不在解压目录中，已忽略: {}", instance.file_path);
                    dropped += 1;
                    false
                }
            }
        });
    }
    if dropped > 0 {
        warn!("共忽略 {} 个无法定位的实例", dropped);
    }
    prune_empty(patients);
}

impl ImportEngine {
    pub fn new(
        settings: EngineSettings,
        ids: Arc<RandomIdGenerator>,
        finder: Arc<dyn HierarchicalFind>,
        datasets: Arc<dyn DatasetService>,
    ) -> Self {
        Self {
            stager: ArchiveStager::new(settings.import_root.clone(), ids),
            assembler: JobAssembler::new(settings.import_root.clone()),
            classifier: Arc::new(SeriesClassifier::new(settings.enrichment_attempts)),
            pacs: Arc::new(PacsQueryClient::new(finder)),
            datasets,
            settings,
        }
    }

    /// 按配置创建引擎，使用DIMSE查询与HTTP数据集服务
    pub fn from_config(config: &IngestConfig) -> Result<Self> {
        let ids = match config.import.random_seed {
            Some(seed) => RandomIdGenerator::from_seed(seed),
            None => RandomIdGenerator::from_entropy(),
        };
        let finder = Arc::new(DimseFindScu::new(config.pacs.clone()));
        let datasets = Arc::new(HttpDatasetService::new(config.datasets.clone())?);
        Ok(Self::new(
            EngineSettings::from_config(config),
            Arc::new(ids),
            finder,
            datasets,
        ))
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn assembler(&self) -> &JobAssembler {
        &self.assembler
    }

    async fn stage(
        &self,
        user_id: u64,
        input: ArchiveInput,
        marker: Option<String>,
    ) -> Result<StagedArchive> {
        let stager = self.stager.clone();
        run_blocking(move || stager.stage(user_id, input, marker.as_deref())).await
    }

    /// 上传DICOM压缩包，根目录下必须有DICOMDIR
    pub async fn upload_dicom_archive(&self, user_id: u64, input: ArchiveInput) -> Result<ImportJob> {
        let staged = self
            .stage(user_id, input, Some(self.settings.dicomdir_name.clone()))
            .await?;
        let folder = staged.extraction_folder.clone();

        let dicomdir_name = self.settings.dicomdir_name.clone();
        let patients = run_blocking(move || {
            let index = find_root_file(&folder, &dicomdir_name)?;
            DicomDirReader::read_patients(&index)
        })
        .await?;

        let patients = self
            .classify_parallel(patients, &staged.extraction_folder)
            .await?;

        self.assembler.assemble(
            Provenance::ArchiveUpload,
            Some(&staged.extraction_folder),
            JobPayload::Dicom { patients },
        )
    }

    /// 各系列独立分类，结果按原位置放回以保持顺序
    async fn classify_parallel(
        &self,
        mut patients: Vec<Patient>,
        work_folder: &Path,
    ) -> Result<Vec<Patient>> {
        let mut tasks = JoinSet::new();
        for (p, patient) in patients.iter_mut().enumerate() {
            for (s, study) in patient.studies.iter_mut().enumerate() {
                for (r, series) in study.series.iter_mut().enumerate() {
                    let mut series = std::mem::take(series);
                    let classifier = Arc::clone(&self.classifier);
                    let folder = work_folder.to_path_buf();
                    tasks.spawn_blocking(move || {
                        classifier.classify_series(&mut series, &folder);
                        ((p, s, r), series)
                    });
                }
            }
        }

        let total = tasks.len();
        while let Some(joined) = tasks.join_next().await {
            let ((p, s, r), series) =
                joined.map_err(|e| ImportError::Internal(format!("分类任务失败: {}", e)))?;
            patients[p].studies[s].series[r] = series;
        }
        info!("完成 {} 个系列的分类", total);
        Ok(patients)
    }

    /// 上传厂商上传工具生成的压缩包，任务描述解析后直接提交
    pub async fn upload_from_vendor_tool(
        &self,
        user_id: u64,
        input: ArchiveInput,
    ) -> Result<ImportJob> {
        let staged = self
            .stage(user_id, input, Some(self.settings.vendor_job_file.clone()))
            .await?;
        let folder = staged.extraction_folder.clone();
        let job_file = self.settings.vendor_job_file.clone();

        let patients = run_blocking(move || {
            let path = find_root_file(&folder, &job_file)?;
            let bytes = std::fs::read(&path)?;
            let uploaded: ImportJob = serde_json::from_slice(&bytes)
                .map_err(|e| ImportError::JobFormat(format!("{}: {}", job_file, e)))?;
            let mut patients = match uploaded.payload {
                JobPayload::Dicom { patients } => patients,
                JobPayload::Eeg { .. } => {
                    return Err(ImportError::JobFormat(format!(
                        "{} 不是DICOM任务",
                        job_file
                    )))
                }
            };
            reanchor_instances(&mut patients, &folder);
            Ok(patients)
        })
        .await?;

        let job = self.assembler.assemble(
            Provenance::VendorUploadTool,
            Some(&staged.extraction_folder),
            JobPayload::Dicom { patients },
        )?;
        self.start_import(&job).await?;
        Ok(job)
    }

    /// 上传BrainVision EEG压缩包
    pub async fn upload_eeg_archive(&self, user_id: u64, input: ArchiveInput) -> Result<ImportJob> {
        let staged = self.stage(user_id, input, None).await?;
        let folder = staged.extraction_folder.clone();
        let datasets = run_blocking(move || scan_datasets(&folder)).await?;

        self.assembler.assemble(
            Provenance::ArchiveUpload,
            Some(&staged.extraction_folder),
            JobPayload::Eeg { datasets },
        )
    }

    /// 查询PACS，无匹配时返回 None
    pub async fn query_pacs(&self, query: &DicomQuery) -> Result<Option<ImportJob>> {
        let request_id = new_request_id();
        let endpoint = self.pacs.endpoint();
        let span = info_span!("pacs_query", request_id = %request_id, endpoint = %endpoint);

        let client = Arc::clone(&self.pacs);
        let criteria = query.clone();
        let id = request_id.clone();
        let handle = tokio::task::spawn_blocking(move || client.query(&criteria, &id));

        let patients = match tokio::time::timeout(self.settings.pacs_timeout, handle)
            .instrument(span)
            .await
        {
            Ok(joined) => {
                joined.map_err(|e| ImportError::Internal(format!("查询任务失败: {}", e)))??
            }
            Err(_) => {
                warn!("PACS查询超时: {} (请求 {})", endpoint, request_id);
                return Err(ImportError::Timeout {
                    endpoint,
                    request_id,
                });
            }
        };

        if patients.is_empty() {
            info!("PACS查询无匹配结果 (请求 {})", request_id);
            return Ok(None);
        }
        self.assembler
            .assemble(Provenance::PacsQuery, None, JobPayload::Dicom { patients })
            .map(Some)
    }

    /// 将任务提交给数据集服务，返回请求ID
    pub async fn start_import(&self, job: &ImportJob) -> Result<String> {
        if job.payload.is_empty() {
            return Err(ImportError::EmptyJob);
        }
        let request_id = new_request_id();
        info!(
            "提交导入任务: 来源={:?}, 工作目录={} (请求 {})",
            job.source, job.work_folder, request_id
        );
        self.datasets.submit(job, &request_id).await?;
        Ok(request_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use dicom::core::{DataElement, PrimitiveValue, VR};
    use dicom::dictionary_std::tags;
    use dicom::object::InMemDicomObject;
    use ingest_core::{instances, Instance, Series, Study};
    use ingest_dicom::testing::{
        image_record, patient_record, series_record, study_record, write_tree, InstanceFixture,
        TreeNode,
    };
    use ingest_dicom::FindRequest;
    use std::io::{Cursor, Write};
    use std::sync::Mutex;
    use tempfile::TempDir;
    use zip::write::{FileOptions, ZipWriter};

    /// 记录提交内容的数据集服务
    #[derive(Default)]
    struct RecordingService {
        submitted: Mutex<Vec<ImportJob>>,
        fail: bool,
    }

    #[async_trait]
    impl DatasetService for RecordingService {
        async fn submit(&self, job: &ImportJob, request_id: &str) -> Result<()> {
            if self.fail {
                return Err(ImportError::Transport {
                    endpoint: "http://datasets".to_string(),
                    request_id: request_id.to_string(),
                    message: "connection refused".to_string(),
                });
            }
            self.submitted.lock().unwrap().push(job.clone());
            Ok(())
        }
    }

    /// 返回固定检查列表的PACS
    #[derive(Default)]
    struct StaticPacs {
        studies: Vec<InMemDicomObject>,
        delay: Option<Duration>,
    }

    impl HierarchicalFind for StaticPacs {
        fn endpoint(&self) -> String {
            "STATIC@127.0.0.1:104".to_string()
        }

        fn find(&self, request: &FindRequest) -> Result<Vec<InMemDicomObject>> {
            if let Some(delay) = self.delay {
                std::thread::sleep(delay);
            }
            match request.level {
                ingest_dicom::QueryLevel::Study => Ok(self.studies.clone()),
                ingest_dicom::QueryLevel::Series => Ok(Vec::new()),
            }
        }
    }

    fn study_match(patient_id: &str, study_uid: &str) -> InMemDicomObject {
        InMemDicomObject::from_element_iter([
            DataElement::new(tags::PATIENT_ID, VR::LO, PrimitiveValue::from(patient_id)),
            DataElement::new(tags::STUDY_INSTANCE_UID, VR::UI, PrimitiveValue::from(study_uid)),
        ])
    }

    fn engine_with(
        root: &Path,
        pacs: StaticPacs,
        datasets: Arc<RecordingService>,
    ) -> ImportEngine {
        let settings = EngineSettings {
            import_root: root.to_path_buf(),
            dicomdir_name: "DICOMDIR".to_string(),
            vendor_job_file: "importJob.json".to_string(),
            enrichment_attempts: 3,
            pacs_timeout: Duration::from_secs(5),
        };
        ImportEngine::new(
            settings,
            Arc::new(RandomIdGenerator::from_seed(11)),
            Arc::new(pacs),
            datasets,
        )
    }

    fn zip_bytes(entries: &[(&str, Vec<u8>)]) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options: FileOptions<()> = FileOptions::default();
        for (name, content) in entries {
            writer.start_file(*name, options).unwrap();
            writer.write_all(content).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    fn upload(data: Vec<u8>) -> ArchiveInput {
        ArchiveInput::Bytes {
            data,
            file_name: Some("exam.zip".to_string()),
            content_type: Some("application/zip".to_string()),
        }
    }

    /// DICOMDIR + IMG001 + IMG002，两个系列各引用两个实例
    fn dicom_archive(fixtures: &Path) -> Vec<u8> {
        let index = fixtures.join("DICOMDIR");
        write_tree(
            &index,
            vec![TreeNode::new(patient_record("P1", "Doe^Jane")).with_children(vec![
                TreeNode::new(study_record("1.2.3", "20190325")).with_children(vec![
                    TreeNode::new(series_record("1.2.3.1", "MR", 1)).with_children(vec![
                        TreeNode::new(image_record(&["IMG001"], "1.2.3.1.1")),
                        TreeNode::new(image_record(&["IMG002"], "1.2.3.1.2")),
                    ]),
                    TreeNode::new(series_record("1.2.3.2", "MR", 2)).with_children(vec![
                        TreeNode::new(image_record(&["IMG001"], "1.2.3.2.1")),
                        TreeNode::new(image_record(&["IMG002"], "1.2.3.2.2")),
                    ]),
                ]),
            ])],
        );
        InstanceFixture::mr_image("1.2.3.1", "1.2.3.1.1")
            .with_timing(2.98, 2300.0)
            .write(&fixtures.join("IMG001"));
        InstanceFixture::mr_image("1.2.3.1", "1.2.3.1.2").write(&fixtures.join("IMG002"));

        let read = |name: &str| std::fs::read(fixtures.join(name)).unwrap();
        zip_bytes(&[
            ("DICOMDIR", read("DICOMDIR")),
            ("IMG001", read("IMG001")),
            ("IMG002", read("IMG002")),
        ])
    }

    #[tokio::test]
    async fn test_upload_dicom_archive() {
        let root = TempDir::new().unwrap();
        let fixtures = TempDir::new().unwrap();
        let engine = engine_with(root.path(), StaticPacs::default(), Arc::default());

        let job = engine
            .upload_dicom_archive(7, upload(dicom_archive(fixtures.path())))
            .await
            .unwrap();

        assert_eq!(job.source, Provenance::ArchiveUpload);
        assert!(job.work_folder.starts_with("7/"));
        let patients = job.patients().unwrap();
        assert_eq!(patients.len(), 1);
        assert_eq!(patients[0].studies.len(), 1);

        let series = &patients[0].studies[0].series;
        assert_eq!(series.len(), 2);
        for entry in series {
            assert_eq!(entry.instances.len(), 2);
            let classification = entry.classification.as_ref().unwrap();
            assert_eq!(classification.images, vec!["IMG001", "IMG002"]);
            assert!(classification.non_images.is_empty());
            assert_eq!(entry.acquisition.echo_time, Some(2.98));
        }

        // 所有实例都位于工作目录内
        let work_folder = engine.assembler().resolve_work_folder(&job).unwrap();
        assert!(work_folder.starts_with(root.path()));
        for instance in instances(patients) {
            assert!(work_folder.join(&instance.file_path).is_file());
        }
    }

    #[tokio::test]
    async fn test_upload_dicom_archive_without_index() {
        let root = TempDir::new().unwrap();
        let engine = engine_with(root.path(), StaticPacs::default(), Arc::default());

        let result = engine
            .upload_dicom_archive(7, upload(zip_bytes(&[("IMG001", vec![0u8; 16])])))
            .await;
        assert!(matches!(result, Err(ImportError::MissingMarker(_))));

        // 只保留暂存文件，没有解压目录
        let user_folder = root.path().join("7");
        let leftovers: Vec<PathBuf> = std::fs::read_dir(&user_folder)
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .collect();
        assert_eq!(leftovers.len(), 1);
        assert!(leftovers[0].is_file());
    }

    fn vendor_job() -> ImportJob {
        let instance = |path: &str| Instance {
            file_path: path.to_string(),
            ..Default::default()
        };
        ImportJob {
            source: Provenance::ArchiveUpload,
            work_folder: "/client/side/folder".to_string(),
            payload: JobPayload::Dicom {
                patients: vec![Patient {
                    patient_id: Some("P1".to_string()),
                    studies: vec![Study {
                        study_instance_uid: "1.2.3".to_string(),
                        series: vec![
                            Series {
                                series_instance_uid: "1.2.3.1".to_string(),
                                instances: vec![
                                    instance("./DICOM/IMG001"),
                                    instance("DICOM/IMG009"),
                                    instance("../../etc/passwd"),
                                ],
                                ..Default::default()
                            },
                            Series {
                                series_instance_uid: "1.2.3.2".to_string(),
                                instances: vec![instance("DICOM/MISSING")],
                                ..Default::default()
                            },
                        ],
                        ..Default::default()
                    }],
                    ..Default::default()
                }],
            },
        }
    }

    #[tokio::test]
    async fn test_vendor_upload_reanchors_and_submits() {
        let root = TempDir::new().unwrap();
        let service = Arc::new(RecordingService::default());
        let engine = engine_with(root.path(), StaticPacs::default(), service.clone());

        let archive = zip_bytes(&[
            ("importJob.json", serde_json::to_vec(&vendor_job()).unwrap()),
            ("DICOM/IMG001", vec![1u8; 32]),
        ]);
        let job = engine.upload_from_vendor_tool(3, upload(archive)).await.unwrap();

        assert_eq!(job.source, Provenance::VendorUploadTool);
        assert!(job.work_folder.starts_with("3/"));
        let patients = job.patients().unwrap();
        assert_eq!(patients[0].studies[0].series.len(), 1);
        let kept: Vec<&str> = instances(patients).map(|i| i.file_path.as_str()).collect();
        assert_eq!(kept, vec!["DICOM/IMG001"]);

        let submitted = service.submitted.lock().unwrap();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0], job);
    }

    #[tokio::test]
    async fn test_vendor_upload_rejects_bad_job_document() {
        let root = TempDir::new().unwrap();
        let service = Arc::new(RecordingService::default());
        let engine = engine_with(root.path(), StaticPacs::default(), service.clone());

        let archive = zip_bytes(&[("importJob.json", b"{ not json".to_vec())]);
        let result = engine.upload_from_vendor_tool(3, upload(archive)).await;
        assert!(matches!(result, Err(ImportError::JobFormat(_))));

        let archive = zip_bytes(&[("DICOM/IMG001", vec![1u8; 4])]);
        let result = engine.upload_from_vendor_tool(3, upload(archive)).await;
        assert!(matches!(result, Err(ImportError::MissingMarker(_))));

        assert!(service.submitted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upload_eeg_archive() {
        let root = TempDir::new().unwrap();
        let engine = engine_with(root.path(), StaticPacs::default(), Arc::default());

        let header = "Brain Vision Data Exchange Header File Version 1.0\n\
                      [Common Infos]\n\
                      DataFile=rest.eeg\n\
                      MarkerFile=rest.vmrk\n\
                      NumberOfChannels=1\n\
                      SamplingInterval=1000\n\
                      [Channel Infos]\n\
                      Ch1=Fz,,0.1,µV\n";
        let markers = "Brain Vision Data Exchange Marker File Version 1.0\n\
                       [Marker Infos]\n\
                       Mk1=Stimulus,S  1,250,1,0\n";
        let archive = zip_bytes(&[
            ("rest/rest.vhdr", header.as_bytes().to_vec()),
            ("rest/rest.vmrk", markers.as_bytes().to_vec()),
            ("rest/rest.eeg", vec![0u8; 8]),
        ]);

        let job = engine.upload_eeg_archive(5, upload(archive)).await.unwrap();
        assert_eq!(job.source, Provenance::ArchiveUpload);
        let datasets = job.eeg_datasets().unwrap();
        assert_eq!(datasets.len(), 1);
        assert_eq!(datasets[0].name, "rest");
        assert_eq!(datasets[0].sampling_frequency, 1000.0);
        assert_eq!(datasets[0].events.len(), 1);
        assert_eq!(
            datasets[0].files,
            vec!["rest/rest.eeg", "rest/rest.vhdr", "rest/rest.vmrk"]
        );
    }

    #[tokio::test]
    async fn test_query_pacs_results() {
        let root = TempDir::new().unwrap();
        let pacs = StaticPacs {
            studies: vec![study_match("P1", "1.2.3")],
            ..Default::default()
        };
        let engine = engine_with(root.path(), pacs, Arc::default());

        let job = engine
            .query_pacs(&DicomQuery {
                patient_id: Some("P1".to_string()),
                ..Default::default()
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(job.source, Provenance::PacsQuery);
        assert!(job.work_folder.is_empty());
        assert_eq!(job.patients().unwrap()[0].studies[0].study_instance_uid, "1.2.3");
    }

    #[tokio::test]
    async fn test_query_pacs_without_matches() {
        let root = TempDir::new().unwrap();
        let engine = engine_with(root.path(), StaticPacs::default(), Arc::default());

        let job = engine.query_pacs(&DicomQuery::default()).await.unwrap();
        assert!(job.is_none());
    }

    #[tokio::test]
    async fn test_query_pacs_timeout() {
        let root = TempDir::new().unwrap();
        let pacs = StaticPacs {
            studies: vec![study_match("P1", "1.2.3")],
            delay: Some(Duration::from_millis(500)),
        };
        let mut engine = engine_with(root.path(), pacs, Arc::default());
        engine.settings.pacs_timeout = Duration::from_millis(50);

        let error = engine.query_pacs(&DicomQuery::default()).await.unwrap_err();
        match &error {
            ImportError::Timeout { endpoint, request_id } => {
                assert_eq!(endpoint, "STATIC@127.0.0.1:104");
                assert!(!request_id.is_empty());
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(error.is_retryable());
    }

    #[tokio::test]
    async fn test_start_import() {
        let root = TempDir::new().unwrap();
        let service = Arc::new(RecordingService::default());
        let engine = engine_with(root.path(), StaticPacs::default(), service.clone());

        let job = vendor_job();
        let request_id = engine.start_import(&job).await.unwrap();
        assert!(!request_id.is_empty());
        assert_eq!(service.submitted.lock().unwrap().len(), 1);

        let failing = Arc::new(RecordingService {
            fail: true,
            ..Default::default()
        });
        let engine = engine_with(root.path(), StaticPacs::default(), failing);
        let error = engine.start_import(&job).await.unwrap_err();
        assert!(matches!(error, ImportError::Transport { .. }));

        let empty = ImportJob {
            payload: JobPayload::Eeg { datasets: Vec::new() },
            ..job
        };
        assert!(matches!(
            engine.start_import(&empty).await,
            Err(ImportError::EmptyJob)
        ));
    }
}
