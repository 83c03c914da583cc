//! services/twin_data/src/upload.rs
//!
//! Uploads a batch of files to blob storage with a bounded number of calls in
//! flight, and reports how many succeeded.

use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use twin_data_core::ports::{BlobStorage, PortError};

pub const DEFAULT_UPLOAD_CONCURRENCY: usize = 5;

#[derive(Debug, Clone)]
pub struct UploadItem {
    pub path: String,
    pub data: Bytes,
    pub content_type: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UploadFailure {
    pub path: String,
    pub error: PortError,
}

/// The tally of one batch. `successful_uploads + failed_uploads == total`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchUploadReport {
    pub total: usize,
    pub successful_uploads: usize,
    pub failed_uploads: usize,
    pub failures: Vec<UploadFailure>,
}

#[derive(Clone)]
pub struct BatchUploader {
    blobs: Arc<dyn BlobStorage>,
    concurrency: usize,
}

impl BatchUploader {
    /// Creates a new `BatchUploader`. A concurrency of zero is raised to one.
    pub fn new(blobs: Arc<dyn BlobStorage>, concurrency: usize) -> Self {
        Self { blobs, concurrency: concurrency.max(1) }
    }

    /// Starts one task per item and waits for all of them. At most
    /// `concurrency` uploads run at a time.
    pub async fn upload_all(&self, container: &str, items: Vec<UploadItem>) -> BatchUploadReport {
        let total = items.len();
        let permits = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();

        for item in items {
            let permits = permits.clone();
            let blobs = self.blobs.clone();
            let container = container.to_string();
            tasks.spawn(async move {
                let result = match permits.acquire_owned().await {
                    Ok(_permit) => blobs.upload(&container, &item.path, item.data, &item.content_type).await,
                    Err(_) => Err(PortError::Permanent("upload permits were closed".to_string())),
                };
                (item.path, result)
            });
        }

        let mut report = BatchUploadReport { total, ..Default::default() };
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(()))) => report.successful_uploads += 1,
                Ok((path, Err(e))) => {
                    warn!(container = %container, path = %path, error = %e, "Upload failed");
                    report.failed_uploads += 1;
                    report.failures.push(UploadFailure { path, error: e });
                }
                Err(e) => {
                    error!(container = %container, error = %e, "Upload task did not complete");
                    report.failed_uploads += 1;
                    report.failures.push(UploadFailure {
                        path: String::new(),
                        error: PortError::Permanent(format!("upload task failed: {}", e)),
                    });
                }
            }
        }

        info!(
            container = %container,
            total = report.total,
            successful = report.successful_uploads,
            failed = report.failed_uploads,
            "Batch upload finished"
        );
        report
    }
}
