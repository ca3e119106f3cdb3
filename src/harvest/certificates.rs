//! Certificate PDF fan-out
//!
//! Downloads one certificate PDF per warrant record:
//! - records without an id or piece type are counted as errors, no request
//! - certificates already on disk are skipped
//! - responses must be recognizable as PDF before they are written
//! - more than one worker runs downloads through a bounded pool
//!
//! Failures never abort the batch; they are counted and reported.

use crate::client::BnmpClient;
use crate::control::Interrupt;
use crate::model::WarrantRecord;
use crate::store::HarvestStore;
use reqwest::StatusCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

/// What happened to one certificate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadOutcome {
    Downloaded,
    AlreadyStored,
    Failed,
}

/// Download counters for one batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloadStats {
    pub downloaded: u64,
    pub skipped: u64,
    pub errors: u64,
}

impl DownloadStats {
    pub fn record(&mut self, outcome: DownloadOutcome) {
        match outcome {
            DownloadOutcome::Downloaded => self.downloaded += 1,
            DownloadOutcome::AlreadyStored => self.skipped += 1,
            DownloadOutcome::Failed => self.errors += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.downloaded + self.skipped + self.errors
    }
}

impl std::ops::AddAssign for DownloadStats {
    fn add_assign(&mut self, other: Self) {
        self.downloaded += other.downloaded;
        self.skipped += other.skipped;
        self.errors += other.errors;
    }
}

/// Downloads certificate PDFs for harvested records
#[derive(Debug, Clone)]
pub struct CertificateDownloader {
    client: Arc<BnmpClient>,
    store: Arc<HarvestStore>,
    request_delay: Duration,
    workers: usize,
    interrupt: Interrupt,
}

impl CertificateDownloader {
    pub fn new(
        client: Arc<BnmpClient>,
        store: Arc<HarvestStore>,
        request_delay: Duration,
        workers: usize,
        interrupt: Interrupt,
    ) -> Self {
        Self {
            client,
            store,
            request_delay,
            workers,
            interrupt,
        }
    }

    /// Downloads the certificate for every record in the batch
    pub async fn download_for_records(&self, records: &[WarrantRecord]) -> DownloadStats {
        if records.is_empty() {
            tracing::debug!("No records, no certificates to download");
            return DownloadStats::default();
        }

        tracing::info!("Downloading certificates for {} records", records.len());

        let stats = if self.workers > 1 {
            self.download_pooled(records).await
        } else {
            self.download_sequential(records).await
        };

        tracing::info!(
            "Certificate downloads complete: {} downloaded, {} skipped, {} errors",
            stats.downloaded,
            stats.skipped,
            stats.errors
        );
        stats
    }

    async fn download_sequential(&self, records: &[WarrantRecord]) -> DownloadStats {
        let mut stats = DownloadStats::default();
        for (i, record) in records.iter().enumerate() {
            if self.interrupt.is_triggered() {
                tracing::info!("Interrupted during certificate downloads");
                break;
            }
            stats.record(self.download_one(record).await);
            if (i + 1) % 100 == 0 {
                log_progress(i as u64 + 1, records.len() as u64, &stats);
            }
        }
        stats
    }

    async fn download_pooled(&self, records: &[WarrantRecord]) -> DownloadStats {
        let mut stats = DownloadStats::default();
        let mut next = 0usize;
        let mut completed = 0u64;
        let mut join_set: JoinSet<DownloadOutcome> = JoinSet::new();

        loop {
            while join_set.len() < self.workers && next < records.len() {
                if self.interrupt.is_triggered() {
                    break;
                }
                let downloader = self.clone();
                let record = records[next].clone();
                next += 1;
                join_set.spawn(async move { downloader.download_one(&record).await });
            }

            if join_set.is_empty() {
                break;
            }

            match join_set.join_next().await {
                Some(Ok(outcome)) => stats.record(outcome),
                Some(Err(join_error)) => {
                    tracing::error!("Certificate worker panicked: {}", join_error);
                    stats.record(DownloadOutcome::Failed);
                }
                None => break,
            }
            completed += 1;
            if completed % 100 == 0 {
                log_progress(completed, records.len() as u64, &stats);
            }
        }

        stats
    }

    /// Fetches and stores one certificate; any failure becomes
    /// `DownloadOutcome::Failed`
    async fn download_one(&self, record: &WarrantRecord) -> DownloadOutcome {
        let Some(key) = record.certificate_key() else {
            tracing::debug!("Record without certificate id or piece type, skipping");
            return DownloadOutcome::Failed;
        };

        match self.store.has_certificate(key).await {
            Ok(true) => return DownloadOutcome::AlreadyStored,
            Ok(false) => {}
            Err(error) => {
                tracing::error!("Store check failed for certificate {}: {}", key.certificate_id, error);
                return DownloadOutcome::Failed;
            }
        }

        let response = match self.client.fetch_certificate(key).await {
            Ok(response) => response,
            Err(error) => {
                tracing::warn!("Certificate {} request failed: {}", key.certificate_id, error);
                return DownloadOutcome::Failed;
            }
        };

        let status = response.status();
        if status != StatusCode::OK {
            tracing::warn!(
                "Certificate {} returned HTTP {}",
                key.certificate_id,
                status.as_u16()
            );
            return DownloadOutcome::Failed;
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_owned();

        let bytes = match response.bytes().await {
            Ok(bytes) => bytes,
            Err(error) => {
                tracing::warn!("Certificate {} body read failed: {}", key.certificate_id, error);
                return DownloadOutcome::Failed;
            }
        };

        if !looks_like_pdf(&content_type, &bytes) {
            tracing::warn!(
                "Certificate {} is not a PDF (content-type {:?}), discarding",
                key.certificate_id,
                content_type
            );
            return DownloadOutcome::Failed;
        }

        if let Err(error) = self.store.save_certificate(key, &bytes).await {
            tracing::error!("Certificate {} write failed: {}", key.certificate_id, error);
            return DownloadOutcome::Failed;
        }

        tokio::time::sleep(self.request_delay).await;
        DownloadOutcome::Downloaded
    }
}

fn log_progress(done: u64, total: u64, stats: &DownloadStats) {
    tracing::info!(
        "Progress: {}/{} (downloaded: {}, skipped: {}, errors: {})",
        done,
        total,
        stats.downloaded,
        stats.skipped,
        stats.errors
    );
}

/// A response counts as a PDF when the content type says so or the body
/// starts with the PDF magic
fn looks_like_pdf(content_type: &str, body: &[u8]) -> bool {
    content_type.to_ascii_lowercase().contains("pdf") || body.starts_with(b"%PDF")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_looks_like_pdf_by_content_type() {
        assert!(looks_like_pdf("application/pdf", b""));
        assert!(looks_like_pdf("Application/PDF; charset=binary", b""));
    }

    #[test]
    fn test_looks_like_pdf_by_magic() {
        assert!(looks_like_pdf("text/html", b"%PDF-1.7 ..."));
    }

    #[test]
    fn test_looks_like_pdf_rejects_html() {
        assert!(!looks_like_pdf("text/html", b"<html>session expired</html>"));
        assert!(!looks_like_pdf("", b""));
    }

    #[test]
    fn test_stats_record_and_merge() {
        let mut stats = DownloadStats::default();
        stats.record(DownloadOutcome::Downloaded);
        stats.record(DownloadOutcome::Downloaded);
        stats.record(DownloadOutcome::AlreadyStored);
        stats.record(DownloadOutcome::Failed);
        assert_eq!(stats.downloaded, 2);
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.total(), 4);

        let mut merged = DownloadStats::default();
        merged += stats;
        merged += DownloadStats {
            downloaded: 1,
            skipped: 0,
            errors: 2,
        };
        assert_eq!(merged.downloaded, 3);
        assert_eq!(merged.errors, 3);
        assert_eq!(merged.total(), 7);
    }
}
