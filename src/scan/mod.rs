//! Workspace scan engine ("agent-mode analyzer").
//!
//! At most one scan runs per process. The engine walks the workspace,
//! analyzes each supported file through the code-analysis collaborator,
//! optionally asks the active model for insights, and streams
//! progress/issue/completion events over the bus. Cancellation is
//! cooperative and checked between files.

use crate::{
    analysis::{CodeAnalysis, IssueSeverity},
    config::ScanConfig,
    events::{EventBus, SystemEvent},
    provider::{ModelClient, ModelRequest},
    AssistError, Result,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanStatus {
    NotStarted,
    Running,
    Completed,
    Cancelled,
    Failed,
}

/// One issue found in the workspace, attributed to a file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub id: Uuid,
    pub file_path: String,
    pub line: Option<usize>,
    pub severity: IssueSeverity,
    pub category: String,
    pub message: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub title: String,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanReport {
    pub id: Uuid,
    pub workspace_path: String,
    pub start_time: Option<chrono::DateTime<chrono::Utc>>,
    pub end_time: Option<chrono::DateTime<chrono::Utc>>,
    pub status: ScanStatus,
    pub total_files: usize,
    pub files_analyzed: usize,
    pub findings: Vec<Finding>,
    pub recommendations: Vec<Recommendation>,
    pub statistics: HashMap<String, f64>,
}

impl ScanReport {
    fn empty() -> Self {
        Self {
            id: Uuid::new_v4(),
            workspace_path: String::new(),
            start_time: None,
            end_time: None,
            status: ScanStatus::NotStarted,
            total_files: 0,
            files_analyzed: 0,
            findings: Vec::new(),
            recommendations: Vec::new(),
            statistics: HashMap::new(),
        }
    }
}

pub struct ScanEngine {
    config: ScanConfig,
    analysis: Arc<dyn CodeAnalysis>,
    provider: Option<Arc<ModelClient>>,
    bus: EventBus,
    report: Mutex<ScanReport>,
    running: AtomicBool,
    cancel: Mutex<Option<CancellationToken>>,
}

impl ScanEngine {
    pub fn new(
        config: ScanConfig,
        analysis: Arc<dyn CodeAnalysis>,
        provider: Option<Arc<ModelClient>>,
        bus: EventBus,
    ) -> Self {
        Self {
            config,
            analysis,
            provider,
            bus,
            report: Mutex::new(ScanReport::empty()),
            running: AtomicBool::new(false),
            cancel: Mutex::new(None),
        }
    }

    /// Start a workspace scan.
    ///
    /// Returns `Ok(false)` without touching the live report when a scan is
    /// already running. Missing or non-directory paths are rejected with
    /// `InvalidArgument`.
    pub async fn start(self: &Arc<Self>, path: &Path) -> Result<bool> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Scan requested while one is already running");
            return Ok(false);
        }

        let metadata = match tokio::fs::metadata(path).await {
            Ok(metadata) => metadata,
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(AssistError::InvalidArgument(format!(
                    "workspace path '{}' is not accessible: {e}",
                    path.display()
                )));
            }
        };
        if !metadata.is_dir() {
            self.running.store(false, Ordering::SeqCst);
            return Err(AssistError::InvalidArgument(format!(
                "workspace path '{}' is not a directory",
                path.display()
            )));
        }

        let cancel = CancellationToken::new();
        {
            let mut slot = self.cancel.lock().await;
            *slot = Some(cancel.clone());
        }
        {
            let mut report = self.report.lock().await;
            *report = ScanReport {
                id: Uuid::new_v4(),
                workspace_path: path.display().to_string(),
                start_time: Some(chrono::Utc::now()),
                status: ScanStatus::Running,
                ..ScanReport::empty()
            };
        }

        info!("Starting workspace scan of {}", path.display());
        let engine = Arc::clone(self);
        let workspace = path.to_path_buf();
        tokio::spawn(async move {
            engine.run_scan(workspace, cancel).await;
        });
        Ok(true)
    }

    /// Signal cooperative cancellation. Returns whether a scan was running.
    pub async fn stop(&self) -> bool {
        if !self.running.load(Ordering::SeqCst) {
            return false;
        }
        if let Some(cancel) = self.cancel.lock().await.as_ref() {
            info!("Stopping workspace scan");
            cancel.cancel();
            true
        } else {
            false
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Snapshot of the live report.
    pub async fn report(&self) -> ScanReport {
        self.report.lock().await.clone()
    }

    async fn run_scan(self: Arc<Self>, workspace: PathBuf, cancel: CancellationToken) {
        let started = Instant::now();
        let outcome = self.scan_files(&workspace, &cancel, started).await;

        let (report_id, success, cancelled, error, status) = {
            let mut report = self.report.lock().await;
            report.end_time = Some(chrono::Utc::now());

            let (status, error) = match &outcome {
                Ok(()) if cancel.is_cancelled() => (ScanStatus::Cancelled, None),
                Ok(()) => (ScanStatus::Completed, None),
                Err(e) => (ScanStatus::Failed, Some(e.to_string())),
            };
            report.status = status;

            Self::finalize_statistics(&mut report, started.elapsed());
            Self::synthesize_recommendations(&mut report);

            (
                report.id,
                status == ScanStatus::Completed,
                status == ScanStatus::Cancelled,
                error,
                status,
            )
        };

        self.running.store(false, Ordering::SeqCst);
        {
            let mut slot = self.cancel.lock().await;
            *slot = None;
        }

        info!(
            "Workspace scan finished with status {:?} in {:?}",
            status,
            started.elapsed()
        );
        self.bus.publish(SystemEvent::ScanCompleted {
            report_id,
            success,
            cancelled,
            error,
            duration_ms: started.elapsed().as_millis() as u64,
        });
    }

    async fn scan_files(
        &self,
        workspace: &Path,
        cancel: &CancellationToken,
        started: Instant,
    ) -> Result<()> {
        let files = self.enumerate(workspace).await?;
        let total = files.len();
        {
            let mut report = self.report.lock().await;
            report.total_files = total;
        }
        debug!("Scan enumerated {} supported files", total);

        let insights_enabled = self.config.request_ai_insights
            && match &self.provider {
                Some(provider) => provider.get_active().await.is_some(),
                None => false,
            };

        let mut last_yield = Instant::now();
        for (index, file) in files.iter().enumerate() {
            if cancel.is_cancelled() {
                debug!("Scan cancelled after {} files", index);
                return Ok(());
            }

            if let Err(e) = self.analyze_file(file, insights_enabled).await {
                warn!("Skipping {}: {}", file.display(), e);
                let mut report = self.report.lock().await;
                *report.statistics.entry("files_skipped".to_string()).or_insert(0.0) += 1.0;
            }

            let analyzed = index + 1;
            let percent = analyzed as f64 / total as f64 * 100.0;
            let elapsed = started.elapsed();
            let eta_ms = if analyzed > 0 {
                (elapsed.as_millis() as f64 / analyzed as f64 * (total - analyzed) as f64) as u64
            } else {
                0
            };

            {
                let mut report = self.report.lock().await;
                report.files_analyzed = analyzed;
            }
            self.bus.publish(SystemEvent::ScanProgress {
                current: analyzed,
                total,
                percent,
                eta_ms,
                message: format!("Analyzed {}", file.display()),
            });

            // Stay cooperative inside long directory sweeps.
            if last_yield.elapsed().as_millis() as u64
                >= self.config.yield_interval.as_millis() as u64
            {
                tokio::task::yield_now().await;
                last_yield = Instant::now();
            }
        }
        Ok(())
    }

    async fn analyze_file(&self, file: &Path, insights_enabled: bool) -> Result<()> {
        let content = tokio::fs::read_to_string(file)
            .await
            .map_err(|e| AssistError::Transient {
                message: format!("read failed: {e}"),
            })?;
        if content.trim().is_empty() {
            return Ok(());
        }

        let file_name = file.to_string_lossy().to_string();
        let language = self
            .analysis
            .detect_language(&content, Some(&file_name))
            .await;
        let issues = self.analysis.analyze_code(&content, &language).await?;

        for issue in issues {
            let finding = Finding {
                id: Uuid::new_v4(),
                file_path: file_name.clone(),
                line: issue.line,
                severity: issue.severity,
                category: issue.category,
                message: issue.message,
                confidence: issue.confidence,
            };
            {
                let mut report = self.report.lock().await;
                report.findings.push(finding.clone());
            }
            self.bus.publish(SystemEvent::ScanIssueFound {
                finding,
                file_path: file_name.clone(),
            });
        }

        if insights_enabled {
            self.request_insight(&file_name, &language, &content).await;
        }
        Ok(())
    }

    /// Ask the active model for an improvement suggestion. Provider
    /// failures never fail the scan; they are counted in the statistics.
    async fn request_insight(&self, file_name: &str, language: &str, content: &str) {
        let provider = match &self.provider {
            Some(provider) => provider,
            None => return,
        };

        let snippet: String = content.chars().take(2_000).collect();
        let request = ModelRequest::new(format!(
            "Review this {language} file and suggest at most one concrete improvement.\n\
             File: {file_name}\n\n{snippet}"
        ))
        .with_system("You are a senior code reviewer. Answer in one short paragraph.");

        match provider.send_request(&request).await {
            Ok(response) if response.success => {
                if let Some(text) = response.content {
                    let mut report = self.report.lock().await;
                    report.recommendations.push(Recommendation {
                        title: format!("Model insight for {file_name}"),
                        detail: text,
                    });
                }
            }
            Ok(response) => {
                warn!(
                    "AI insight for {} failed: {}",
                    file_name,
                    response.error.unwrap_or_default()
                );
                let mut report = self.report.lock().await;
                *report
                    .statistics
                    .entry("insight_failures".to_string())
                    .or_insert(0.0) += 1.0;
            }
            Err(e) => {
                warn!("AI insight for {} failed: {}", file_name, e);
                let mut report = self.report.lock().await;
                *report
                    .statistics
                    .entry("insight_failures".to_string())
                    .or_insert(0.0) += 1.0;
            }
        }
    }

    /// Recursive enumeration, filtered to supported extensions and the
    /// configured size cap. Paths are sorted for deterministic ordering.
    async fn enumerate(&self, workspace: &Path) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        let mut pending = vec![workspace.to_path_buf()];

        while let Some(dir) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir).await.map_err(|e| {
                AssistError::Transient {
                    message: format!("cannot read directory {}: {e}", dir.display()),
                }
            })?;

            while let Some(entry) = entries.next_entry().await.map_err(|e| {
                AssistError::Transient {
                    message: format!("directory iteration failed: {e}"),
                }
            })? {
                let path = entry.path();
                let file_type = match entry.file_type().await {
                    Ok(t) => t,
                    Err(_) => continue,
                };

                if file_type.is_dir() {
                    pending.push(path);
                } else if file_type.is_file() && self.is_supported(&path) {
                    if let Ok(metadata) = entry.metadata().await {
                        if metadata.len() <= self.config.max_file_bytes {
                            files.push(path);
                        } else {
                            debug!("Skipping oversized file {}", path.display());
                        }
                    }
                }
            }
        }

        files.sort();
        Ok(files)
    }

    fn is_supported(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|ext| {
                self.config
                    .supported_extensions
                    .iter()
                    .any(|s| s.eq_ignore_ascii_case(ext))
            })
            .unwrap_or(false)
    }

    fn finalize_statistics(report: &mut ScanReport, duration: std::time::Duration) {
        report
            .statistics
            .insert("duration_ms".to_string(), duration.as_millis() as f64);
        report
            .statistics
            .insert("total_files".to_string(), report.total_files as f64);
        report
            .statistics
            .insert("files_analyzed".to_string(), report.files_analyzed as f64);
        report
            .statistics
            .insert("total_findings".to_string(), report.findings.len() as f64);

        let mut by_severity: HashMap<&str, f64> = HashMap::new();
        let mut by_category: HashMap<String, f64> = HashMap::new();
        for finding in &report.findings {
            *by_severity.entry(finding.severity.as_str()).or_insert(0.0) += 1.0;
            *by_category.entry(finding.category.clone()).or_insert(0.0) += 1.0;
        }
        for (severity, count) in by_severity {
            report
                .statistics
                .insert(format!("severity_{}", severity.to_lowercase()), count);
        }
        for (category, count) in by_category {
            report.statistics.insert(format!("category_{category}"), count);
        }
    }

    fn synthesize_recommendations(report: &mut ScanReport) {
        let security_count = report
            .findings
            .iter()
            .filter(|f| f.category == "SecurityIssue")
            .count();
        if security_count > 0 {
            report.recommendations.push(Recommendation {
                title: "Security Review Required".to_string(),
                detail: format!(
                    "{security_count} security finding(s) were reported; schedule a focused review."
                ),
            });
        }

        let perf_count = report
            .findings
            .iter()
            .filter(|f| f.category == "PerformanceIssue")
            .count();
        if perf_count > crate::constants::SCAN_PERF_RECOMMENDATION_THRESHOLD {
            report.recommendations.push(Recommendation {
                title: "Performance Optimization".to_string(),
                detail: format!(
                    "{perf_count} performance findings suggest a broader optimization pass."
                ),
            });
        }
    }
}
