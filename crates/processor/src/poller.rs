use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use billing_core::RunData;
use billing_core::time::{HOUR_MILLIS, month_label, now_millis};
use billing_store::{ArtifactStore, ObjectSummary, Watermarks, WorkBucket};
use chrono::NaiveDate;
use ingest::{
    BillingFileVariant, BillingKey, IngestError, PipelineOptions, parse_billing_key,
    process_billing_file,
};
use tracing::{debug, error, info, warn};

use crate::alert::{AlertOutcome, AlertSettings, check_ondemand_alert};
use crate::config::{BillingSource, ProcessorConfig};
use crate::error::{ProcessorError, Result};
use crate::reservation::amortize_run;
use crate::rollup::Archiver;
use crate::services::ProcessorServices;

/// One billing object and the source it was listed from.
#[derive(Debug, Clone)]
pub struct BillingFile {
    pub source: BillingSource,
    pub object: ObjectSummary,
    pub key: BillingKey,
}

impl BillingFile {
    fn is_with_tags(&self) -> bool {
        self.key.variant == BillingFileVariant::WithTags
    }
}

/// Files selected for one month, each list ordered by object key.
#[derive(Debug, Clone, Default)]
pub struct MonthFiles {
    pub billing: Vec<BillingFile>,
    pub monitor: Vec<BillingFile>,
}

impl MonthFiles {
    fn all(&self) -> impl Iterator<Item = &BillingFile> {
        self.billing.iter().chain(self.monitor.iter())
    }
}

/// What one poll did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PollReport {
    pub months_processed: Vec<NaiveDate>,
    pub months_skipped: Vec<NaiveDate>,
    pub months_failed: Vec<NaiveDate>,
    pub files_processed: usize,
    pub files_downloaded: usize,
    pub lines: usize,
    pub malformed: usize,
    pub dropped: usize,
    pub alert: Option<AlertOutcome>,
    pub instance_stop_requested: bool,
}

impl PollReport {
    pub fn has_new_files(&self) -> bool {
        !self.months_processed.is_empty() || !self.months_failed.is_empty()
    }
}

#[derive(Debug, Default)]
struct MonthRun {
    files: usize,
    downloaded: usize,
    lines: usize,
    malformed: usize,
    dropped: usize,
    has_tags: bool,
    end_millis: i64,
    complete: bool,
}

/// Discovers billing files, decides which months need work and drives each
/// month through ingestion, amortization, archival and alerting.
pub struct BillingProcessor {
    config: ProcessorConfig,
    services: ProcessorServices,
    artifacts: ArtifactStore,
    watermarks: Watermarks,
    start_date: NaiveDate,
    alert_settings: Option<AlertSettings>,
}

impl BillingProcessor {
    pub fn new(config: ProcessorConfig, services: ProcessorServices) -> Result<Self> {
        let start_date = config.start_date()?;
        let work = WorkBucket::new(
            services.store.clone(),
            config.work_bucket.clone(),
            config.work_prefix.clone(),
        );
        let alert_settings = AlertSettings::from_config(&config);
        Ok(Self {
            artifacts: ArtifactStore::new(work.clone()),
            watermarks: Watermarks::new(work),
            start_date,
            alert_settings,
            config,
            services,
        })
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    pub fn watermarks(&self) -> &Watermarks {
        &self.watermarks
    }

    /// Lists every configured source and groups recognized files by month.
    /// Within one source the newest object wins per month and variant.
    pub fn discover(&self) -> BTreeMap<NaiveDate, MonthFiles> {
        let with_tags = self.config.resources_enabled();
        let wanted = if with_tags {
            BillingFileVariant::WithTags
        } else {
            BillingFileVariant::Plain
        };
        let mut months: BTreeMap<NaiveDate, MonthFiles> = BTreeMap::new();
        for source in self.config.billing_sources() {
            let objects = match self.services.store.list(&source.bucket, &source.prefix) {
                Ok(objects) => objects,
                Err(err) => {
                    error!(
                        bucket = %source.bucket,
                        prefix = %source.prefix,
                        error = %err,
                        "failed to list billing files"
                    );
                    continue;
                }
            };
            let mut newest: BTreeMap<(NaiveDate, BillingFileVariant), BillingFile> =
                BTreeMap::new();
            for object in objects {
                let Some(key) = parse_billing_key(&object.key) else {
                    continue;
                };
                if key.month < self.start_date {
                    continue;
                }
                if key.variant != wanted && key.variant != BillingFileVariant::Monitor {
                    continue;
                }
                let file = BillingFile {
                    source: source.clone(),
                    object,
                    key,
                };
                let slot = (key.month, key.variant);
                let replace = newest.get(&slot).is_none_or(|current| {
                    (file.object.last_modified_millis, &file.object.key)
                        > (current.object.last_modified_millis, &current.object.key)
                });
                if replace {
                    newest.insert(slot, file);
                }
            }
            for ((month, variant), file) in newest {
                let entry = months.entry(month).or_default();
                if variant == BillingFileVariant::Monitor {
                    entry.monitor.push(file);
                } else {
                    entry.billing.push(file);
                }
            }
        }

        months.retain(|month, files| {
            if files.billing.is_empty() {
                warn!(month = %month_label(*month), "only monitor files found, skipping month");
                return false;
            }
            files.billing.sort_by(|a, b| a.object.key.cmp(&b.object.key));
            files.monitor.sort_by(|a, b| a.object.key.cmp(&b.object.key));
            true
        });
        months
    }

    /// One pass over every discovered month.
    pub fn poll(&self, cancel: &AtomicBool) -> Result<PollReport> {
        let started = Instant::now();
        let months = self.discover();
        let latest = months.keys().next_back().copied();
        let mut report = PollReport::default();

        for (month, files) in &months {
            if cancel.load(Ordering::SeqCst) {
                return Err(ProcessorError::Cancelled);
            }
            let month = *month;
            let last_processed = self.watermarks.last_process_millis(month);
            let has_new_files = files
                .all()
                .any(|file| file.object.last_modified_millis > last_processed);
            if !has_new_files {
                info!(month = %month_label(month), "data has been processed, skipping month");
                report.months_skipped.push(month);
                continue;
            }
            let is_latest = Some(month) == latest;
            self.process_month(month, files, last_processed, is_latest, cancel, &mut report)?;
        }

        if self.config.process_once {
            report.instance_stop_requested = true;
            self.stop_instance();
        }
        info!(
            processed = report.months_processed.len(),
            skipped = report.months_skipped.len(),
            failed = report.months_failed.len(),
            files = report.files_processed,
            lines = report.lines,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "billing poll finished"
        );
        Ok(report)
    }

    fn process_month(
        &self,
        month: NaiveDate,
        files: &MonthFiles,
        last_processed: i64,
        is_latest: bool,
        cancel: &AtomicBool,
        report: &mut PollReport,
    ) -> Result<()> {
        let label = month_label(month);
        let process_time = now_millis();
        let mut run = RunData::new(month);
        let start_millis = run.month_start_millis();
        let outcome = self.ingest_month(&mut run, files, last_processed, cancel)?;
        report.files_processed += outcome.files;
        report.files_downloaded += outcome.downloaded;
        report.lines += outcome.lines;
        report.malformed += outcome.malformed;
        report.dropped += outcome.dropped;
        if !outcome.complete {
            error!(month = %label, "month not fully ingested, leaving it for the next poll");
            report.months_failed.push(month);
            return Ok(());
        }

        if is_latest {
            let hours = ((outcome.end_millis - start_millis) / HOUR_MILLIS).max(0) as usize;
            info!(month = %label, hours, "cutting data to observed hours");
            run.cut_data(hours);
        }

        let owners = self.services.accounts.reservation_owners();
        amortize_run(&mut run, self.services.reservations.as_ref(), &owners)?;

        if outcome.has_tags {
            if let Some(resources) = &self.services.resources {
                resources.commit();
            }
        }

        info!(month = %label, "archiving results");
        Archiver::new(&self.artifacts, self.start_date).archive(&run)?;

        if let Err(err) = self.watermarks.set_last_process_millis(month, process_time) {
            error!(month = %label, error = %err, "failed to record process time");
        }
        report.months_processed.push(month);

        if is_latest {
            let alert = check_ondemand_alert(
                self.alert_settings.as_ref(),
                run.cost.all(),
                start_millis,
                outcome.end_millis,
                &self.watermarks,
                self.services.alerts.as_ref(),
            );
            report.alert = Some(alert);
        }
        Ok(())
    }

    fn ingest_month(
        &self,
        run: &mut RunData,
        files: &MonthFiles,
        last_processed: i64,
        cancel: &AtomicBool,
    ) -> Result<MonthRun> {
        let mut processor = self.services.line_item_processor();
        let mut outcome = MonthRun {
            end_millis: run.month_start_millis(),
            complete: true,
            ..MonthRun::default()
        };
        let jobs = files
            .billing
            .iter()
            .map(|file| (file, false))
            .chain(files.monitor.iter().map(|file| (file, true)));

        for (file, monitor) in jobs {
            if cancel.load(Ordering::SeqCst) {
                return Err(ProcessorError::Cancelled);
            }
            let key = &file.object.key;
            if file.object.last_modified_millis <= last_processed {
                debug!(key = %key, "file unchanged since last run, reprocessing with month");
            }
            let local = self.local_path(file);
            match self.services.store.download_if_changed(&file.object.bucket, key, &local) {
                Ok(true) => {
                    info!(key = %key, local = %local.display(), "downloaded billing file");
                    outcome.downloaded += 1;
                }
                Ok(false) => info!(key = %key, "billing file already downloaded"),
                Err(err) => {
                    error!(key = %key, error = %err, "failed to download billing file");
                    outcome.complete = false;
                    break;
                }
            }

            let with_tags = monitor || file.is_with_tags();
            let options = PipelineOptions {
                with_tags,
                monitor,
                cancel: Some(cancel),
            };
            info!(key = %key, with_tags, monitor, "processing billing file");
            match process_billing_file(&local, options, processor.as_mut(), run) {
                Ok(stats) => {
                    outcome.files += 1;
                    outcome.lines += stats.lines;
                    outcome.malformed += stats.malformed;
                    outcome.dropped += stats.dropped;
                    outcome.has_tags |= file.is_with_tags();
                    if let Some(end) = stats.end_millis {
                        outcome.end_millis = outcome.end_millis.max(end);
                    }
                }
                Err(IngestError::Cancelled) => return Err(ProcessorError::Cancelled),
                Err(err) => {
                    error!(key = %key, error = %err, "failed to process billing file");
                    outcome.complete = false;
                    break;
                }
            }
        }
        Ok(outcome)
    }

    // <local_dir>/<bucket>/<key without the source prefix>
    fn local_path(&self, file: &BillingFile) -> PathBuf {
        let key = file.object.key.as_str();
        let relative = key.strip_prefix(file.source.prefix.as_str()).unwrap_or(key);
        let relative = relative.trim_start_matches('/');
        let relative = if relative.is_empty() { file.object.file_name() } else { relative };
        self.config.local_dir.join(&file.object.bucket).join(relative)
    }

    fn stop_instance(&self) {
        let (Some(instance_id), Some(region)) = (
            self.config.processor_instance_id.as_deref(),
            self.config.processor_region.as_deref(),
        ) else {
            warn!(
                "process_once set without processor_instance_id and processor_region, not stopping"
            );
            return;
        };
        info!(instance_id, region, "stopping processor instance");
        if let Err(err) = self.services.lifecycle.stop(instance_id, region) {
            error!(instance_id, region, error = %err, "failed to stop processor instance");
        }
    }
}
