//! One-directional space synchronization run.
//!
//! The [`SpaceSync`] orchestrates a run:
//!
//! 1. Read the source space (full or incremental, depending on the token).
//! 2. Read the destination space and refuse fresh syncs into populated spaces.
//! 3. Transform the source into destination payloads.
//! 4. Compute the destination-only model items to delete.
//! 5. Push everything in dependency-safe stages.
//! 6. Persist the next sync token (unless only the content model was synced).
//! 7. Flush the error log, whether the run succeeded or not.
//!
//! A lock flag prevents concurrent runs on the same instance.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::client::{DeliveryApi, ManagementApi};
use crate::destination::{get_transformed_destination_response, DestinationReader, GuardOptions};
use crate::diff::compute_deletions;
use crate::error_buffer::ErrorBuffer;
use crate::errors::SyncError;
use crate::push::{AssetPollConfig, PushContext, PushOptions, PushPipeline, PushReport};
use crate::rate_limit::RequestScheduler;
use crate::source::SourceReader;
use crate::token_store::TokenStore;
use crate::transform::transform;

/// Flags of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    /// Ignore any stored token and perform a full sync.
    pub fresh: bool,
    /// Allow a full sync into a destination that already has content.
    pub force_overwrite: bool,
    pub skip_content_model: bool,
    pub content_model_only: bool,
    pub skip_locales: bool,
    pub pre_publish_delay: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            fresh: false,
            force_overwrite: false,
            skip_content_model: false,
            content_model_only: false,
            skip_locales: false,
            pre_publish_delay: Duration::from_millis(5000),
        }
    }
}

impl RunOptions {
    fn guard(&self) -> GuardOptions {
        GuardOptions {
            force_overwrite: self.force_overwrite,
            skip_content_model: self.skip_content_model,
        }
    }

    fn push(&self) -> PushOptions {
        PushOptions {
            pre_publish_delay: self.pre_publish_delay,
            content_model_only: self.content_model_only,
            skip_content_model: self.skip_content_model,
            skip_locales: self.skip_locales,
        }
    }
}

/// Statistics from a single run.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub push: PushReport,
    /// Number of records in the flushed error log.
    pub error_count: usize,
    pub error_log: PathBuf,
    /// Where the next sync token was saved; `None` for content-model-only
    /// runs.
    pub token_file: Option<String>,
    pub content_model_only: bool,
    pub started_at: String,
    pub completed_at: String,
}

impl SyncReport {
    pub fn has_errors(&self) -> bool {
        self.error_count > 0
    }
}

/// Synchronizes one source space into one destination space.
pub struct SpaceSync {
    delivery: Arc<dyn DeliveryApi>,
    source: Arc<dyn ManagementApi>,
    destination: Arc<dyn ManagementApi>,
    token_store: Box<dyn TokenStore>,
    scheduler: RequestScheduler,
    error_log: PathBuf,
    options: RunOptions,
    asset_poll: AssetPollConfig,
    /// Atomic flag preventing concurrent runs.
    running: Arc<AtomicBool>,
}

impl SpaceSync {
    pub fn new(
        delivery: Arc<dyn DeliveryApi>,
        source: Arc<dyn ManagementApi>,
        destination: Arc<dyn ManagementApi>,
        token_store: Box<dyn TokenStore>,
        scheduler: RequestScheduler,
    ) -> Self {
        info!("initializing space sync");
        Self {
            delivery,
            source,
            destination,
            token_store,
            scheduler,
            error_log: PathBuf::from("space-sync-error-log.json"),
            options: RunOptions::default(),
            asset_poll: AssetPollConfig::default(),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_error_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.error_log = path.into();
        self
    }

    pub fn with_asset_poll(mut self, asset_poll: AssetPollConfig) -> Self {
        self.asset_poll = asset_poll;
        self
    }

    /// Where the run writes its error log.
    pub fn error_log(&self) -> &Path {
        &self.error_log
    }

    // -----------------------------------------------------------------------
    // Main entry point
    // -----------------------------------------------------------------------

    /// Execute one run.
    ///
    /// Per-item push failures do not fail the run; they are counted in the
    /// report and written to the error log. Fatal errors (unreachable
    /// spaces, existing content on a fresh sync) abort before anything is
    /// written to the destination. The error log is flushed in both cases.
    pub async fn run(&self) -> Result<SyncReport, SyncError> {
        let started_at = Utc::now().to_rfc3339();
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(SyncError::AlreadyRunning { started_at });
        }
        let _guard = SyncLockGuard(self.running.clone());

        let errors = ErrorBuffer::new();
        let result = self.do_run(&errors).await;

        match (result, errors.flush(&self.error_log)) {
            (Ok((push, token_file)), Ok(error_count)) => {
                let report = SyncReport {
                    push,
                    error_count,
                    error_log: self.error_log.clone(),
                    token_file,
                    content_model_only: self.options.content_model_only,
                    started_at,
                    completed_at: Utc::now().to_rfc3339(),
                };
                info!(
                    errors = report.error_count,
                    token_file = report.token_file.as_deref().unwrap_or("-"),
                    "sync run completed"
                );
                Ok(report)
            }
            (Ok(_), Err(e)) => {
                error!(error = %e, "failed to write error log");
                Err(e.into())
            }
            (Err(e), flushed) => {
                if let Err(flush_err) = flushed {
                    warn!(error = %flush_err, "failed to write error log");
                }
                error!(error = %e, "sync run failed");
                Err(e)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Inner run logic
    // -----------------------------------------------------------------------

    async fn do_run(&self, errors: &ErrorBuffer) -> Result<(PushReport, Option<String>), SyncError> {
        let options = &self.options;

        // 1. Source.
        let source = SourceReader::new(self.delivery.as_ref(), self.source.as_ref(), &self.scheduler)
            .read(self.token_store.as_ref(), options.fresh)
            .await?;

        // 2. Destination and guard.
        let destination = DestinationReader::new(self.destination.as_ref(), &self.scheduler)
            .read(&source)
            .await?;
        let destination = get_transformed_destination_response(destination, &source, &options.guard())?;

        // 3-4. Transform and diff.
        let mut space = transform(&source, &destination);
        space.deletions = compute_deletions(&space, &destination);
        info!(
            deleted_content_types = space.deletions.content_types.len(),
            deleted_locales = space.deletions.locales.len(),
            deleted_entries = space.deletions.entries.len(),
            deleted_assets = space.deletions.assets.len(),
            "computed deletions"
        );

        // 5. Push.
        let push_options = options.push();
        let pipeline = PushPipeline::new(
            self.destination.as_ref(),
            &self.scheduler,
            errors,
            self.asset_poll,
        );
        let report = pipeline
            .push(PushContext {
                space: &space,
                destination: &destination,
                options: &push_options,
            })
            .await?;

        // 6. Token.
        if options.content_model_only {
            info!("content model only, sync token not saved");
            return Ok((report, None));
        }
        let token_file = match &space.next_sync_token {
            Some(token) => {
                self.token_store.write(token)?;
                Some(self.token_store.location())
            }
            None => None,
        };
        Ok((report, token_file))
    }
}

/// RAII guard that clears the running flag on drop.
struct SyncLockGuard(Arc<AtomicBool>);

impl Drop for SyncLockGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}
