//! Applying a transformed space to the destination.
//!
//! The [`PushPipeline`] runs a fixed sequence of stages. Each stage is a
//! barrier: every request of a stage (retries included) settles before the
//! next one starts. Inside a stage all items are issued concurrently and are
//! throttled only by the shared [`RequestScheduler`].
//!
//! A failing item never fails the push. Its error is recorded in the
//! [`ErrorBuffer`] and the remaining items and stages continue.

mod assets;
mod creation;
mod deletion;
mod publishing;

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::client::ManagementApi;
use crate::error_buffer::ErrorBuffer;
use crate::errors::{ApiError, SyncError};
use crate::models::{EntityKind, SpaceSnapshot, Sys, TransformedSpace};
use crate::rate_limit::RequestScheduler;

// ---------------------------------------------------------------------------
// Push state machine
// ---------------------------------------------------------------------------

/// Stages of a push.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PushStage {
    Idle,
    DeletingModel,
    DeletingContent,
    CreatingModel,
    PublishingModel,
    ProcessingAssets,
    PublishingAssets,
    CreatingEntries,
    PrePublishWait,
    PublishingEntries,
    Done,
}

impl PushStage {
    /// Whether `next` may directly follow `self`.
    pub fn can_transition_to(&self, next: PushStage) -> bool {
        use PushStage::*;
        matches!(
            (self, next),
            (Idle, DeletingModel)
                | (DeletingModel, DeletingContent)
                | (DeletingContent, CreatingModel)
                | (CreatingModel, PublishingModel)
                | (PublishingModel, ProcessingAssets)
                | (PublishingModel, Done)
                | (ProcessingAssets, PublishingAssets)
                | (PublishingAssets, CreatingEntries)
                | (CreatingEntries, PrePublishWait)
                | (PrePublishWait, PublishingEntries)
                | (PublishingEntries, Done)
        )
    }
}

impl std::fmt::Display for PushStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::DeletingModel => write!(f, "deleting_model"),
            Self::DeletingContent => write!(f, "deleting_content"),
            Self::CreatingModel => write!(f, "creating_model"),
            Self::PublishingModel => write!(f, "publishing_model"),
            Self::ProcessingAssets => write!(f, "processing_assets"),
            Self::PublishingAssets => write!(f, "publishing_assets"),
            Self::CreatingEntries => write!(f, "creating_entries"),
            Self::PrePublishWait => write!(f, "pre_publish_wait"),
            Self::PublishingEntries => write!(f, "publishing_entries"),
            Self::Done => write!(f, "done"),
        }
    }
}

/// Outcome of one step (one operation over one entity kind).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepReport {
    pub stage: PushStage,
    pub step: &'static str,
    pub succeeded: usize,
    pub failed: usize,
}

impl StepReport {
    fn new(stage: PushStage, step: &'static str) -> Self {
        Self {
            stage,
            step,
            succeeded: 0,
            failed: 0,
        }
    }

    fn tally(&mut self, ok: bool) {
        if ok {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
    }
}

/// Statistics from a single push.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PushReport {
    /// Every stage entered, in order, starting after `Idle`.
    pub trail: Vec<PushStage>,
    pub steps: Vec<StepReport>,
}

impl PushReport {
    pub fn step(&self, name: &str) -> Option<&StepReport> {
        self.steps.iter().find(|s| s.step == name)
    }

    pub fn succeeded(&self) -> usize {
        self.steps.iter().map(|s| s.succeeded).sum()
    }

    pub fn failed(&self) -> usize {
        self.steps.iter().map(|s| s.failed).sum()
    }
}

struct StageTracker {
    current: PushStage,
    report: PushReport,
}

impl StageTracker {
    fn new() -> Self {
        Self {
            current: PushStage::Idle,
            report: PushReport::default(),
        }
    }

    fn advance(&mut self, next: PushStage) -> Result<(), SyncError> {
        if !self.current.can_transition_to(next) {
            return Err(SyncError::InvalidStateTransition {
                from: self.current.to_string(),
                to: next.to_string(),
            });
        }
        info!(from = %self.current, to = %next, "push stage");
        self.current = next;
        self.report.trail.push(next);
        Ok(())
    }

    fn record(&mut self, step: StepReport) {
        if step.succeeded + step.failed > 0 {
            info!(
                stage = %step.stage,
                step = step.step,
                succeeded = step.succeeded,
                failed = step.failed,
                "push step finished"
            );
        }
        self.report.steps.push(step);
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Flags shaping a push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushOptions {
    /// Wait between creating and publishing entries.
    pub pre_publish_delay: Duration,
    pub content_model_only: bool,
    pub skip_content_model: bool,
    pub skip_locales: bool,
}

impl Default for PushOptions {
    fn default() -> Self {
        Self {
            pre_publish_delay: Duration::from_millis(5000),
            content_model_only: false,
            skip_content_model: false,
            skip_locales: false,
        }
    }
}

/// Bounded polling of asset processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssetPollConfig {
    pub attempts: u32,
    /// Delay before the first re-check; doubled after every check.
    pub interval: Duration,
}

impl Default for AssetPollConfig {
    fn default() -> Self {
        Self {
            attempts: 10,
            interval: Duration::from_millis(1000),
        }
    }
}

/// Input of one push.
pub struct PushContext<'a> {
    /// Source content with [`TransformedSpace::deletions`] filled in.
    pub space: &'a TransformedSpace,
    /// The guarded destination snapshot the transformation ran against.
    pub destination: &'a SpaceSnapshot,
    pub options: &'a PushOptions,
}

/// Applies a [`TransformedSpace`] to the destination.
pub struct PushPipeline<'a> {
    management: &'a dyn ManagementApi,
    scheduler: &'a RequestScheduler,
    errors: &'a ErrorBuffer,
    asset_poll: AssetPollConfig,
}

impl<'a> PushPipeline<'a> {
    pub fn new(
        management: &'a dyn ManagementApi,
        scheduler: &'a RequestScheduler,
        errors: &'a ErrorBuffer,
        asset_poll: AssetPollConfig,
    ) -> Self {
        Self {
            management,
            scheduler,
            errors,
            asset_poll,
        }
    }

    /// Run every stage. Per-item failures end up in the error buffer; only a
    /// broken stage sequence is returned as an error.
    pub async fn push(&self, ctx: PushContext<'_>) -> Result<PushReport, SyncError> {
        let PushContext {
            space,
            destination,
            options,
        } = ctx;
        let existing = Existing::index(destination);
        let model = !options.skip_content_model;
        let locales = model && !options.skip_locales;
        let mut tracker = StageTracker::new();

        tracker.advance(PushStage::DeletingModel)?;
        if locales {
            let step = self
                .delete_locales(&space.deletions.locales, destination)
                .await;
            tracker.record(step);
        }
        if model {
            let step = self
                .delete_content_types(&space.deletions.content_types)
                .await;
            tracker.record(step);
        }

        tracker.advance(PushStage::DeletingContent)?;
        if !options.content_model_only {
            let step = self
                .delete_content(EntityKind::Entry, &space.deletions.entries, &existing.entries)
                .await;
            tracker.record(step);
            let step = self
                .delete_content(EntityKind::Asset, &space.deletions.assets, &existing.assets)
                .await;
            tracker.record(step);
        }

        tracker.advance(PushStage::CreatingModel)?;
        let mut publish_types = Vec::new();
        if locales {
            let step = self.create_locales(&space.locales, &existing).await;
            tracker.record(step);
        }
        if model {
            let (step, ready) = self
                .create_content_types(&space.content_types, &existing)
                .await;
            tracker.record(step);
            publish_types = ready;
        }

        tracker.advance(PushStage::PublishingModel)?;
        if model {
            let step = self
                .publish_all(PushStage::PublishingModel, EntityKind::ContentType, publish_types)
                .await;
            tracker.record(step);
        }

        if options.content_model_only {
            info!("content model only, skipping content");
            tracker.advance(PushStage::Done)?;
            return Ok(tracker.report);
        }

        tracker.advance(PushStage::ProcessingAssets)?;
        let assets = self.create_assets(&space.assets, &existing).await;
        tracker.record(assets.create);
        tracker.record(assets.process);
        tracker.record(assets.check);

        tracker.advance(PushStage::PublishingAssets)?;
        let step = self
            .publish_all(PushStage::PublishingAssets, EntityKind::Asset, assets.ready)
            .await;
        tracker.record(step);

        tracker.advance(PushStage::CreatingEntries)?;
        let (step, publish_entries) = self.create_entries(&space.entries, &existing).await;
        tracker.record(step);

        tracker.advance(PushStage::PrePublishWait)?;
        if !publish_entries.is_empty() && !options.pre_publish_delay.is_zero() {
            debug!(
                delay_ms = options.pre_publish_delay.as_millis() as u64,
                "waiting before publishing entries"
            );
            tokio::time::sleep(options.pre_publish_delay).await;
        }

        tracker.advance(PushStage::PublishingEntries)?;
        let step = self
            .publish_all(PushStage::PublishingEntries, EntityKind::Entry, publish_entries)
            .await;
        tracker.record(step);

        tracker.advance(PushStage::Done)?;
        info!(
            succeeded = tracker.report.succeeded(),
            failed = tracker.report.failed(),
            "push completed"
        );
        Ok(tracker.report)
    }

    // -----------------------------------------------------------------------
    // Shared helpers
    // -----------------------------------------------------------------------

    /// Run one scheduled item operation, recording its final failure.
    async fn attempt<T, F, Fut>(&self, kind: EntityKind, id: &str, label: &str, op: F) -> Option<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        match self.scheduler.call(label, op).await {
            Ok(value) => Some(value),
            Err(e) => {
                self.errors.record(kind, id, &e);
                None
            }
        }
    }

    /// The version to send on `attempt`. Retries re-read the destination so
    /// a version conflict is not repeated. A create whose first write landed
    /// before the failure picks up the version that write produced.
    async fn current_version(
        &self,
        kind: EntityKind,
        id: &str,
        known: Option<u64>,
        attempt: u32,
    ) -> Result<Option<u64>, ApiError> {
        if attempt == 0 {
            return Ok(known);
        }
        self.scheduler.acquire().await;
        let fresh = self.management.fetch_sys(kind, id).await?;
        let version = fresh.and_then(|sys| sys.version).or(known);
        debug!(%kind, id, ?version, "re-read destination version");
        Ok(version)
    }
}

/// Destination system metadata keyed for lookups during the push.
struct Existing<'a> {
    locales: HashMap<&'a str, &'a Sys>,
    content_types: HashMap<&'a str, &'a Sys>,
    entries: HashMap<&'a str, &'a Sys>,
    assets: HashMap<&'a str, &'a Sys>,
}

impl<'a> Existing<'a> {
    fn index(destination: &'a SpaceSnapshot) -> Self {
        Self {
            locales: destination
                .locales
                .iter()
                .filter_map(|l| l.sys.as_ref().map(|sys| (l.code.as_str(), sys)))
                .collect(),
            content_types: destination
                .content_types
                .iter()
                .map(|ct| (ct.sys.id.as_str(), &ct.sys))
                .collect(),
            entries: destination
                .entries
                .iter()
                .map(|e| (e.sys.id.as_str(), &e.sys))
                .collect(),
            assets: destination
                .assets
                .iter()
                .map(|a| (a.sys.id.as_str(), &a.sys))
                .collect(),
        }
    }
}

/// Whether an existing destination entity still needs a publish even though
/// its payload is unchanged.
fn needs_publish(existing: Option<&&Sys>) -> bool {
    match existing {
        Some(sys) => !sys.is_published() || sys.has_pending_changes(),
        None => true,
    }
}

/// The write body of an entity: its JSON without `sys`.
fn payload<T: Serialize>(entity: &T) -> Value {
    match serde_json::to_value(entity) {
        Ok(Value::Object(mut map)) => {
            map.remove("sys");
            Value::Object(map)
        }
        Ok(other) => other,
        Err(_) => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ContentType, Locale};

    #[test]
    fn test_stage_display() {
        assert_eq!(PushStage::DeletingModel.to_string(), "deleting_model");
        assert_eq!(PushStage::PrePublishWait.to_string(), "pre_publish_wait");
    }

    #[test]
    fn test_stage_transitions() {
        assert!(PushStage::Idle.can_transition_to(PushStage::DeletingModel));
        assert!(PushStage::PublishingModel.can_transition_to(PushStage::Done));
        assert!(PushStage::PublishingModel.can_transition_to(PushStage::ProcessingAssets));
        assert!(!PushStage::Idle.can_transition_to(PushStage::CreatingModel));
        assert!(!PushStage::CreatingEntries.can_transition_to(PushStage::PublishingEntries));
        assert!(!PushStage::Done.can_transition_to(PushStage::Idle));
    }

    #[test]
    fn test_tracker_rejects_skipped_stage() {
        let mut tracker = StageTracker::new();
        tracker.advance(PushStage::DeletingModel).unwrap();
        let err = tracker.advance(PushStage::PublishingEntries).unwrap_err();
        assert!(matches!(err, SyncError::InvalidStateTransition { .. }));
        assert_eq!(tracker.report.trail, vec![PushStage::DeletingModel]);
    }

    #[test]
    fn test_payload_strips_sys() {
        let ct = ContentType {
            sys: Sys::new("post"),
            name: "Post".into(),
            description: None,
            display_field: Some("title".into()),
            fields: vec![],
        };
        let body = payload(&ct);
        assert!(body.get("sys").is_none());
        assert_eq!(body["name"], "Post");
        assert_eq!(body["displayField"], "title");
    }

    #[test]
    fn test_locale_payload_has_no_default() {
        let locale = Locale {
            sys: Some(Sys::new("l1")),
            code: "en-GB".into(),
            name: "English (UK)".into(),
            default: true,
            fallback_code: Some("en-US".into()),
            optional: true,
            content_delivery_api: true,
            content_management_api: true,
        };
        let body = payload(&locale);
        assert!(body.get("default").is_none());
        assert!(body.get("sys").is_none());
        assert_eq!(body["fallbackCode"], "en-US");
    }

    #[test]
    fn test_needs_publish() {
        let mut sys = Sys::new("x");
        assert!(needs_publish(None));
        assert!(needs_publish(Some(&&sys)));
        sys.version = Some(2);
        sys.published_version = Some(1);
        assert!(!needs_publish(Some(&&sys)));
        sys.version = Some(5);
        assert!(needs_publish(Some(&&sys)));
    }

    #[test]
    fn test_report_totals() {
        let mut report = PushReport::default();
        let mut step = StepReport::new(PushStage::CreatingEntries, "create_entries");
        step.tally(true);
        step.tally(false);
        step.tally(true);
        report.steps.push(step);
        assert_eq!(report.succeeded(), 2);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.step("create_entries").map(|s| s.failed), Some(1));
        assert!(report.step("publish_entries").is_none());
    }
}
