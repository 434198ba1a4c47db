//! Asset stage: create/update, trigger processing, wait for processing.

use std::collections::HashSet;

use futures::future::join_all;
use tracing::{debug, warn};

use super::creation::{plan, Planned};
use super::{payload, Existing, PushPipeline, PushStage, StepReport};
use crate::error_buffer::ErrorRecord;
use crate::errors::RequestInfo;
use crate::models::{Asset, EntityKind, Transformed};

/// Tallies of the asset stage.
pub(super) struct AssetSteps {
    pub create: StepReport,
    pub process: StepReport,
    pub check: StepReport,
    /// `(id, version)` pairs ready for publishing.
    pub ready: Vec<(String, u64)>,
}

impl PushPipeline<'_> {
    /// Write changed assets, process their files and wait until processing
    /// finishes.
    pub(super) async fn create_assets(
        &self,
        assets: &[Transformed<Asset>],
        existing: &Existing<'_>,
    ) -> AssetSteps {
        let mut ready = Vec::new();
        let mut writes = Vec::new();
        for asset in assets {
            let id = asset.transformed.sys.id.as_str();
            match plan(
                asset.change.needs_write(),
                id,
                existing.assets.get(id),
                None,
                || payload(&asset.transformed),
            ) {
                Planned::Write { key, request } => writes.push((asset, key, request)),
                // Unchanged assets are already processed on the destination.
                Planned::Keep { id, publish } => ready.extend(publish.map(|v| (id, v))),
            }
        }

        let mut create = StepReport::new(PushStage::ProcessingAssets, "create_assets");
        let results = join_all(writes.into_iter().map(move |(asset, key, request)| async move {
            let written = self.put_one(EntityKind::Asset, &key, request).await;
            (asset, written)
        }))
        .await;
        let mut written = Vec::new();
        for (asset, sys) in results {
            create.tally(sys.is_some());
            if let Some(version) = sys.and_then(|sys| sys.version) {
                written.push((asset, version));
            }
        }

        let (process, unprocessed) = self.process_assets(&written).await;
        written.retain(|(asset, _)| !unprocessed.contains(&asset.transformed.sys.id));
        let (check, processed) = self.check_assets(&written).await;
        ready.extend(processed);
        AssetSteps {
            create,
            process,
            check,
            ready,
        }
    }

    /// Trigger processing of every uploaded file locale of the written assets.
    /// Returns the IDs of assets with a locale that could not be processed.
    async fn process_assets(
        &self,
        written: &[(&Transformed<Asset>, u64)],
    ) -> (StepReport, HashSet<String>) {
        let mut step = StepReport::new(PushStage::ProcessingAssets, "process_assets");
        let calls: Vec<(String, u64, String)> = written
            .iter()
            .flat_map(|(asset, version)| {
                let id = asset.transformed.sys.id.clone();
                let version = *version;
                asset
                    .transformed
                    .fields
                    .file
                    .iter()
                    .filter(|(_, file)| file.upload.is_some())
                    .map(move |(locale, _)| (id.clone(), version, locale.clone()))
            })
            .collect();

        let this = self;
        let results = join_all(calls.into_iter().map(move |(id, version, locale)| async move {
            let key = id.clone();
            let processed = this
                .attempt(EntityKind::Asset, &id, "process_asset", move |attempt| {
                    let (id, locale) = (key.clone(), locale.clone());
                    async move {
                        let version = this
                            .current_version(EntityKind::Asset, &id, Some(version), attempt)
                            .await?
                            .unwrap_or(version);
                        this.management.process_asset(&id, version, &locale).await
                    }
                })
                .await
                .is_some();
            (id, processed)
        }))
        .await;
        let mut unprocessed = HashSet::new();
        for (id, ok) in results {
            step.tally(ok);
            if !ok {
                unprocessed.insert(id);
            }
        }
        (step, unprocessed)
    }

    /// Poll each written asset until every file is processed.
    async fn check_assets(
        &self,
        written: &[(&Transformed<Asset>, u64)],
    ) -> (StepReport, Vec<(String, u64)>) {
        let mut step = StepReport::new(PushStage::ProcessingAssets, "check_assets");
        let results = join_all(
            written
                .iter()
                .map(|(asset, version)| self.wait_for_processing(&asset.transformed.sys.id, *version)),
        )
        .await;
        let mut ready = Vec::new();
        for result in results {
            step.tally(result.is_some());
            ready.extend(result);
        }
        (step, ready)
    }

    /// Bounded number of checks with a doubling delay between them.
    async fn wait_for_processing(&self, id: &str, version: u64) -> Option<(String, u64)> {
        let this = self;
        let mut delay = self.asset_poll.interval;
        let attempts = self.asset_poll.attempts.max(1);
        for check in 1..=attempts {
            let key = id.to_string();
            let polled = self
                .attempt(EntityKind::Asset, id, "check_asset", move |_| {
                    let id = key.clone();
                    async move { this.management.asset(&id).await }
                })
                .await?;
            if polled.is_processed() {
                debug!(id, check, "asset processed");
                return Some((id.to_string(), polled.sys.version.unwrap_or(version)));
            }
            if check < attempts {
                tokio::time::sleep(delay).await;
                delay = delay.saturating_mul(2);
            }
        }

        warn!(id, attempts, "asset processing did not finish");
        self.errors.push(ErrorRecord {
            timestamp: chrono::Utc::now(),
            entity_kind: EntityKind::Asset,
            entity_id: id.to_string(),
            request: RequestInfo::new("GET", format!("/assets/{}", id)),
            error: format!("asset processing did not finish after {} checks", attempts),
        });
        None
    }
}
