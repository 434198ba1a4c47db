//! Create/update stages for locales, content types and entries.

use futures::future::join_all;
use tracing::debug;

use super::{needs_publish, payload, Existing, PushPipeline, PushStage, StepReport};
use crate::client::PutRequest;
use crate::models::{ContentType, EntityKind, Entry, Locale, Sys, Transformed};

/// What a create stage does with one item.
pub(super) enum Planned {
    Write {
        /// ID (or locale code) used in error records.
        key: String,
        request: PutRequest,
    },
    /// Unchanged payload; `publish` holds the version to publish, if the
    /// destination copy still needs publishing.
    Keep { id: String, publish: Option<u64> },
}

impl PushPipeline<'_> {
    pub(super) async fn create_locales(
        &self,
        locales: &[Transformed<Locale>],
        existing: &Existing<'_>,
    ) -> StepReport {
        let planned = locales
            .iter()
            .filter(|l| l.change.needs_write())
            .map(|l| Planned::Write {
                key: l.transformed.code.clone(),
                request: PutRequest {
                    id: l.transformed.sys_id().map(str::to_string),
                    version: existing
                        .locales
                        .get(l.transformed.code.as_str())
                        .and_then(|sys| sys.version),
                    content_type: None,
                    body: payload(&l.transformed),
                },
            })
            .collect();
        let step = StepReport::new(PushStage::CreatingModel, "create_locales");
        let (step, _) = self.execute(EntityKind::Locale, step, planned).await;
        step
    }

    /// Returns the content types to publish with their current versions.
    pub(super) async fn create_content_types(
        &self,
        content_types: &[Transformed<ContentType>],
        existing: &Existing<'_>,
    ) -> (StepReport, Vec<(String, u64)>) {
        let planned = content_types
            .iter()
            .map(|ct| {
                let id = &ct.transformed.sys.id;
                plan(
                    ct.change.needs_write(),
                    id,
                    existing.content_types.get(id.as_str()),
                    None,
                    || payload(&ct.transformed),
                )
            })
            .collect();
        let step = StepReport::new(PushStage::CreatingModel, "create_content_types");
        self.execute(EntityKind::ContentType, step, planned).await
    }

    /// Returns the entries to publish with their current versions.
    pub(super) async fn create_entries(
        &self,
        entries: &[Transformed<Entry>],
        existing: &Existing<'_>,
    ) -> (StepReport, Vec<(String, u64)>) {
        let planned = entries
            .iter()
            .map(|e| {
                let id = &e.transformed.sys.id;
                plan(
                    e.change.needs_write(),
                    id,
                    existing.entries.get(id.as_str()),
                    e.transformed.content_type_id(),
                    || payload(&e.transformed),
                )
            })
            .collect();
        let step = StepReport::new(PushStage::CreatingEntries, "create_entries");
        self.execute(EntityKind::Entry, step, planned).await
    }

    /// Issue every planned write concurrently. Returns the step tally and the
    /// `(id, version)` pairs ready for publishing.
    pub(super) async fn execute(
        &self,
        kind: EntityKind,
        mut step: StepReport,
        planned: Vec<Planned>,
    ) -> (StepReport, Vec<(String, u64)>) {
        let mut ready = Vec::new();
        let mut writes = Vec::new();
        for item in planned {
            match item {
                Planned::Write { key, request } => writes.push((key, request)),
                Planned::Keep { id, publish } => {
                    if let Some(version) = publish {
                        ready.push((id, version));
                    }
                }
            }
        }
        if !ready.is_empty() {
            debug!(%kind, count = ready.len(), "unchanged but unpublished on destination");
        }

        let results = join_all(
            writes
                .into_iter()
                .map(move |(key, request)| async move { self.put_one(kind, &key, request).await }),
        )
        .await;
        for written in results {
            step.tally(written.is_some());
            if let Some(sys) = written {
                if let Some(version) = sys.version {
                    ready.push((sys.id, version));
                }
            }
        }
        (step, ready)
    }

    /// Create or update one entity. Retries re-read the destination version.
    pub(super) async fn put_one(&self, kind: EntityKind, key: &str, request: PutRequest) -> Option<Sys> {
        let this = self;
        self.attempt(kind, key, "put", move |attempt| {
            let mut request = request.clone();
            async move {
                if let Some(id) = request.id.clone() {
                    request.version = this
                        .current_version(kind, &id, request.version, attempt)
                        .await?;
                }
                this.management.put(kind, &request).await
            }
        })
        .await
    }
}

/// Plan one content type, entry or asset.
pub(super) fn plan(
    write: bool,
    id: &str,
    existing: Option<&&Sys>,
    content_type: Option<&str>,
    body: impl FnOnce() -> serde_json::Value,
) -> Planned {
    if write {
        Planned::Write {
            key: id.to_string(),
            request: PutRequest {
                id: Some(id.to_string()),
                version: existing.and_then(|sys| sys.version),
                content_type: content_type.map(str::to_string),
                body: body(),
            },
        }
    } else {
        Planned::Keep {
            id: id.to_string(),
            publish: needs_publish(existing)
                .then(|| existing.and_then(|sys| sys.version))
                .flatten(),
        }
    }
}
