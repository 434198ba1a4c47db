//! Deletion stages: destination-only locales and content types, and the
//! entries and assets deleted on the source.

use std::collections::HashMap;

use futures::future::join_all;
use tracing::{debug, warn};

use super::{PushPipeline, PushStage, StepReport};
use crate::models::{ContentType, EntityKind, Locale, SpaceSnapshot, Sys};

impl PushPipeline<'_> {
    /// Delete locales missing from the source. The destination default
    /// locale cannot be deleted and is left in place.
    pub(super) async fn delete_locales(
        &self,
        locales: &[Locale],
        destination: &SpaceSnapshot,
    ) -> StepReport {
        let default_code = destination.default_locale().map(|l| l.code.as_str());
        let targets: Vec<&Sys> = locales
            .iter()
            .filter(|l| {
                let is_default = l.default || Some(l.code.as_str()) == default_code;
                if is_default {
                    warn!(code = %l.code, "not deleting the destination default locale");
                }
                !is_default
            })
            .filter_map(|l| l.sys.as_ref())
            .collect();

        let mut step = StepReport::new(PushStage::DeletingModel, "delete_locales");
        let results = join_all(
            targets
                .iter()
                .map(|sys| self.unpublish_and_delete(EntityKind::Locale, sys)),
        )
        .await;
        results.into_iter().for_each(|ok| step.tally(ok));
        step
    }

    /// Unpublish and delete content types missing from the source.
    pub(super) async fn delete_content_types(&self, content_types: &[ContentType]) -> StepReport {
        let mut step = StepReport::new(PushStage::DeletingModel, "delete_content_types");
        let results = join_all(
            content_types
                .iter()
                .map(|ct| self.unpublish_and_delete(EntityKind::ContentType, &ct.sys)),
        )
        .await;
        results.into_iter().for_each(|ok| step.tally(ok));
        step
    }

    /// Unpublish and delete the entries or assets reported deleted by the
    /// source feed. IDs the destination does not hold are skipped.
    pub(super) async fn delete_content(
        &self,
        kind: EntityKind,
        deleted: &[Sys],
        existing: &HashMap<&str, &Sys>,
    ) -> StepReport {
        let name = match kind {
            EntityKind::Asset => "delete_assets",
            _ => "delete_entries",
        };
        let mut step = StepReport::new(PushStage::DeletingContent, name);
        let targets: Vec<&Sys> = deleted
            .iter()
            .filter_map(|sys| {
                let found = existing.get(sys.id.as_str()).copied();
                if found.is_none() {
                    debug!(%kind, id = %sys.id, "already absent on destination");
                }
                found
            })
            .collect();
        let results = join_all(
            targets
                .iter()
                .map(|sys| self.unpublish_and_delete(kind, sys)),
        )
        .await;
        results.into_iter().for_each(|ok| step.tally(ok));
        step
    }

    /// Unpublish `sys` if it is published, then delete it.
    async fn unpublish_and_delete(&self, kind: EntityKind, sys: &Sys) -> bool {
        let this = self;
        let id = sys.id.clone();
        let mut version = sys.version;

        if sys.is_published() {
            let known = sys.version;
            let key = id.clone();
            let unpublished = self
                .attempt(kind, &id, "unpublish", move |attempt| {
                    let id = key.clone();
                    async move {
                        let version = this
                            .current_version(kind, &id, known, attempt)
                            .await?
                            .unwrap_or_default();
                        this.management.unpublish(kind, &id, version).await
                    }
                })
                .await;
            match unpublished {
                Some(sys) => version = sys.version.or(version),
                None => return false,
            }
        }

        let key = id.clone();
        self.attempt(kind, &id, "delete", move |attempt| {
            let id = key.clone();
            async move {
                let version = this.current_version(kind, &id, version, attempt).await?;
                this.management.delete(kind, &id, version).await
            }
        })
        .await
        .is_some()
    }
}
