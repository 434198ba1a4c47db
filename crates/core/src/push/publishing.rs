//! Publish stages.

use futures::future::join_all;

use super::{PushPipeline, PushStage, StepReport};
use crate::models::EntityKind;

impl PushPipeline<'_> {
    /// Publish every `(id, version)` pair concurrently.
    pub(super) async fn publish_all(
        &self,
        stage: PushStage,
        kind: EntityKind,
        targets: Vec<(String, u64)>,
    ) -> StepReport {
        let name = match kind {
            EntityKind::ContentType => "publish_content_types",
            EntityKind::Asset => "publish_assets",
            EntityKind::Entry => "publish_entries",
            EntityKind::Locale => "publish_locales",
        };
        let mut step = StepReport::new(stage, name);
        let this = self;
        let results = join_all(targets.into_iter().map(move |(id, version)| async move {
            let key = id.clone();
            this.attempt(kind, &id, "publish", move |attempt| {
                let id = key.clone();
                async move {
                    let version = this
                        .current_version(kind, &id, Some(version), attempt)
                        .await?
                        .unwrap_or(version);
                    this.management.publish(kind, &id, version).await
                }
            })
            .await
            .is_some()
        }))
        .await;
        results.into_iter().for_each(|ok| step.tally(ok));
        step
    }
}
