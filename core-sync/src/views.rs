//! # View Maintenance
//!
//! Reconciles the remote server's library sections ("views") with what the
//! local mirror has recorded, before any item sync runs.
//!
//! New views get a local tag and generated list artifacts. A renamed view
//! keeps its items but is retagged by the store, and its artifacts are
//! recreated under the new name; the old artifacts are only removed when no
//! other stored view still uses that name. A view that disappeared from the
//! server cascades: every mirrored item in it is removed through the
//! category stores, then the view record and its artifacts go.

use tracing::{debug, info, warn};

use bridge_traits::{Fetched, MediaKind, RemoteView, StoredView};
use core_runtime::SyncEvent;

use crate::context::SyncContext;
use crate::error::{Result, SyncError};

/// Section kinds the engine mirrors. Everything else (e.g. photo timelines
/// on servers that report extra section types) is ignored.
const TRACKED_KINDS: [MediaKind; 4] = [
    MediaKind::Movie,
    MediaKind::Show,
    MediaKind::Artist,
    MediaKind::Photo,
];

pub struct ViewMaintainer<'a> {
    ctx: &'a SyncContext,
}

impl<'a> ViewMaintainer<'a> {
    pub fn new(ctx: &'a SyncContext) -> Self {
        Self { ctx }
    }

    /// Reconcile views and return the up-to-date stored set.
    pub async fn maintain(&self) -> Result<Vec<StoredView>> {
        let sections = match self.ctx.catalog.list_sections().await? {
            Fetched::Ok(sections) => sections,
            Fetched::Unauthorized => return Err(SyncError::Unauthorized),
            Fetched::NotFound => {
                return Err(SyncError::Remote("section listing unavailable".to_string()))
            }
        };

        let stored: Vec<StoredView> = self.ctx.index.views().await?;
        let mut unvisited: Vec<&StoredView> = stored.iter().collect();

        let mut created = 0u64;
        let mut renamed = 0u64;
        let mut removed = 0u64;

        for section in sections.iter().filter(|s| TRACKED_KINDS.contains(&s.kind)) {
            unvisited.retain(|v| v.id != section.id);

            match stored.iter().find(|v| v.id == section.id) {
                None => {
                    self.add_view(section).await?;
                    created += 1;
                }
                Some(existing) if existing.name != section.name => {
                    self.rename_view(existing, section).await?;
                    renamed += 1;
                }
                Some(_) => {
                    debug!(view = %section.name, "View unchanged");
                }
            }
        }

        for gone in unvisited {
            self.remove_view(gone).await?;
            removed += 1;
        }

        if created + renamed + removed > 0 {
            info!(created, renamed, removed, "Library views changed");
            self.ctx.events.emit(SyncEvent::ViewsChanged {
                created,
                renamed,
                removed,
            });
        }

        Ok(self.ctx.index.views().await?)
    }

    async fn add_view(&self, section: &RemoteView) -> Result<()> {
        info!(view = %section.name, kind = %section.kind, "New library view");
        let tag = self.ctx.index.add_view(section).await?;
        debug!(view = %section.name, tag, "View tagged");

        // Music views navigate through the library itself; no artifacts.
        if section.kind != MediaKind::Artist {
            self.ctx.artifacts.create(section).await?;
        }
        Ok(())
    }

    async fn rename_view(&self, old: &StoredView, section: &RemoteView) -> Result<()> {
        info!(from = %old.name, to = %section.name, "Library view renamed");
        self.ctx.index.rename_view(&section.id, &section.name).await?;

        // Several views can share a name (and therefore artifacts); only
        // remove the old artifacts when the name is now orphaned.
        if self.ctx.index.view_by_name(&old.name).await?.is_none() {
            if let Err(e) = self.ctx.artifacts.remove(&old.name, old.kind).await {
                warn!(view = %old.name, error = %e, "Could not remove stale view artifacts");
            }
        }

        if section.kind != MediaKind::Artist {
            self.ctx.artifacts.create(section).await?;
        }
        Ok(())
    }

    async fn remove_view(&self, view: &StoredView) -> Result<()> {
        info!(view = %view.name, "Library view removed on server, deleting mirrored items");

        // Items first, through the category stores, so write serialization
        // is preserved; the view record and artifacts go last.
        let records = self.ctx.index.records_in_view(&view.id).await?;
        for record in records {
            let Some(category) = record.kind.category() else {
                continue;
            };
            let store = self.ctx.library.category(category).await?;
            if let Err(e) = store.remove(&record.remote_id).await {
                warn!(
                    item_id = %record.remote_id,
                    error = %e,
                    "Could not remove item of deleted view"
                );
            }
        }

        self.ctx.index.remove_view(&view.id).await?;
        if let Err(e) = self.ctx.artifacts.remove(&view.name, view.kind).await {
            warn!(view = %view.name, error = %e, "Could not remove view artifacts");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{harness, remote_view};

    #[tokio::test]
    async fn new_views_are_recorded_with_artifacts() {
        let h = harness();
        h.catalog.sections.lock().unwrap().extend([
            remote_view("v1", "Movies", MediaKind::Movie),
            remote_view("v2", "Music", MediaKind::Artist),
        ]);

        let views = ViewMaintainer::new(&h.ctx).maintain().await.unwrap();

        assert_eq!(views.len(), 2);
        // Music views get no generated artifacts.
        assert_eq!(h.artifacts.created.lock().unwrap().as_slice(), ["Movies"]);
    }

    #[tokio::test]
    async fn rename_retags_and_recreates_artifacts() {
        let h = harness();
        h.index.insert_view("v1", "Films", MediaKind::Movie);
        h.catalog
            .sections
            .lock()
            .unwrap()
            .push(remote_view("v1", "Movies", MediaKind::Movie));

        let views = ViewMaintainer::new(&h.ctx).maintain().await.unwrap();

        assert_eq!(views.len(), 1);
        assert_eq!(views[0].name, "Movies");
        assert_eq!(h.artifacts.removed.lock().unwrap().as_slice(), ["Films"]);
        assert_eq!(h.artifacts.created.lock().unwrap().as_slice(), ["Movies"]);
    }

    #[tokio::test]
    async fn rename_keeps_artifacts_shared_with_another_view() {
        let h = harness();
        h.index.insert_view("v1", "Films", MediaKind::Movie);
        h.index.insert_view("v2", "Films", MediaKind::Movie);
        h.catalog.sections.lock().unwrap().extend([
            remote_view("v1", "Movies", MediaKind::Movie),
            remote_view("v2", "Films", MediaKind::Movie),
        ]);

        ViewMaintainer::new(&h.ctx).maintain().await.unwrap();

        // "Films" is still in use by v2, so its artifacts stay.
        assert!(h.artifacts.removed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn removed_view_cascades_to_its_items() {
        let h = harness();
        h.index.insert_view("v1", "Movies", MediaKind::Movie);
        h.index.insert_record("101", MediaKind::Movie, Some("v1"), 1);
        h.index.insert_record("102", MediaKind::Movie, Some("v1"), 1);

        let views = ViewMaintainer::new(&h.ctx).maintain().await.unwrap();

        assert!(views.is_empty());
        let mut removed = h.library.movies.removed.lock().unwrap().clone();
        removed.sort();
        assert_eq!(removed, ["101", "102"]);
        assert_eq!(h.artifacts.removed.lock().unwrap().as_slice(), ["Movies"]);
    }

    #[tokio::test]
    async fn unauthorized_listing_aborts() {
        let h = harness();
        h.catalog
            .unauthorized
            .store(true, std::sync::atomic::Ordering::SeqCst);

        let err = ViewMaintainer::new(&h.ctx).maintain().await.unwrap_err();
        assert!(matches!(err, SyncError::Unauthorized));
    }
}
