//! End-to-end engine test against in-memory bridge implementations: a full
//! sync mirrors the server, a change notification updates the mirror
//! between passes, and a second full sync reconciles a deletion.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use bridge_traits::error::Result as BridgeResult;
use bridge_traits::{
    CategoryStore, Checksum, Fetched, ItemPayload, LibraryCategory, LibraryIndex, ListArtifacts,
    LocalLibrary, LocalRecord, MediaKind, MpscNotificationQueue, NotificationMessage,
    PlaystateUpdate, RemoteCatalog, RemoteItem, RemoteView, SectionFilter, SessionEntry,
    StaticSettings, StoredView, SyncSettings, TimelineEntry, UserData,
};
use core_runtime::EventBus;
use core_sync::{EngineFlags, EventProcessor, SyncContext, SyncOrchestrator, UserIdentity};

// ============================================================================
// In-memory server
// ============================================================================

/// Remote server fixture: a single movie section whose contents tests
/// mutate between passes.
#[derive(Default)]
struct Server {
    movies: Mutex<HashMap<String, ItemPayload>>,
}

impl Server {
    fn put_movie(&self, id: &str, updated_at: i64) {
        self.movies.lock().unwrap().insert(
            id.to_string(),
            ItemPayload {
                id: id.to_string(),
                kind: MediaKind::Movie,
                parent_id: None,
                library_section_id: Some("v1".to_string()),
                library_section_title: Some("Movies".to_string()),
                updated_at,
                title: format!("Movie {}", id),
                user_data: UserData::default(),
                attributes: HashMap::new(),
            },
        );
    }

    fn delete_movie(&self, id: &str) {
        self.movies.lock().unwrap().remove(id);
    }
}

#[async_trait]
impl RemoteCatalog for Server {
    async fn fetch_item(&self, id: &str) -> BridgeResult<Fetched<ItemPayload>> {
        Ok(match self.movies.lock().unwrap().get(id) {
            Some(p) => Fetched::Ok(p.clone()),
            None => Fetched::NotFound,
        })
    }

    async fn fetch_section_items(
        &self,
        _view_id: &str,
        _filter: SectionFilter,
    ) -> BridgeResult<Fetched<Vec<RemoteItem>>> {
        let mut items: Vec<RemoteItem> = self
            .movies
            .lock()
            .unwrap()
            .values()
            .map(|p| p.as_listing())
            .collect();
        items.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(Fetched::Ok(items))
    }

    async fn fetch_leaves(
        &self,
        _view_id: &str,
        _viewed_since: Option<i64>,
    ) -> BridgeResult<Fetched<Vec<ItemPayload>>> {
        Ok(Fetched::Ok(vec![]))
    }

    async fn fetch_children(&self, _item_id: &str) -> BridgeResult<Fetched<Vec<RemoteItem>>> {
        Ok(Fetched::Ok(vec![]))
    }

    async fn list_sections(&self) -> BridgeResult<Fetched<Vec<RemoteView>>> {
        Ok(Fetched::Ok(vec![RemoteView {
            id: "v1".to_string(),
            name: "Movies".to_string(),
            kind: MediaKind::Movie,
        }]))
    }

    async fn list_active_sessions(
        &self,
    ) -> BridgeResult<Fetched<HashMap<String, SessionEntry>>> {
        Ok(Fetched::Ok(HashMap::new()))
    }

    async fn set_watched(&self, _id: &str, _watched: bool) -> BridgeResult<()> {
        Ok(())
    }
}

// ============================================================================
// In-memory mirror
// ============================================================================

/// Local mirror fixture: a cloneable handle over one shared record map, so
/// the store and the index see each other's writes and applies are visible
/// to the next delta computation, as in production.
#[derive(Default, Clone)]
struct Mirror {
    records: Arc<Mutex<HashMap<String, LocalRecord>>>,
    views: Arc<Mutex<Vec<StoredView>>>,
    schema: Arc<Mutex<Option<String>>>,
}

impl Mirror {
    fn record_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.records.lock().unwrap().keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl CategoryStore for Mirror {
    async fn add_or_update(
        &self,
        payload: &ItemPayload,
        _view_tag: Option<&str>,
        view_id: Option<&str>,
    ) -> BridgeResult<()> {
        self.records.lock().unwrap().insert(
            payload.id.clone(),
            LocalRecord {
                remote_id: payload.id.clone(),
                view_id: view_id.map(str::to_string),
                kind: payload.kind,
                local_id: 1,
                local_file_id: Some(1),
                local_path_id: None,
                parent_id: payload.parent_id.clone(),
                checksum: payload.checksum(),
                fanart_synced: false,
            },
        );
        Ok(())
    }

    async fn add_season(
        &self,
        payload: &ItemPayload,
        view_tag: Option<&str>,
        view_id: Option<&str>,
    ) -> BridgeResult<()> {
        self.add_or_update(payload, view_tag, view_id).await
    }

    async fn add_episode(
        &self,
        payload: &ItemPayload,
        view_tag: Option<&str>,
        view_id: Option<&str>,
    ) -> BridgeResult<()> {
        self.add_or_update(payload, view_tag, view_id).await
    }

    async fn add_album(
        &self,
        payload: &ItemPayload,
        view_tag: Option<&str>,
        view_id: Option<&str>,
    ) -> BridgeResult<()> {
        self.add_or_update(payload, view_tag, view_id).await
    }

    async fn add_track(
        &self,
        payload: &ItemPayload,
        view_tag: Option<&str>,
        view_id: Option<&str>,
    ) -> BridgeResult<()> {
        self.add_or_update(payload, view_tag, view_id).await
    }

    async fn remove(&self, remote_id: &str) -> BridgeResult<()> {
        self.records.lock().unwrap().remove(remote_id);
        Ok(())
    }

    async fn update_playstate(&self, _update: &PlaystateUpdate) -> BridgeResult<()> {
        Ok(())
    }
}

#[async_trait]
impl LocalLibrary for Mirror {
    async fn category(&self, _category: LibraryCategory) -> BridgeResult<Arc<dyn CategoryStore>> {
        Ok(Arc::new(self.clone()))
    }

    async fn schema_version(&self) -> BridgeResult<Option<String>> {
        Ok(self.schema.lock().unwrap().clone())
    }

    async fn set_schema_version(&self, version: &str) -> BridgeResult<()> {
        *self.schema.lock().unwrap() = Some(version.to_string());
        Ok(())
    }
}

#[async_trait]
impl LibraryIndex for Mirror {
    async fn checksums(&self, kind: MediaKind) -> BridgeResult<HashMap<String, Checksum>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.kind == kind)
            .map(|r| (r.remote_id.clone(), r.checksum.clone()))
            .collect())
    }

    async fn record(&self, remote_id: &str) -> BridgeResult<Option<LocalRecord>> {
        Ok(self.records.lock().unwrap().get(remote_id).cloned())
    }

    async fn records_in_view(&self, view_id: &str) -> BridgeResult<Vec<LocalRecord>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.view_id.as_deref() == Some(view_id))
            .cloned()
            .collect())
    }

    async fn views(&self) -> BridgeResult<Vec<StoredView>> {
        Ok(self.views.lock().unwrap().clone())
    }

    async fn view_by_name(&self, name: &str) -> BridgeResult<Option<StoredView>> {
        Ok(self
            .views
            .lock()
            .unwrap()
            .iter()
            .find(|v| v.name == name)
            .cloned())
    }

    async fn add_view(&self, view: &RemoteView) -> BridgeResult<i64> {
        let tag = self.views.lock().unwrap().len() as i64 + 1;
        self.views.lock().unwrap().push(StoredView {
            id: view.id.clone(),
            name: view.name.clone(),
            kind: view.kind,
            tag_id: tag,
            sync_enabled: true,
        });
        Ok(tag)
    }

    async fn rename_view(&self, view_id: &str, new_name: &str) -> BridgeResult<i64> {
        let mut views = self.views.lock().unwrap();
        if let Some(view) = views.iter_mut().find(|v| v.id == view_id) {
            view.name = new_name.to_string();
        }
        Ok(0)
    }

    async fn remove_view(&self, view_id: &str) -> BridgeResult<()> {
        self.views.lock().unwrap().retain(|v| v.id != view_id);
        Ok(())
    }

    async fn set_fanart_synced(&self, _remote_id: &str) -> BridgeResult<()> {
        Ok(())
    }

    async fn missing_fanart(&self) -> BridgeResult<Vec<(String, MediaKind)>> {
        Ok(vec![])
    }
}

struct NoArtifacts;

#[async_trait]
impl ListArtifacts for NoArtifacts {
    async fn create(&self, _view: &RemoteView) -> BridgeResult<()> {
        Ok(())
    }

    async fn remove(&self, _view_name: &str, _kind: MediaKind) -> BridgeResult<()> {
        Ok(())
    }
}

// ============================================================================
// Wiring
// ============================================================================

fn wire(
    server: Arc<Server>,
    mirror: Mirror,
) -> (
    SyncContext,
    tokio::sync::mpsc::UnboundedSender<NotificationMessage>,
) {
    let (notify_tx, queue) = MpscNotificationQueue::new();
    let settings = SyncSettings {
        safety_margin_secs: 0,
        ..SyncSettings::default()
    };
    let ctx = SyncContext::builder()
        .catalog(server)
        .library(Arc::new(mirror.clone()))
        .index(Arc::new(mirror))
        .artifacts(Arc::new(NoArtifacts))
        .notifications(Arc::new(queue))
        .settings(Arc::new(StaticSettings::new(settings)))
        .events(EventBus::new(64))
        .flags(Arc::new(EngineFlags::new()))
        .user(UserIdentity {
            user_id: "10".to_string(),
            user_name: "tester".to_string(),
            server_owned: true,
            signed_in: true,
        })
        .build();
    (ctx, notify_tx)
}

#[tokio::test]
async fn full_sync_then_notification_then_reconcile() {
    let server = Arc::new(Server::default());
    let mirror = Mirror::default();
    server.put_movie("1", 100);
    server.put_movie("2", 100);

    let (ctx, notify_tx) = wire(Arc::clone(&server), mirror.clone());
    let mut orchestrator = SyncOrchestrator::new(ctx.clone());
    orchestrator.check_schema().await.unwrap();

    // Initial full sync mirrors the section.
    orchestrator.full_sync(false).await.unwrap();
    assert_eq!(mirror.record_ids(), ["1", "2"]);

    // A finished-processing notification for a new movie lands between
    // passes and is applied by the event processor.
    server.put_movie("3", 200);
    notify_tx
        .send(NotificationMessage::Timeline(vec![TimelineEntry {
            identifier: "com.library.provider".to_string(),
            type_code: 1,
            state_code: 5,
            item_id: Some("3".to_string()),
        }]))
        .unwrap();

    let mut processor = EventProcessor::new(ctx.clone());
    while let Some(message) = ctx.notifications.try_recv().await.unwrap() {
        processor.handle_message(message).await.unwrap();
    }
    processor.process_pending().await.unwrap();
    assert_eq!(mirror.record_ids(), ["1", "2", "3"]);

    // The server drops a movie and touches another; the next full sync
    // reconciles both.
    server.delete_movie("1");
    server.put_movie("2", 300);
    orchestrator.full_sync(false).await.unwrap();

    assert_eq!(mirror.record_ids(), ["2", "3"]);
    let refreshed = mirror.records.lock().unwrap().get("2").unwrap().checksum.clone();
    assert_eq!(refreshed, Checksum::compose("2", 300));
}

#[tokio::test]
async fn repair_pass_rewrites_an_intact_mirror() {
    let server = Arc::new(Server::default());
    let mirror = Mirror::default();
    server.put_movie("1", 100);

    let (ctx, _notify_tx) = wire(Arc::clone(&server), mirror.clone());
    let mut orchestrator = SyncOrchestrator::new(ctx);

    orchestrator.full_sync(false).await.unwrap();
    assert_eq!(mirror.record_ids(), ["1"]);

    // Nothing changed remotely, but repair refetches anyway.
    orchestrator.full_sync(true).await.unwrap();
    assert_eq!(mirror.record_ids(), ["1"]);
}

#[tokio::test]
async fn reapplying_an_identical_payload_is_idempotent() {
    let server = Arc::new(Server::default());
    let mirror = Mirror::default();
    server.put_movie("1", 100);

    let (ctx, _notify_tx) = wire(Arc::clone(&server), mirror.clone());
    let mut orchestrator = SyncOrchestrator::new(ctx);

    orchestrator.full_sync(false).await.unwrap();
    let before = mirror.records.lock().unwrap().get("1").cloned().unwrap();

    // A repair pass refetches and reapplies the unchanged payload; the
    // record (checksum included) must come out identical.
    orchestrator.full_sync(true).await.unwrap();
    let after = mirror.records.lock().unwrap().get("1").cloned().unwrap();
    assert_eq!(after, before);
}
