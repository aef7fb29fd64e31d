//! In-memory fakes for the bridge traits, shared by unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use bridge_traits::error::Result as BridgeResult;
use bridge_traits::{
    BridgeError, CategoryStore, Checksum, Fetched, ItemPayload, LibraryCategory,
    LibraryIndex, LocalLibrary, LocalRecord, MediaKind, MpscNotificationQueue, PlaystateUpdate,
    RemoteCatalog, RemoteItem, RemoteView, SectionFilter, SessionEntry, StaticSettings,
    StoredView, SyncSettings, UserData,
};
use core_runtime::EventBus;

use crate::context::{ClockOffset, EngineFlags, SyncContext, UserIdentity};

// ============================================================================
// Fixtures
// ============================================================================

pub fn listing(id: &str, kind: MediaKind, updated_at: i64) -> RemoteItem {
    RemoteItem {
        id: Some(id.to_string()),
        kind: Some(kind),
        parent_id: None,
        view_id: None,
        updated_at,
        title: format!("Item {}", id),
    }
}

pub fn payload(id: &str, kind: MediaKind, updated_at: i64) -> ItemPayload {
    ItemPayload {
        id: id.to_string(),
        kind,
        parent_id: None,
        library_section_id: None,
        library_section_title: None,
        updated_at,
        title: format!("Item {}", id),
        user_data: UserData::default(),
        attributes: HashMap::new(),
    }
}

pub fn remote_view(id: &str, name: &str, kind: MediaKind) -> RemoteView {
    RemoteView {
        id: id.to_string(),
        name: name.to_string(),
        kind,
    }
}

// ============================================================================
// Catalog
// ============================================================================

#[derive(Default)]
pub struct FakeCatalog {
    pub sections: Mutex<Vec<RemoteView>>,
    pub items: Mutex<HashMap<String, ItemPayload>>,
    pub section_items: Mutex<HashMap<(String, SectionFilter), Vec<RemoteItem>>>,
    pub leaves: Mutex<HashMap<String, Vec<ItemPayload>>>,
    pub children: Mutex<HashMap<String, Vec<RemoteItem>>>,
    pub sessions: Mutex<HashMap<String, SessionEntry>>,
    pub watched_calls: Mutex<Vec<(String, bool)>>,
    /// When set, every call answers `Unauthorized`.
    pub unauthorized: AtomicBool,
}

impl FakeCatalog {
    pub fn add_item(&self, payload: ItemPayload) {
        self.items
            .lock()
            .unwrap()
            .insert(payload.id.clone(), payload);
    }

    pub fn set_section_items(&self, view_id: &str, filter: SectionFilter, items: Vec<RemoteItem>) {
        self.section_items
            .lock()
            .unwrap()
            .insert((view_id.to_string(), filter), items);
    }

    fn denied(&self) -> bool {
        self.unauthorized.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteCatalog for FakeCatalog {
    async fn fetch_item(&self, id: &str) -> BridgeResult<Fetched<ItemPayload>> {
        if self.denied() {
            return Ok(Fetched::Unauthorized);
        }
        Ok(match self.items.lock().unwrap().get(id) {
            Some(p) => Fetched::Ok(p.clone()),
            None => Fetched::NotFound,
        })
    }

    async fn fetch_section_items(
        &self,
        view_id: &str,
        filter: SectionFilter,
    ) -> BridgeResult<Fetched<Vec<RemoteItem>>> {
        if self.denied() {
            return Ok(Fetched::Unauthorized);
        }
        Ok(Fetched::Ok(
            self.section_items
                .lock()
                .unwrap()
                .get(&(view_id.to_string(), filter))
                .cloned()
                .unwrap_or_default(),
        ))
    }

    async fn fetch_leaves(
        &self,
        view_id: &str,
        viewed_since: Option<i64>,
    ) -> BridgeResult<Fetched<Vec<ItemPayload>>> {
        if self.denied() {
            return Ok(Fetched::Unauthorized);
        }
        let all = self
            .leaves
            .lock()
            .unwrap()
            .get(view_id)
            .cloned()
            .unwrap_or_default();
        let filtered = match viewed_since {
            None => all,
            Some(since) => all
                .into_iter()
                .filter(|p| p.user_data.last_viewed_at.map_or(false, |ts| ts >= since))
                .collect(),
        };
        Ok(Fetched::Ok(filtered))
    }

    async fn fetch_children(&self, item_id: &str) -> BridgeResult<Fetched<Vec<RemoteItem>>> {
        if self.denied() {
            return Ok(Fetched::Unauthorized);
        }
        Ok(Fetched::Ok(
            self.children
                .lock()
                .unwrap()
                .get(item_id)
                .cloned()
                .unwrap_or_default(),
        ))
    }

    async fn list_sections(&self) -> BridgeResult<Fetched<Vec<RemoteView>>> {
        if self.denied() {
            return Ok(Fetched::Unauthorized);
        }
        Ok(Fetched::Ok(self.sections.lock().unwrap().clone()))
    }

    async fn list_active_sessions(&self) -> BridgeResult<Fetched<HashMap<String, SessionEntry>>> {
        if self.denied() {
            return Ok(Fetched::Unauthorized);
        }
        Ok(Fetched::Ok(self.sessions.lock().unwrap().clone()))
    }

    async fn set_watched(&self, id: &str, watched: bool) -> BridgeResult<()> {
        self.watched_calls
            .lock()
            .unwrap()
            .push((id.to_string(), watched));
        Ok(())
    }
}

// ============================================================================
// Store
// ============================================================================

/// Applied-operation record: method name, item id, view tag.
pub type AppliedRow = (&'static str, String, Option<String>);

#[derive(Default)]
pub struct RecordingStore {
    pub applied: Mutex<Vec<AppliedRow>>,
    pub removed: Mutex<Vec<String>>,
    pub playstates: Mutex<Vec<PlaystateUpdate>>,
    pub fail_on: Mutex<Option<String>>,
}

impl RecordingStore {
    pub fn applied_ids(&self) -> Vec<String> {
        self.applied
            .lock()
            .unwrap()
            .iter()
            .map(|(_, id, _)| id.clone())
            .collect()
    }

    fn record(
        &self,
        method: &'static str,
        payload: &ItemPayload,
        view_tag: Option<&str>,
    ) -> BridgeResult<()> {
        if self.fail_on.lock().unwrap().as_deref() == Some(payload.id.as_str()) {
            return Err(BridgeError::Store("injected failure".to_string()));
        }
        self.applied.lock().unwrap().push((
            method,
            payload.id.clone(),
            view_tag.map(str::to_string),
        ));
        Ok(())
    }
}

#[async_trait]
impl CategoryStore for RecordingStore {
    async fn add_or_update(
        &self,
        payload: &ItemPayload,
        view_tag: Option<&str>,
        _view_id: Option<&str>,
    ) -> BridgeResult<()> {
        self.record("add_or_update", payload, view_tag)
    }

    async fn add_season(
        &self,
        payload: &ItemPayload,
        view_tag: Option<&str>,
        _view_id: Option<&str>,
    ) -> BridgeResult<()> {
        self.record("add_season", payload, view_tag)
    }

    async fn add_episode(
        &self,
        payload: &ItemPayload,
        view_tag: Option<&str>,
        _view_id: Option<&str>,
    ) -> BridgeResult<()> {
        self.record("add_episode", payload, view_tag)
    }

    async fn add_album(
        &self,
        payload: &ItemPayload,
        view_tag: Option<&str>,
        _view_id: Option<&str>,
    ) -> BridgeResult<()> {
        self.record("add_album", payload, view_tag)
    }

    async fn add_track(
        &self,
        payload: &ItemPayload,
        view_tag: Option<&str>,
        _view_id: Option<&str>,
    ) -> BridgeResult<()> {
        self.record("add_track", payload, view_tag)
    }

    async fn remove(&self, remote_id: &str) -> BridgeResult<()> {
        self.removed.lock().unwrap().push(remote_id.to_string());
        Ok(())
    }

    async fn update_playstate(&self, update: &PlaystateUpdate) -> BridgeResult<()> {
        self.playstates.lock().unwrap().push(update.clone());
        Ok(())
    }
}

pub struct FakeLibrary {
    pub movies: Arc<RecordingStore>,
    pub shows: Arc<RecordingStore>,
    pub music: Arc<RecordingStore>,
    pub photos: Arc<RecordingStore>,
    pub schema: Mutex<Option<String>>,
}

impl Default for FakeLibrary {
    fn default() -> Self {
        Self {
            movies: Arc::new(RecordingStore::default()),
            shows: Arc::new(RecordingStore::default()),
            music: Arc::new(RecordingStore::default()),
            photos: Arc::new(RecordingStore::default()),
            schema: Mutex::new(Some(crate::orchestrator::MIN_SCHEMA_VERSION.to_string())),
        }
    }
}

#[async_trait]
impl LocalLibrary for FakeLibrary {
    async fn category(&self, category: LibraryCategory) -> BridgeResult<Arc<dyn CategoryStore>> {
        Ok(match category {
            LibraryCategory::Movies => self.movies.clone(),
            LibraryCategory::Shows => self.shows.clone(),
            LibraryCategory::Music => self.music.clone(),
            LibraryCategory::Photos => self.photos.clone(),
        })
    }

    async fn schema_version(&self) -> BridgeResult<Option<String>> {
        Ok(self.schema.lock().unwrap().clone())
    }

    async fn set_schema_version(&self, version: &str) -> BridgeResult<()> {
        *self.schema.lock().unwrap() = Some(version.to_string());
        Ok(())
    }
}

// ============================================================================
// Index
// ============================================================================

#[derive(Default)]
pub struct FakeIndex {
    pub records: Mutex<HashMap<String, LocalRecord>>,
    pub stored_views: Mutex<Vec<StoredView>>,
    pub fanart_marked: Mutex<Vec<String>>,
    pub missing: Mutex<Vec<(String, MediaKind)>>,
    next_tag: AtomicI64,
}

impl FakeIndex {
    pub fn insert_record(&self, id: &str, kind: MediaKind, view_id: Option<&str>, updated_at: i64) {
        self.records.lock().unwrap().insert(
            id.to_string(),
            LocalRecord {
                remote_id: id.to_string(),
                view_id: view_id.map(str::to_string),
                kind,
                local_id: 1,
                local_file_id: Some(1),
                local_path_id: None,
                parent_id: None,
                checksum: Checksum::compose(id, updated_at),
                fanart_synced: false,
            },
        );
    }

    pub fn insert_view(&self, id: &str, name: &str, kind: MediaKind) {
        let tag = self.next_tag.fetch_add(1, Ordering::SeqCst) + 1;
        self.stored_views.lock().unwrap().push(StoredView {
            id: id.to_string(),
            name: name.to_string(),
            kind,
            tag_id: tag,
            sync_enabled: true,
        });
    }
}

#[async_trait]
impl LibraryIndex for FakeIndex {
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
        Ok(self.stored_views.lock().unwrap().clone())
    }

    async fn view_by_name(&self, name: &str) -> BridgeResult<Option<StoredView>> {
        Ok(self
            .stored_views
            .lock()
            .unwrap()
            .iter()
            .find(|v| v.name == name)
            .cloned())
    }

    async fn add_view(&self, view: &RemoteView) -> BridgeResult<i64> {
        let tag = self.next_tag.fetch_add(1, Ordering::SeqCst) + 1;
        self.stored_views.lock().unwrap().push(StoredView {
            id: view.id.clone(),
            name: view.name.clone(),
            kind: view.kind,
            tag_id: tag,
            sync_enabled: true,
        });
        Ok(tag)
    }

    async fn rename_view(&self, view_id: &str, new_name: &str) -> BridgeResult<i64> {
        let tag = self.next_tag.fetch_add(1, Ordering::SeqCst) + 1;
        let mut views = self.stored_views.lock().unwrap();
        let view = views
            .iter_mut()
            .find(|v| v.id == view_id)
            .ok_or_else(|| BridgeError::Store(format!("unknown view {}", view_id)))?;
        view.name = new_name.to_string();
        view.tag_id = tag;
        Ok(tag)
    }

    async fn remove_view(&self, view_id: &str) -> BridgeResult<()> {
        self.stored_views.lock().unwrap().retain(|v| v.id != view_id);
        Ok(())
    }

    async fn set_fanart_synced(&self, remote_id: &str) -> BridgeResult<()> {
        self.fanart_marked.lock().unwrap().push(remote_id.to_string());
        Ok(())
    }

    async fn missing_fanart(&self) -> BridgeResult<Vec<(String, MediaKind)>> {
        Ok(self.missing.lock().unwrap().clone())
    }
}

// ============================================================================
// Artifacts / Artwork
// ============================================================================

#[derive(Default)]
pub struct FakeArtifacts {
    pub created: Mutex<Vec<String>>,
    pub removed: Mutex<Vec<String>>,
}

#[async_trait]
impl bridge_traits::ListArtifacts for FakeArtifacts {
    async fn create(&self, view: &RemoteView) -> BridgeResult<()> {
        self.created.lock().unwrap().push(view.name.clone());
        Ok(())
    }

    async fn remove(&self, view_name: &str, _kind: MediaKind) -> BridgeResult<()> {
        self.removed.lock().unwrap().push(view_name.to_string());
        Ok(())
    }
}

// ============================================================================
// Context Assembly
// ============================================================================

pub struct TestHarness {
    pub catalog: Arc<FakeCatalog>,
    pub library: Arc<FakeLibrary>,
    pub index: Arc<FakeIndex>,
    pub artifacts: Arc<FakeArtifacts>,
    pub settings: Arc<StaticSettings>,
    pub notify_tx: tokio::sync::mpsc::UnboundedSender<bridge_traits::NotificationMessage>,
    pub ctx: SyncContext,
}

pub fn harness() -> TestHarness {
    harness_with_settings(SyncSettings::default())
}

pub fn harness_with_settings(settings: SyncSettings) -> TestHarness {
    let catalog = Arc::new(FakeCatalog::default());
    let library = Arc::new(FakeLibrary::default());
    let index = Arc::new(FakeIndex::default());
    let artifacts = Arc::new(FakeArtifacts::default());
    let settings = Arc::new(StaticSettings::new(settings));
    let (notify_tx, queue) = MpscNotificationQueue::new();

    let ctx = SyncContext::builder()
        .catalog(catalog.clone())
        .library(library.clone())
        .index(index.clone())
        .artifacts(artifacts.clone())
        .notifications(Arc::new(queue))
        .settings(settings.clone())
        .events(EventBus::new(64))
        .flags(Arc::new(EngineFlags::new()))
        .clock(Arc::new(ClockOffset::new()))
        .user(UserIdentity {
            user_id: "10".to_string(),
            user_name: "tester".to_string(),
            server_owned: true,
            signed_in: true,
        })
        .build();

    TestHarness {
        catalog,
        library,
        index,
        artifacts,
        settings,
        notify_tx,
        ctx,
    }
}
