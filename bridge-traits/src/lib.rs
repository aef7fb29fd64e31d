//! # Collaborator Bridge Traits
//!
//! Contracts between the sync engine and everything it talks to but does
//! not own: the remote catalog server, the local library database, the
//! push-notification transport, and the settings store.
//!
//! ## Overview
//!
//! The engine core never performs I/O directly. Each external concern is
//! expressed as an async trait here, implemented by the hosting application:
//!
//! - [`RemoteCatalog`](catalog::RemoteCatalog) - fetch items, sections,
//!   children, sessions; toggle watched state
//! - [`LocalLibrary`](store::LocalLibrary) / [`CategoryStore`](store::CategoryStore) -
//!   category-scoped write handles into the local mirror
//! - [`LibraryIndex`](store::LibraryIndex) - read side of the mirror
//!   (checksums, records, views)
//! - [`ListArtifacts`](store::ListArtifacts) - generated playlists/nodes
//!   that shadow views
//! - [`NotificationQueue`](notify::NotificationQueue) - decoded push
//!   messages, consumed one at a time
//! - [`SettingsProvider`](settings::SettingsProvider) - read-only engine
//!   preferences
//!
//! ## Error Handling
//!
//! All traits use [`BridgeError`](error::BridgeError). Implementations
//! convert their platform errors and include enough context to be
//! actionable in logs; the engine decides what is transient, what aborts a
//! pass, and what is fatal.
//!
//! ## Thread Safety
//!
//! All traits require `Send + Sync`; handles are shared across worker tasks
//! behind `Arc`.

pub mod catalog;
pub mod error;
pub mod model;
pub mod notify;
pub mod settings;
pub mod store;

pub use error::BridgeError;

// Re-export commonly used types
pub use catalog::{Fetched, RemoteCatalog, SectionFilter};
pub use model::{
    Checksum, ItemPayload, LibraryCategory, LocalRecord, MediaKind, PlaystateUpdate, RemoteItem,
    RemoteView, SessionEntry, StoredView, UserData,
};
pub use notify::{
    ChannelClosed, MpscNotificationQueue, NotificationMessage, NotificationQueue, PlayState,
    PlayingEntry, TimelineEntry, TimelineState,
};
pub use settings::{OwnerMatchPolicy, ScanRequest, SettingsProvider, StaticSettings, SyncSettings};
pub use store::{ArtworkFetcher, CategoryStore, LibraryIndex, ListArtifacts, LocalLibrary};
