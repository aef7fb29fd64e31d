//! Remote Catalog Abstraction
//!
//! The contract for the remote media server being mirrored. The transport
//! (HTTP, XML/JSON parsing, retries at the wire level) lives behind this
//! trait; the engine only sees parsed shapes and a three-way fetch outcome.

use async_trait::async_trait;
use std::collections::HashMap;

use crate::error::Result;
use crate::model::{ItemPayload, RemoteItem, RemoteView, SessionEntry};

/// Outcome of a remote fetch.
///
/// `Unauthorized` is the remote server's overload/revocation signal and
/// aborts an entire sync pass; `NotFound` is an item-level miss that is
/// simply skipped for the current pass.
#[derive(Debug, Clone, PartialEq)]
pub enum Fetched<T> {
    Ok(T),
    NotFound,
    Unauthorized,
}

impl<T> Fetched<T> {
    /// Map the success value, preserving the failure variants.
    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Fetched<U> {
        match self {
            Fetched::Ok(v) => Fetched::Ok(f(v)),
            Fetched::NotFound => Fetched::NotFound,
            Fetched::Unauthorized => Fetched::Unauthorized,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Fetched::Unauthorized)
    }
}

/// Narrow a section listing to one music sub-kind.
///
/// Music sections are enumerated three times (artists, then albums, then
/// tracks) so parents exist before children are applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SectionFilter {
    /// Plain listing of the section's primary items (movies, shows, photos).
    Default,
    Artists,
    Albums,
    Tracks,
}

/// Client for the remote catalog server.
///
/// All methods are read-only except [`set_watched`](RemoteCatalog::set_watched),
/// which is used by the clock reconciler's probe toggle.
#[async_trait]
pub trait RemoteCatalog: Send + Sync {
    /// Fetch the full metadata payload for a single item.
    async fn fetch_item(&self, id: &str) -> Result<Fetched<ItemPayload>>;

    /// List the items of one library section.
    async fn fetch_section_items(
        &self,
        view_id: &str,
        filter: SectionFilter,
    ) -> Result<Fetched<Vec<RemoteItem>>>;

    /// List all leaf items (episodes, tracks) of a section, with their
    /// userdata. `viewed_since` restricts the listing to items last viewed
    /// at or after the given remote timestamp.
    async fn fetch_leaves(
        &self,
        view_id: &str,
        viewed_since: Option<i64>,
    ) -> Result<Fetched<Vec<ItemPayload>>>;

    /// List the direct children of an item (seasons of a show).
    async fn fetch_children(&self, item_id: &str) -> Result<Fetched<Vec<RemoteItem>>>;

    /// Enumerate all library sections.
    async fn list_sections(&self) -> Result<Fetched<Vec<RemoteView>>>;

    /// List active playback sessions, keyed by session key.
    async fn list_active_sessions(&self) -> Result<Fetched<HashMap<String, SessionEntry>>>;

    /// Toggle the watched flag of an item on the server.
    async fn set_watched(&self, id: &str, watched: bool) -> Result<()>;
}
