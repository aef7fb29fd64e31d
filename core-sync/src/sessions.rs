//! # Playback Session Cache
//!
//! "Playing" notifications carry a session key, not a user. To decide
//! whether a playback report is ours (and should update local watched
//! state), the key is resolved against the server's active-session list,
//! which is cached and only refreshed when an unknown key shows up.

use std::collections::HashMap;

use tracing::{debug, warn};

use bridge_traits::{Fetched, OwnerMatchPolicy, SessionEntry};

use crate::context::{SyncContext, UserIdentity};
use crate::error::{Result, SyncError};

/// Id the server reports for the owner's own sessions when no account
/// token is in play.
const OWNER_FALLBACK_USER_ID: &str = "1";

#[derive(Debug, Default)]
pub struct SessionCache {
    entries: HashMap<String, SessionEntry>,
}

impl SessionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve a session key, refreshing the cache from the server when the
    /// key is unknown. `None` means the session could not be identified and
    /// the playback report should be ignored.
    pub async fn resolve(&mut self, ctx: &SyncContext, session_key: &str) -> Result<Option<SessionEntry>> {
        if !self.entries.contains_key(session_key) {
            // The active-session listing is only readable on a server this
            // account owns; on a shared server the cache can only ever hold
            // entries written back by the caller.
            if !ctx.user.server_owned {
                return Ok(None);
            }
            debug!(session_key, "Unknown session key, refreshing session list");
            match ctx.catalog.list_active_sessions().await? {
                Fetched::Ok(sessions) => self.entries = sessions,
                Fetched::Unauthorized => return Err(SyncError::Unauthorized),
                Fetched::NotFound => {
                    warn!("Active session listing unavailable");
                    return Ok(None);
                }
            }
        }
        Ok(self.entries.get(session_key).cloned())
    }

    /// Write back an enriched entry (e.g. a lazily fetched duration).
    pub fn update(&mut self, session_key: &str, entry: SessionEntry) {
        self.entries.insert(session_key.to_string(), entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Whether a session belongs to the configured local user.
pub fn session_is_ours(
    entry: &SessionEntry,
    user: &UserIdentity,
    policy: OwnerMatchPolicy,
) -> bool {
    // On a shared server the session listing is not accessible, so any
    // report reaching the engine comes from the local player.
    if !user.server_owned {
        return true;
    }

    // Without a token there is no identity to compare; the owner-id
    // heuristic is all we have.
    if !user.signed_in
        && policy == OwnerMatchPolicy::TrustOwnerIdOne
        && entry.user_id == OWNER_FALLBACK_USER_ID
    {
        return true;
    }

    if !user.user_id.is_empty() && entry.user_id == user.user_id {
        return true;
    }
    !user.user_name.is_empty() && entry.user_name.eq_ignore_ascii_case(&user.user_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::harness;

    fn session(user_id: &str, user_name: &str) -> SessionEntry {
        SessionEntry {
            user_id: user_id.to_string(),
            user_name: user_name.to_string(),
            duration: None,
            view_count: None,
        }
    }

    fn user(id: &str, name: &str, signed_in: bool) -> UserIdentity {
        UserIdentity {
            user_id: id.to_string(),
            user_name: name.to_string(),
            server_owned: true,
            signed_in,
        }
    }

    #[test]
    fn matches_on_id_or_case_insensitive_name() {
        let u = user("10", "Alice", true);
        assert!(session_is_ours(&session("10", "other"), &u, OwnerMatchPolicy::RequireExact));
        assert!(session_is_ours(&session("99", "alice"), &u, OwnerMatchPolicy::RequireExact));
        assert!(!session_is_ours(&session("99", "bob"), &u, OwnerMatchPolicy::RequireExact));
    }

    #[test]
    fn owner_id_heuristic_applies_only_without_a_token() {
        let signed_out = user("", "", false);
        let signed_in = user("10", "Alice", true);

        assert!(session_is_ours(
            &session("1", ""),
            &signed_out,
            OwnerMatchPolicy::TrustOwnerIdOne
        ));
        assert!(!session_is_ours(
            &session("1", ""),
            &signed_out,
            OwnerMatchPolicy::RequireExact
        ));
        assert!(!session_is_ours(
            &session("1", ""),
            &signed_in,
            OwnerMatchPolicy::TrustOwnerIdOne
        ));
    }

    #[test]
    fn shared_server_sessions_are_always_ours() {
        let mut u = user("10", "Alice", true);
        u.server_owned = false;

        assert!(session_is_ours(
            &session("99", "bob"),
            &u,
            OwnerMatchPolicy::RequireExact
        ));
    }

    #[tokio::test]
    async fn shared_server_skips_the_session_listing() {
        let h = harness();
        h.catalog
            .sessions
            .lock()
            .unwrap()
            .insert("s1".to_string(), session("10", "tester"));

        let mut ctx = h.ctx.clone();
        ctx.user.server_owned = false;

        // The listing would resolve the key, but it is never consulted.
        let mut cache = SessionCache::new();
        assert!(cache.resolve(&ctx, "s1").await.unwrap().is_none());

        cache.update("s1", session("10", "tester"));
        assert!(cache.resolve(&ctx, "s1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn unknown_key_triggers_one_refresh() {
        let h = harness();
        h.catalog
            .sessions
            .lock()
            .unwrap()
            .insert("s1".to_string(), session("10", "tester"));

        let mut cache = SessionCache::new();
        let entry = cache.resolve(&h.ctx, "s1").await.unwrap();
        assert_eq!(entry.unwrap().user_id, "10");

        // Key still unknown after a refresh: identified as not resolvable.
        assert!(cache.resolve(&h.ctx, "nope").await.unwrap().is_none());
    }
}
