//! Action references for the results currently on screen, per input session.

use std::collections::HashMap;

use kestrel_types::{RankedResult, ResultAction, ResultPatch};
use parking_lot::RwLock;
use tracing::debug;

/// What is needed to invoke an action on a surfaced result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResult {
    pub plugin_id: String,
    /// Id the plugin issued for this result
    pub source_id: String,
    pub actions: Vec<ResultAction>,
    pub context_data: String,
}

impl CachedResult {
    /// The requested action, or the default one when `action_id` is `None`.
    #[must_use]
    pub fn resolve_action(&self, action_id: Option<&str>) -> Option<&ResultAction> {
        match action_id {
            Some(id) => self.actions.iter().find(|a| a.id == id),
            None => self
                .actions
                .iter()
                .find(|a| a.is_default)
                .or_else(|| self.actions.first()),
        }
    }
}

#[derive(Debug, Default)]
struct SessionResults {
    generation: u64,
    results: HashMap<String, CachedResult>,
}

#[derive(Debug, Default)]
pub struct ResultCache {
    sessions: RwLock<HashMap<String, SessionResults>>,
}

impl ResultCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace a session's entries with a newly surfaced generation.
    pub fn replace(&self, session: &str, generation: u64, results: &[RankedResult]) {
        let entries = results
            .iter()
            .map(|ranked| {
                (
                    ranked.result.id.clone(),
                    CachedResult {
                        plugin_id: ranked.plugin_id.clone(),
                        source_id: if ranked.source_id.is_empty() {
                            ranked.result.id.clone()
                        } else {
                            ranked.source_id.clone()
                        },
                        actions: ranked.result.actions.clone(),
                        context_data: ranked.result.context_data.clone(),
                    },
                )
            })
            .collect();

        self.sessions.write().insert(
            session.to_string(),
            SessionResults {
                generation,
                results: entries,
            },
        );
    }

    #[must_use]
    pub fn lookup(&self, session: &str, result_id: &str) -> Option<CachedResult> {
        self.sessions
            .read()
            .get(session)
            .and_then(|s| s.results.get(result_id))
            .cloned()
    }

    /// Generation of the entries cached for `session`
    #[must_use]
    pub fn generation(&self, session: &str) -> Option<u64> {
        self.sessions.read().get(session).map(|s| s.generation)
    }

    /// Drop every entry owned by `plugin_id`. Returns how many were removed.
    pub fn purge_plugin(&self, plugin_id: &str) -> usize {
        let mut removed = 0;
        for session in self.sessions.write().values_mut() {
            let before = session.results.len();
            session.results.retain(|_, r| r.plugin_id != plugin_id);
            removed += before - session.results.len();
        }
        if removed > 0 {
            debug!("[{}] Purged {} cached result(s)", plugin_id, removed);
        }
        removed
    }

    pub fn clear_session(&self, session: &str) {
        self.sessions.write().remove(session);
    }

    /// Apply a patch addressed by the id `plugin_id` issued.
    ///
    /// Returns the ids the patched results are shown under, empty when the
    /// plugin has no surfaced result with that id.
    pub fn apply_patch(&self, plugin_id: &str, patch: &ResultPatch) -> Vec<String> {
        let mut shown = Vec::new();
        for session in self.sessions.write().values_mut() {
            for (id, cached) in &mut session.results {
                if cached.plugin_id != plugin_id || cached.source_id != patch.id {
                    continue;
                }
                if let Some(actions) = &patch.actions {
                    cached.actions.clone_from(actions);
                }
                if !shown.contains(id) {
                    shown.push(id.clone());
                }
            }
        }
        shown
    }

    #[must_use]
    pub fn len(&self, session: &str) -> usize {
        self.sessions.read().get(session).map_or(0, |s| s.results.len())
    }
}
