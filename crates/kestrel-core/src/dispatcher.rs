//! Concurrent query fan-out with per-plugin isolation and stale-result
//! suppression.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use kestrel_types::{Query, QueryResult, QueryType};
use parking_lot::RwLock;
use tokio::task::JoinSet;
use tracing::{debug, error, trace, warn};

use crate::config::DispatchConfig;
use crate::ranker::ResultBatch;
use crate::registry::{PluginInstance, PluginRegistry};

/// Hands out generation numbers and remembers the latest one per session.
///
/// Numbers are unique across sessions; only the per-session latest counts
/// as current.
#[derive(Debug, Default)]
pub struct GenerationTracker {
    next: AtomicU64,
    latest: RwLock<HashMap<String, u64>>,
}

impl GenerationTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new generation for `session`, superseding any older one.
    pub fn begin(&self, session: &str) -> u64 {
        let generation = self.next.fetch_add(1, Ordering::AcqRel) + 1;
        let mut latest = self.latest.write();
        let slot = latest.entry(session.to_string()).or_default();
        *slot = (*slot).max(generation);
        generation
    }

    #[must_use]
    pub fn current(&self, session: &str) -> Option<u64> {
        self.latest.read().get(session).copied()
    }

    #[must_use]
    pub fn is_current(&self, session: &str, generation: u64) -> bool {
        self.current(session) == Some(generation)
    }

    pub fn forget(&self, session: &str) {
        self.latest.write().remove(session);
    }
}

/// Everything that arrived in time for one generation
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub session: String,
    pub generation: u64,
    /// Non-empty batches in arrival order
    pub batches: Vec<ResultBatch>,
    pub used_fallback: bool,
}

impl DispatchOutcome {
    #[must_use]
    pub fn result_count(&self) -> usize {
        self.batches.iter().map(|b| b.results.len()).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Hook {
    Query,
    Fallback,
}

impl Hook {
    fn name(self) -> &'static str {
        match self {
            Hook::Query => "query",
            Hook::Fallback => "query_fallback",
        }
    }
}

enum CallOutcome {
    Results(Vec<QueryResult>),
    Failed(String),
    Panicked(String),
    TimedOut,
}

struct Completed {
    plugin_id: String,
    ignore_auto_score: bool,
    outcome: CallOutcome,
}

pub struct QueryDispatcher {
    registry: Arc<PluginRegistry>,
    generations: Arc<GenerationTracker>,
    config: DispatchConfig,
}

impl QueryDispatcher {
    pub fn new(
        registry: Arc<PluginRegistry>,
        generations: Arc<GenerationTracker>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            registry,
            generations,
            config,
        }
    }

    #[must_use]
    pub fn generations(&self) -> &Arc<GenerationTracker> {
        &self.generations
    }

    /// Run `query` against every matching plugin for `session`.
    ///
    /// Returns `None` when a newer query for the same session started before
    /// this one finished; its results must not be shown.
    pub async fn dispatch(&self, session: &str, query: &Query) -> Option<DispatchOutcome> {
        let generation = self.generations.begin(session);
        let candidates = self.registry.match_for_query(query);
        debug!(
            "Dispatching '{}' (session {}, generation {}) to {} plugin(s)",
            query.raw_query,
            session,
            generation,
            candidates.len()
        );

        let calls = candidates
            .into_iter()
            .map(|instance| {
                let view = instance.query_view(query);
                (instance, view)
            })
            .collect();
        let batches = self
            .fan_out(session, generation, calls, Hook::Query)
            .await?;

        if !batches.is_empty() || !self.wants_fallback(query) {
            return self.finish(session, generation, batches, false);
        }

        let calls = self
            .registry
            .enabled()
            .into_iter()
            .map(|instance| {
                let view = instance.query_view(query);
                (instance, view)
            })
            .collect();
        let batches = self
            .fan_out(session, generation, calls, Hook::Fallback)
            .await?;
        let used_fallback = !batches.is_empty();
        self.finish(session, generation, batches, used_fallback)
    }

    fn wants_fallback(&self, query: &Query) -> bool {
        self.config.fallback
            && query.query_type == QueryType::Input
            && !query.raw_query.trim().is_empty()
    }

    fn finish(
        &self,
        session: &str,
        generation: u64,
        batches: Vec<ResultBatch>,
        used_fallback: bool,
    ) -> Option<DispatchOutcome> {
        if !self.generations.is_current(session, generation) {
            debug!(
                "Dropping stale generation {} for session {}",
                generation, session
            );
            return None;
        }
        Some(DispatchOutcome {
            session: session.to_string(),
            generation,
            batches,
            used_fallback,
        })
    }

    /// Invoke `hook` on every instance concurrently and gather what arrives
    /// within the query timeout, in completion order.
    ///
    /// Each plugin call runs on its own task, so a panic or a slow native
    /// plugin only affects its own batch. Calls that outlive the timeout or a
    /// superseded generation keep running detached; their output is ignored.
    async fn fan_out(
        &self,
        session: &str,
        generation: u64,
        calls: Vec<(Arc<PluginInstance>, Query)>,
        hook: Hook,
    ) -> Option<Vec<ResultBatch>> {
        let timeout = self.config.query_timeout();
        let mut tasks = JoinSet::new();

        for (instance, query) in calls {
            instance.mark_generation(generation);
            tasks.spawn(call_plugin(instance, query, hook, timeout));
        }

        let mut batches = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            if !self.generations.is_current(session, generation) {
                debug!(
                    "Generation {} for session {} superseded, dropping {} pending call(s)",
                    generation,
                    session,
                    tasks.len()
                );
                tasks.detach_all();
                return None;
            }

            let completed = match joined {
                Ok(completed) => completed,
                Err(e) => {
                    error!("Dispatch task failed: {}", e);
                    continue;
                }
            };

            match completed.outcome {
                CallOutcome::Results(results) if results.is_empty() => {
                    trace!("[{}] No results", completed.plugin_id);
                }
                CallOutcome::Results(results) => {
                    trace!(
                        "[{}] {} result(s) for generation {}",
                        completed.plugin_id,
                        results.len(),
                        generation
                    );
                    batches.push(ResultBatch {
                        plugin_id: completed.plugin_id,
                        ignore_auto_score: completed.ignore_auto_score,
                        is_fallback: hook == Hook::Fallback,
                        results,
                    });
                }
                CallOutcome::Failed(reason) => {
                    warn!(
                        "[{}] {} failed: {}",
                        completed.plugin_id,
                        hook.name(),
                        reason
                    );
                }
                CallOutcome::Panicked(reason) => {
                    error!(
                        "[{}] {} panicked: {}",
                        completed.plugin_id,
                        hook.name(),
                        reason
                    );
                }
                CallOutcome::TimedOut => {
                    debug!(
                        "[{}] {} timed out after {:?}",
                        completed.plugin_id,
                        hook.name(),
                        timeout
                    );
                }
            }
        }

        Some(batches)
    }
}

async fn call_plugin(
    instance: Arc<PluginInstance>,
    query: Query,
    hook: Hook,
    timeout: Duration,
) -> Completed {
    let handle = instance.handle();
    let call = tokio::spawn(async move {
        match hook {
            Hook::Query => handle.query(&query).await,
            Hook::Fallback => handle.query_fallback(&query).await,
        }
    });

    let outcome = match tokio::time::timeout(timeout, call).await {
        Ok(Ok(Ok(results))) => CallOutcome::Results(results),
        Ok(Ok(Err(e))) => CallOutcome::Failed(e.to_string()),
        Ok(Err(join_error)) => CallOutcome::Panicked(join_error.to_string()),
        Err(_) => CallOutcome::TimedOut,
    };

    Completed {
        plugin_id: instance.id().to_string(),
        ignore_auto_score: instance.ignores_auto_score(),
        outcome,
    }
}

impl std::fmt::Debug for QueryDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryDispatcher")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
