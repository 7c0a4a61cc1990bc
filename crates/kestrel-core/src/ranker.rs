//! Merge per-plugin result batches into one ordered list.
//!
//! Ordering, in priority:
//! 1. Groups by descending group score, then by first appearance.
//! 2. Within a group, descending score. Ties keep arrival order.
//! 3. Plugins declaring `ignoreAutoScore` keep their own emission order:
//!    their results in a group move as one block, placed by the block's
//!    best score.

use std::collections::{HashMap, HashSet};

use kestrel_types::{QueryResult, RankedResult};
use tracing::trace;

/// Results one plugin returned for one dispatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultBatch {
    pub plugin_id: String,
    pub ignore_auto_score: bool,
    pub is_fallback: bool,
    pub results: Vec<QueryResult>,
}

impl ResultBatch {
    #[must_use]
    pub fn new(plugin_id: impl Into<String>, results: Vec<QueryResult>) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            ignore_auto_score: false,
            is_fallback: false,
            results,
        }
    }

    #[must_use]
    pub fn ignoring_auto_score(mut self) -> Self {
        self.ignore_auto_score = true;
        self
    }

    #[must_use]
    pub fn fallback(mut self) -> Self {
        self.is_fallback = true;
        self
    }
}

struct Unit {
    key: i64,
    items: Vec<RankedResult>,
}

struct Group {
    score: i64,
    first_seen: usize,
    units: Vec<Unit>,
    /// plugin id -> index into `units` for opted-out plugins
    blocks: HashMap<String, usize>,
}

impl Group {
    fn new(first_seen: usize) -> Self {
        Self {
            score: i64::MIN,
            first_seen,
            units: Vec::new(),
            blocks: HashMap::new(),
        }
    }

    fn push(&mut self, item: RankedResult, ignore_auto_score: bool) {
        self.score = self.score.max(item.result.group_score);
        let score = item.result.score;

        if !ignore_auto_score {
            self.units.push(Unit {
                key: score,
                items: vec![item],
            });
            return;
        }

        if let Some(&index) = self.blocks.get(&item.plugin_id) {
            let unit = &mut self.units[index];
            unit.key = unit.key.max(score);
            unit.items.push(item);
        } else {
            self.blocks.insert(item.plugin_id.clone(), self.units.len());
            self.units.push(Unit {
                key: score,
                items: vec![item],
            });
        }
    }

    fn into_sorted(mut self) -> Vec<RankedResult> {
        // stable: equal keys keep first-appearance order
        self.units.sort_by(|a, b| b.key.cmp(&a.key));
        self.units.into_iter().flat_map(|u| u.items).collect()
    }
}

/// Merge batches (in arrival order) into the final ranked list.
///
/// Results without an id, or whose id was already used earlier in the same
/// merge, are shown under a fresh UUID. The id the plugin issued stays in
/// `source_id` so actions and updates still reach the plugin by its own id.
#[must_use]
pub fn rank(batches: Vec<ResultBatch>) -> Vec<RankedResult> {
    let mut groups: Vec<Group> = Vec::new();
    let mut group_index: HashMap<String, usize> = HashMap::new();
    let mut seen_ids: HashSet<String> = HashSet::new();
    let mut seq = 0usize;

    for batch in batches {
        for mut result in batch.results {
            let source_id = result.id.clone();
            if result.id.is_empty() || seen_ids.contains(&result.id) {
                let id = uuid::Uuid::new_v4().to_string();
                if !result.id.is_empty() {
                    trace!(
                        "[{}] Duplicate result id '{}', reassigned to {}",
                        batch.plugin_id, result.id, id
                    );
                }
                result.id = id;
            }
            seen_ids.insert(result.id.clone());

            let index = *group_index.entry(result.group.clone()).or_insert_with(|| {
                groups.push(Group::new(seq));
                groups.len() - 1
            });
            groups[index].push(
                RankedResult {
                    plugin_id: batch.plugin_id.clone(),
                    is_fallback: batch.is_fallback,
                    source_id: if source_id.is_empty() {
                        result.id.clone()
                    } else {
                        source_id
                    },
                    result,
                },
                batch.ignore_auto_score,
            );
            seq += 1;
        }
    }

    groups.sort_by(|a, b| b.score.cmp(&a.score).then(a.first_seen.cmp(&b.first_seen)));
    groups.into_iter().flat_map(Group::into_sorted).collect()
}
