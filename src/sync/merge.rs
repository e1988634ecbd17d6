use std::collections::{HashMap, HashSet};

use crate::models::{Settings, VocabList};

/// Local-only lists younger than this survive a merge; older ones are
/// treated as deleted remotely.
pub const RECENT_WINDOW_MS: i64 = 30_000;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub kept_local: usize,
    pub took_remote: usize,
    pub remote_only: usize,
    pub recent_local: usize,
    pub dropped_local: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MergeResult {
    pub lists: Vec<VocabList>,
    pub report: MergeReport,
}

#[derive(Debug, Clone, Copy)]
pub struct ListMerger {
    recent_window_ms: i64,
}

impl Default for ListMerger {
    fn default() -> Self {
        Self::new(RECENT_WINDOW_MS)
    }
}

impl ListMerger {
    pub fn new(recent_window_ms: i64) -> Self {
        Self { recent_window_ms }
    }

    pub fn recent_window_ms(&self) -> i64 {
        self.recent_window_ms
    }

    /// Whole-record merge keyed by id. Remote order comes first, then the
    /// surviving local-only lists in local order.
    pub fn merge(&self, local: &[VocabList], remote: &[VocabList], now: i64) -> MergeResult {
        let local_by_id: HashMap<&str, &VocabList> = local.iter().map(|l| (l.id.as_str(), l)).collect();
        let remote_ids: HashSet<&str> = remote.iter().map(|l| l.id.as_str()).collect();

        let mut report = MergeReport::default();
        let mut seen: HashSet<&str> = HashSet::with_capacity(local.len() + remote.len());
        let mut lists = Vec::with_capacity(local.len().max(remote.len()));

        for remote_list in remote {
            if !seen.insert(remote_list.id.as_str()) {
                continue;
            }
            match local_by_id.get(remote_list.id.as_str()) {
                Some(local_list) if local_list.merge_timestamp() >= remote_list.merge_timestamp() => {
                    report.kept_local += 1;
                    lists.push((*local_list).clone());
                }
                Some(_) => {
                    report.took_remote += 1;
                    lists.push(remote_list.clone());
                }
                None => {
                    report.remote_only += 1;
                    lists.push(remote_list.clone());
                }
            }
        }

        for local_list in local {
            if remote_ids.contains(local_list.id.as_str()) || !seen.insert(local_list.id.as_str()) {
                continue;
            }
            if now - local_list.created_at < self.recent_window_ms {
                report.recent_local += 1;
                lists.push(local_list.clone());
            } else {
                report.dropped_local.push(local_list.id.clone());
            }
        }

        MergeResult { lists, report }
    }
}

/// Remote settings win every field except the secret, which never leaves
/// the device.
pub fn merge_settings(local: &Settings, remote: Option<Settings>) -> Settings {
    match remote {
        Some(remote) => remote.with_secret_from(local),
        None => local.clone(),
    }
}

/// Local has data the remote has never seen: the user must decide.
pub fn is_first_sync(local: &[VocabList], remote: &[VocabList]) -> bool {
    !local.is_empty() && remote.is_empty()
}
