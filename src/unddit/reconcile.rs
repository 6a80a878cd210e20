use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::unddit::record::{Record, is_deleted, is_placeholder, is_removed};

/// How one live record changed its canonical counterpart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Inserted,
    Removed,
    Deleted,
    Restored,
    Edited,
    Unchanged,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeStats {
    pub inserted: usize,
    pub removed: usize,
    pub deleted: usize,
    pub restored: usize,
    pub edited: usize,
    pub unchanged: usize,
}

impl MergeStats {
    fn count(&mut self, class: Classification) {
        match class {
            Classification::Inserted => self.inserted += 1,
            Classification::Removed => self.removed += 1,
            Classification::Deleted => self.deleted += 1,
            Classification::Restored => self.restored += 1,
            Classification::Edited => self.edited += 1,
            Classification::Unchanged => self.unchanged += 1,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadStats {
    pub total: usize,
    pub removed: usize,
    pub deleted: usize,
}

/// Apply one live record to an archived one.
///
/// Precedence: a live removal/deletion placeholder wins, then a restored
/// archive placeholder, then body divergence. Re-applying the same live
/// record leaves the canonical record unchanged.
pub fn merge_live(canonical: &mut Record, live: Record) -> Classification {
    if is_removed(&live.body) {
        canonical.score = live.score;
        canonical.mark_removed();
        return Classification::Removed;
    }
    if is_deleted(&live.body) {
        canonical.score = live.score;
        canonical.mark_deleted();
        return Classification::Deleted;
    }

    canonical.removed = false;
    canonical.deleted = false;

    if is_placeholder(&canonical.body) {
        // A moderator put it back; the live copy is the real content.
        canonical.kind = live.kind;
        canonical.parent_id = live.parent_id;
        canonical.link_id = live.link_id;
        canonical.author = live.author;
        canonical.body = live.body;
        canonical.score = live.score;
        if live.created_utc > 0 {
            canonical.created_utc = live.created_utc;
        }
        if live.subreddit.is_some() {
            canonical.subreddit = live.subreddit;
        }
        canonical.clear_edit();
        return Classification::Restored;
    }

    canonical.score = live.score;
    if canonical.body != live.body {
        canonical.edited_body = Some(live.body);
        canonical.edited_utc = live.edited_utc;
        Classification::Edited
    } else {
        canonical.clear_edit();
        Classification::Unchanged
    }
}

/// Owner of the canonical id -> record mapping of one thread view.
#[derive(Debug, Clone)]
pub struct Reconciler {
    thread_id: String,
    records: HashMap<String, Record>,
    requested: HashSet<String>,
    archived: HashSet<String>,
    include_missing_parents: bool,
    revision: u64,
}

impl Reconciler {
    pub fn new(thread_id: impl Into<String>, include_missing_parents: bool) -> Self {
        Self {
            thread_id: thread_id.into(),
            records: HashMap::new(),
            requested: HashSet::new(),
            archived: HashSet::new(),
            include_missing_parents,
            revision: 0,
        }
    }

    pub fn from_records(thread_id: impl Into<String>, records: Vec<Record>) -> Self {
        let mut out = Self::new(thread_id, false);
        for record in records {
            out.requested.insert(record.id.clone());
            out.archived.insert(record.id.clone());
            out.records.insert(record.id.clone(), record);
        }
        out
    }

    pub fn records(&self) -> &HashMap<String, Record> {
        &self.records
    }

    pub fn get(&self, id: &str) -> Option<&Record> {
        self.records.get(id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Bumped on every mutation of the mapping.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn stats(&self) -> ThreadStats {
        self.records.values().fold(
            ThreadStats {
                total: self.records.len(),
                ..ThreadStats::default()
            },
            |mut stats, record| {
                stats.removed += usize::from(record.removed);
                stats.deleted += usize::from(record.deleted);
                stats
            },
        )
    }

    /// Merge one archive page; returns the ids that still need a live lookup.
    pub fn ingest(&mut self, page: Vec<Record>) -> Vec<String> {
        let mut lookups = Vec::new();
        let mut inserted = Vec::new();
        for record in page {
            if !self.archived.insert(record.id.clone()) {
                continue;
            }
            if let Some(live) = self.records.remove(&record.id) {
                // Known so far only from the live source: the archive copy
                // becomes the base and the live copy is applied on top.
                let mut record = record;
                merge_live(&mut record, live);
                self.records.insert(record.id.clone(), record);
                self.revision += 1;
                continue;
            }
            if self.requested.insert(record.id.clone()) {
                lookups.push(record.id.clone());
            }
            inserted.push(record.id.clone());
            self.records.insert(record.id.clone(), record);
        }
        if !inserted.is_empty() {
            self.revision += 1;
        }

        if self.include_missing_parents {
            for id in &inserted {
                let Some(record) = self.records.get(id) else {
                    continue;
                };
                let parent = &record.parent_id;
                if parent == &self.thread_id
                    || parent == &record.link_id
                    || self.records.contains_key(parent)
                {
                    continue;
                }
                if self.requested.insert(parent.clone()) {
                    lookups.push(parent.clone());
                }
            }
        }
        lookups
    }

    /// Merge live lookups into the mapping. Safe to repeat.
    pub fn finalize(&mut self, live: Vec<Record>) -> MergeStats {
        let mut stats = MergeStats::default();
        for record in live {
            let before = self.records.get(&record.id).cloned();
            let class = match self.records.get_mut(&record.id) {
                Some(canonical) => merge_live(canonical, record),
                None => {
                    let mut record = record;
                    if is_removed(&record.body) {
                        record.mark_removed();
                    } else if is_deleted(&record.body) {
                        record.mark_deleted();
                    }
                    self.requested.insert(record.id.clone());
                    self.records.insert(record.id.clone(), record);
                    Classification::Inserted
                }
            };
            let changed = match (&before, class) {
                (None, _) => true,
                (Some(before), _) => self.records.get(&before.id) != Some(before),
            };
            if changed {
                self.revision += 1;
            }
            stats.count(class);
        }
        stats
    }

    /// Put a record in place as-is, e.g. the permalink parent chain.
    pub fn insert_context(&mut self, records: Vec<Record>) -> MergeStats {
        self.finalize(records)
    }
}
