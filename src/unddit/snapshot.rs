use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::unddit::contig::{Contig, ContigList};
use crate::unddit::orchestrator::ThreadOrchestrator;
use crate::unddit::reconcile::{Reconciler, ThreadStats};
use crate::unddit::record::Record;

/// A thread view frozen to disk for offline tree building.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreadSnapshot {
    pub schema_version: u32,
    pub thread_id: String,
    pub comment_id: Option<String>,
    pub saved_at_epoch_secs: i64,
    pub post: Option<Record>,
    pub stats: ThreadStats,
    pub contigs: Vec<Contig>,
    pub records: Vec<Record>,
}

impl Default for ThreadSnapshot {
    fn default() -> Self {
        Self {
            schema_version: 1,
            thread_id: String::new(),
            comment_id: None,
            saved_at_epoch_secs: 0,
            post: None,
            stats: ThreadStats::default(),
            contigs: Vec::new(),
            records: Vec::new(),
        }
    }
}

impl ThreadSnapshot {
    pub fn capture(view: &ThreadOrchestrator, saved_at_epoch_secs: i64) -> Self {
        let mut records = view.reconciler().records().values().cloned().collect::<Vec<_>>();
        records.sort_by(|a, b| a.created_utc.cmp(&b.created_utc).then_with(|| a.id.cmp(&b.id)));
        Self {
            schema_version: 1,
            thread_id: view.target().thread_id.clone(),
            comment_id: view.target().comment_id.clone(),
            saved_at_epoch_secs,
            post: view.post().cloned(),
            stats: view.stats(),
            contigs: view.contigs().as_slice().to_vec(),
            records,
        }
    }

    pub fn reconciler(&self) -> Reconciler {
        Reconciler::from_records(self.thread_id.clone(), self.records.clone())
    }

    pub fn contig_list(&self) -> ContigList {
        ContigList::from_contigs(self.contigs.clone())
    }
}

pub fn load(file: &Path) -> Result<ThreadSnapshot> {
    let raw =
        fs::read_to_string(file).with_context(|| format!("failed to read {}", file.display()))?;
    let parsed: ThreadSnapshot = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse {}", file.display()))?;
    if parsed.thread_id.is_empty() {
        anyhow::bail!("snapshot {} has no thread_id", file.display());
    }
    Ok(parsed)
}

pub fn save(file: &Path, snapshot: &ThreadSnapshot) -> Result<()> {
    if let Some(parent) = file.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let data = serde_json::to_string_pretty(snapshot)?;
    fs::write(file, format!("{data}\n"))
        .with_context(|| format!("failed to write {}", file.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_then_load_keeps_records_and_contigs() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("nested").join("abc.json");
        let mut removed = Record::comment("a", "abc", "abc");
        removed.removed = true;
        let snapshot = ThreadSnapshot {
            thread_id: "abc".to_string(),
            records: vec![removed, Record::comment("b", "a", "abc")],
            contigs: vec![Contig {
                first_created: 1,
                last_created: Some(9),
                loaded_all_comments: true,
            }],
            ..ThreadSnapshot::default()
        };
        save(&file, &snapshot).expect("save");

        let loaded = load(&file).expect("load");
        let recon = loaded.reconciler();
        assert_eq!(recon.len(), 2);
        assert_eq!(recon.stats().removed, 1);
        assert_eq!(loaded.contig_list().len(), 1);
    }

    #[test]
    fn load_rejects_snapshot_without_thread() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("empty.json");
        fs::write(&file, "{}").expect("write");
        assert!(load(&file).is_err());
    }
}
