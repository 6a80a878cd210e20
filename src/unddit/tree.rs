use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::unddit::record::Record;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum SortOrder {
    #[default]
    Top,
    Bottom,
    New,
    Old,
}

impl SortOrder {
    pub fn label(self) -> &'static str {
        match self {
            SortOrder::Top => "top",
            SortOrder::Bottom => "bottom",
            SortOrder::New => "new",
            SortOrder::Old => "old",
        }
    }

    /// Total order: ties on the primary key fall back to creation time, then id.
    pub fn compare(self, a: Option<&Record>, b: Option<&Record>) -> Ordering {
        match self {
            SortOrder::Top => score_key(b).cmp(&score_key(a)),
            SortOrder::Bottom => score_key(a).cmp(&score_key(b)),
            SortOrder::New => time_key(b).cmp(&time_key(a)),
            SortOrder::Old => time_key(a).cmp(&time_key(b)),
        }
    }
}

fn score_key(record: Option<&Record>) -> (i64, i64, &str) {
    record
        .map(|r| (r.score, r.created_utc, r.id.as_str()))
        .unwrap_or((0, 0, ""))
}

fn time_key(record: Option<&Record>) -> (i64, &str) {
    record
        .map(|r| (r.created_utc, r.id.as_str()))
        .unwrap_or((0, ""))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum CommentFilter {
    All,
    #[default]
    RemovedDeleted,
    Removed,
    Deleted,
}

impl CommentFilter {
    pub fn label(self) -> &'static str {
        match self {
            CommentFilter::All => "all",
            CommentFilter::RemovedDeleted => "removed-deleted",
            CommentFilter::Removed => "removed",
            CommentFilter::Deleted => "deleted",
        }
    }

    pub fn matches(self, record: &Record) -> bool {
        match self {
            CommentFilter::All => true,
            CommentFilter::RemovedDeleted => record.removed || record.deleted,
            CommentFilter::Removed => record.removed,
            CommentFilter::Deleted => record.deleted,
        }
    }
}

/// Tree nodes only carry ids; bodies stay in the canonical mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TreeNode {
    pub id: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub context: bool,
    pub replies: Vec<TreeNode>,
}

impl TreeNode {
    fn leaf(id: &str) -> Self {
        Self {
            id: id.to_string(),
            context: false,
            replies: Vec::new(),
        }
    }

    pub fn count(&self) -> usize {
        1 + self.replies.iter().map(TreeNode::count).sum::<usize>()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct BuildKey {
    total: usize,
    root: String,
    context_depth: usize,
}

#[derive(Debug)]
struct View {
    filter: CommentFilter,
    sort: SortOrder,
    tree: Vec<TreeNode>,
}

/// Builds the display forest and keeps enough of the last build around to
/// avoid redoing work when only the filter or only the sort changes.
#[derive(Debug, Default)]
pub struct CommentTreeBuilder {
    key: Option<BuildKey>,
    sorted_base: Option<(SortOrder, Vec<TreeNode>)>,
    view: Option<View>,
    orphans: Vec<String>,
    unreachable: Vec<String>,
    full_builds: usize,
    resorts: usize,
    refilters: usize,
}

impl CommentTreeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Force the next `build` to start from scratch (e.g. after records
    /// were reclassified without changing their count).
    pub fn invalidate(&mut self) {
        self.key = None;
    }

    pub fn orphans(&self) -> &[String] {
        &self.orphans
    }

    /// Comments whose parents only lead back to each other.
    pub fn unreachable(&self) -> &[String] {
        &self.unreachable
    }

    pub fn full_builds(&self) -> usize {
        self.full_builds
    }

    pub fn resorts(&self) -> usize {
        self.resorts
    }

    pub fn refilters(&self) -> usize {
        self.refilters
    }

    pub fn build(
        &mut self,
        records: &HashMap<String, Record>,
        root_id: &str,
        filter: CommentFilter,
        sort: SortOrder,
        context_depth: usize,
    ) -> &[TreeNode] {
        let key = BuildKey {
            total: records.len(),
            root: root_id.to_string(),
            context_depth,
        };
        if self.key.as_ref() != Some(&key) {
            self.orphans.clear();
            self.unreachable.clear();
            let mut base = assemble(
                records,
                root_id,
                context_depth,
                &mut self.orphans,
                &mut self.unreachable,
            );
            sort_forest(&mut base, records, sort);
            self.sorted_base = Some((sort, base));
            self.view = None;
            self.key = Some(key);
            self.full_builds += 1;
        }

        match self.view.as_mut() {
            Some(view) if view.filter == filter && view.sort == sort => {}
            Some(view) if view.filter == filter => {
                sort_forest(&mut view.tree, records, sort);
                view.sort = sort;
                self.resorts += 1;
            }
            _ => {
                let mut tree = match self.sorted_base.as_mut() {
                    Some((base_sort, base)) => {
                        if *base_sort != sort {
                            sort_forest(base, records, sort);
                            *base_sort = sort;
                            self.resorts += 1;
                        }
                        base.clone()
                    }
                    None => Vec::new(),
                };
                filter_forest(&mut tree, records, filter);
                self.refilters += 1;
                self.view = Some(View { filter, sort, tree });
            }
        }

        self.view.as_ref().map(|v| v.tree.as_slice()).unwrap_or(&[])
    }
}

fn assemble(
    records: &HashMap<String, Record>,
    root_id: &str,
    context_depth: usize,
    orphans: &mut Vec<String>,
    unreachable: &mut Vec<String>,
) -> Vec<TreeNode> {
    let mut children: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut top = Vec::new();
    for record in records.values().filter(|r| !r.is_post()) {
        let parent = record.parent_id.as_str();
        if parent != record.id && records.contains_key(parent) {
            children.entry(parent).or_default().push(record.id.as_str());
        } else if parent == root_id {
            top.push(record.id.as_str());
        } else if parent == record.link_id {
            log::debug!(
                "top-level comment {} is outside the view rooted at {root_id}",
                record.id
            );
        } else {
            log::warn!(
                "orphaned comment {} (parent {} not loaded); left out of the tree",
                record.id,
                parent
            );
            orphans.push(record.id.clone());
        }
    }

    let mut visited = HashSet::new();
    let single_comment = records.get(root_id).filter(|r| !r.is_post());
    match single_comment {
        Some(root) => {
            let mut node = grow(root.id.as_str(), &children, &mut visited);
            let mut cursor = root.parent_id.as_str();
            for _ in 0..context_depth {
                let Some(parent) = records.get(cursor) else {
                    break;
                };
                if parent.is_post() || !visited.insert(parent.id.as_str()) {
                    break;
                }
                node = TreeNode {
                    id: parent.id.clone(),
                    context: true,
                    replies: vec![node],
                };
                cursor = parent.parent_id.as_str();
            }
            vec![node]
        }
        None => {
            let forest = top
                .iter()
                .map(|id| grow(*id, &children, &mut visited))
                .collect::<Vec<_>>();
            let orphan_set = orphans.iter().map(String::as_str).collect::<HashSet<_>>();
            unreachable.extend(
                records
                    .values()
                    .filter(|r| {
                        !r.is_post()
                            && r.link_id == root_id
                            && !visited.contains(r.id.as_str())
                            && !orphan_set.contains(r.id.as_str())
                    })
                    .map(|r| r.id.clone()),
            );
            if !unreachable.is_empty() {
                unreachable.sort_unstable();
                log::warn!(
                    "comments unreachable from {root_id} (cyclic parents): {}",
                    unreachable.join(",")
                );
            }
            forest
        }
    }
}

fn grow<'a>(
    id: &'a str,
    children: &HashMap<&'a str, Vec<&'a str>>,
    visited: &mut HashSet<&'a str>,
) -> TreeNode {
    let mut node = TreeNode::leaf(id);
    if !visited.insert(id) {
        return node;
    }
    for kid in children.get(id).into_iter().flatten() {
        if !visited.contains(*kid) {
            node.replies.push(grow(*kid, children, visited));
        }
    }
    node
}

/// Keep nodes that match or have a matching descendant.
fn filter_forest(
    nodes: &mut Vec<TreeNode>,
    records: &HashMap<String, Record>,
    filter: CommentFilter,
) -> bool {
    if filter == CommentFilter::All {
        return !nodes.is_empty();
    }
    nodes.retain_mut(|node| {
        let replies_ok = filter_forest(&mut node.replies, records, filter);
        replies_ok || records.get(&node.id).is_some_and(|r| filter.matches(r))
    });
    !nodes.is_empty()
}

fn sort_forest(nodes: &mut [TreeNode], records: &HashMap<String, Record>, sort: SortOrder) {
    nodes.sort_by(|a, b| sort.compare(records.get(&a.id), records.get(&b.id)));
    for node in nodes.iter_mut() {
        sort_forest(&mut node.replies, records, sort);
    }
}
