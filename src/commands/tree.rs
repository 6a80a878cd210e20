use anyhow::Result;
use serde_json::json;
use std::collections::{BTreeMap, HashMap};

use crate::cli::TreeArgs;
use crate::commands::CommandReport;
use crate::unddit::config::UndditConfig;
use crate::unddit::ids::strip_kind_prefix;
use crate::unddit::live::MAX_CONTEXT_DEPTH;
use crate::unddit::reconcile::ThreadStats;
use crate::unddit::record::Record;
use crate::unddit::removal::{pretty_age, removal_note};
use crate::unddit::snapshot;
use crate::unddit::tree::{CommentTreeBuilder, TreeNode};
use crate::unddit::util::{now_epoch_secs, one_line_preview};

const PREVIEW_CHARS: usize = 100;

pub(crate) fn stats_line(stats: &ThreadStats) -> String {
    format!(
        "comments={} removed={} deleted={}",
        stats.total, stats.removed, stats.deleted
    )
}

pub(crate) fn post_line(post: &Record) -> String {
    let created = chrono::DateTime::from_timestamp(post.created_utc, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| post.created_utc.to_string());
    let state = if post.removed {
        " [removed]"
    } else if post.deleted {
        " [deleted]"
    } else {
        ""
    };
    format!(
        "post={} title={:?} author={} created={created}{state}",
        post.id,
        post.title.as_deref().unwrap_or(""),
        display_author(post),
    )
}

fn display_author(record: &Record) -> &str {
    if record.author.is_empty() {
        "[unknown]"
    } else {
        record.author.as_str()
    }
}

/// One outline row: id, author, score, age, state tags, then the text or
/// the reason there is no text.
pub(crate) fn describe(record: &Record, context: bool, cutover_utc: i64, now: i64) -> String {
    let mut tags = Vec::new();
    if context {
        tags.push("context");
    }
    if record.removed {
        tags.push("removed");
    } else if record.deleted {
        tags.push("deleted");
    }
    if record.edited_body.is_some() {
        tags.push("edited");
    }
    let tags = if tags.is_empty() {
        String::new()
    } else {
        format!(" [{}]", tags.join(","))
    };
    let text = match removal_note(record, cutover_utc) {
        Some(note) => note.to_string(),
        None => one_line_preview(&record.body, PREVIEW_CHARS),
    };
    format!(
        "{} {} {}pts {}{tags}: {text}",
        record.id,
        display_author(record),
        record.score,
        pretty_age(record.created_utc, now),
    )
}

fn render_node(
    node: &TreeNode,
    depth: usize,
    records: &HashMap<String, Record>,
    cutover_utc: i64,
    now: i64,
    lines: &mut Vec<String>,
) {
    let indent = "  ".repeat(depth);
    match records.get(&node.id) {
        Some(record) => lines.push(format!(
            "{indent}{}",
            describe(record, node.context, cutover_utc, now)
        )),
        None => lines.push(format!("{indent}{} [missing]", node.id)),
    }
    for reply in &node.replies {
        render_node(reply, depth + 1, records, cutover_utc, now, lines);
    }
}

/// Indented outline of a forest, two spaces per level.
pub(crate) fn render_forest(
    forest: &[TreeNode],
    records: &HashMap<String, Record>,
    cutover_utc: i64,
    now: i64,
) -> Vec<String> {
    let mut lines = Vec::new();
    for node in forest {
        render_node(node, 0, records, cutover_utc, now, &mut lines);
    }
    lines
}

fn collect_ids<'a>(forest: &'a [TreeNode], out: &mut Vec<&'a str>) {
    for node in forest {
        out.push(node.id.as_str());
        collect_ids(&node.replies, out);
    }
}

/// Tree plus the records it references, keyed by id.
pub(crate) fn tree_data(
    forest: &[TreeNode],
    records: &HashMap<String, Record>,
    post: Option<&Record>,
    stats: &ThreadStats,
) -> serde_json::Value {
    let mut ids = Vec::new();
    collect_ids(forest, &mut ids);
    let shown = ids
        .into_iter()
        .filter_map(|id| records.get(id).map(|r| (id, r)))
        .collect::<BTreeMap<_, _>>();
    json!({
        "post": post,
        "stats": stats,
        "tree": forest,
        "records": shown,
    })
}

pub fn run(cfg: &UndditConfig, args: &TreeArgs) -> Result<CommandReport> {
    let mut report = CommandReport::new("tree");
    let snap = snapshot::load(&args.snapshot)?;
    let reconciler = snap.reconciler();

    let root = args
        .root
        .as_deref()
        .map(strip_kind_prefix)
        .or(snap.comment_id.as_deref())
        .unwrap_or(snap.thread_id.as_str())
        .to_string();
    let context_depth = if root == snap.thread_id {
        0
    } else {
        usize::from(
            args.context
                .unwrap_or(cfg.comments.context_depth)
                .min(MAX_CONTEXT_DEPTH),
        )
    };
    let filter = args.filter.unwrap_or(cfg.comments.filter);
    let sort = args.sort.unwrap_or(cfg.comments.sort);

    let mut builder = CommentTreeBuilder::new();
    let forest = builder
        .build(reconciler.records(), &root, filter, sort, context_depth)
        .to_vec();

    report.detail(format!("thread={} root={root}", snap.thread_id));
    if let Some(post) = &snap.post {
        report.detail(post_line(post));
    }
    let stats = reconciler.stats();
    report.detail(stats_line(&stats));
    let contigs = snap.contig_list();
    report.detail(format!(
        "contigs={} loaded_all_comments={}",
        contigs.len(),
        contigs.as_slice().iter().any(|c| c.loaded_all_comments)
    ));
    report.detail(format!(
        "sort={} filter={} shown={}",
        sort.label(),
        filter.label(),
        forest.iter().map(TreeNode::count).sum::<usize>()
    ));
    if !builder.orphans().is_empty() {
        report.detail(format!("orphans={}", builder.orphans().join(",")));
    }
    if !builder.unreachable().is_empty() {
        report.detail(format!("unreachable={}", builder.unreachable().join(",")));
    }
    if root != snap.thread_id && reconciler.get(&root).is_none() {
        report.issue(format!("comment {root} is not in snapshot"));
    }

    let now = now_epoch_secs()?;
    for line in render_forest(
        &forest,
        reconciler.records(),
        cfg.removal.archive_cutover_utc,
        now,
    ) {
        report.detail(line);
    }
    report.data = Some(tree_data(
        &forest,
        reconciler.records(),
        snap.post.as_ref(),
        &stats,
    ));
    Ok(report)
}
