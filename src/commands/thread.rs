use anyhow::{Context, Result};
use std::sync::Arc;

use crate::cli::ThreadArgs;
use crate::commands::CommandReport;
use crate::commands::tree::{post_line, render_forest, stats_line, tree_data};
use crate::error::SourceError;
use crate::sources::build_sources;
use crate::unddit::config::{UndditConfig, normalize_max_comments};
use crate::unddit::ids::strip_kind_prefix;
use crate::unddit::orchestrator::{ThreadOrchestrator, ThreadTarget};
use crate::unddit::snapshot::{self, ThreadSnapshot};
use crate::unddit::status::LogSink;
use crate::unddit::util::now_epoch_secs;

fn target_from_args(cfg: &UndditConfig, args: &ThreadArgs) -> ThreadTarget {
    let thread_id = strip_kind_prefix(args.thread_id.trim());
    match args.comment.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
        Some(comment) => ThreadTarget::comment(
            thread_id,
            strip_kind_prefix(comment),
            args.context.unwrap_or(cfg.comments.context_depth),
        ),
        None => ThreadTarget::thread(thread_id),
    }
}

pub fn run(cfg: &UndditConfig, args: &ThreadArgs) -> Result<CommandReport> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    runtime.block_on(run_view(cfg, args))
}

async fn run_view(cfg: &UndditConfig, args: &ThreadArgs) -> Result<CommandReport> {
    let mut report = CommandReport::new("thread");
    let target = target_from_args(cfg, args);
    if target.thread_id.is_empty() {
        report.issue("thread id is empty");
        return Ok(report);
    }

    let sources = build_sources(cfg)?;
    let mut view = ThreadOrchestrator::new(
        sources,
        Arc::new(LogSink),
        target,
        cfg.comments.flush_threshold,
    );

    let cancel = view.cancel_token();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("interrupted; abandoning thread view");
            cancel.cancel();
        }
    });

    let max_comments = args
        .max_comments
        .map(normalize_max_comments)
        .unwrap_or(cfg.comments.max_comments);
    let mut cancelled = matches!(view.open(max_comments).await, Err(SourceError::Cancelled));
    for &count in &args.more {
        if cancelled {
            break;
        }
        cancelled = matches!(
            view.load_more(count, false).await,
            Err(SourceError::Cancelled)
        );
    }
    interrupt.abort();

    if cancelled {
        report.issue(format!(
            "{}: thread view abandoned before loading finished",
            SourceError::Cancelled.code().as_str()
        ));
        return Ok(report);
    }

    for err in view.errors() {
        match err.help_url() {
            Some(url) => report.issue(format!(
                "{}: {} (see {url})",
                err.code().as_str(),
                err.user_message()
            )),
            None => report.issue(format!("{}: {}", err.code().as_str(), err.user_message())),
        }
    }

    let filter = args.filter.unwrap_or(cfg.comments.filter);
    let sort = args.sort.unwrap_or(cfg.comments.sort);
    let stats = view.stats();
    let thread_id = view.target().thread_id.clone();
    report.detail(format!(
        "thread={thread_id} root={} state={}",
        view.target().root_id(),
        view.state().label()
    ));
    if let Some(post) = view.post() {
        report.detail(post_line(post));
    }
    report.detail(stats_line(&stats));
    report.detail(format!(
        "contigs={} loaded_all_comments={}",
        view.contigs().len(),
        view.loaded_all_comments()
    ));

    let forest = view.tree(filter, sort).to_vec();
    report.detail(format!(
        "sort={} filter={} shown={}",
        sort.label(),
        filter.label(),
        forest.iter().map(|n| n.count()).sum::<usize>()
    ));
    if !view.orphans().is_empty() {
        report.detail(format!("orphans={}", view.orphans().join(",")));
    }
    if !view.unreachable().is_empty() {
        report.detail(format!("unreachable={}", view.unreachable().join(",")));
    }

    let now = now_epoch_secs()?;
    let records = view.reconciler().records();
    for line in render_forest(&forest, records, cfg.removal.archive_cutover_utc, now) {
        report.detail(line);
    }
    report.data = Some(tree_data(&forest, records, view.post(), &stats));

    if let Some(path) = &args.save {
        snapshot::save(path, &ThreadSnapshot::capture(&view, now))?;
        report.detail(format!("snapshot={}", path.display()));
    }
    Ok(report)
}
