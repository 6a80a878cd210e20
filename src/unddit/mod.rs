pub mod archive;
pub mod config;
pub mod contig;
pub mod ids;
pub mod live;
pub mod orchestrator;
pub mod rate_limit;
pub mod reconcile;
pub mod record;
pub mod removal;
pub mod retry;
pub mod snapshot;
pub mod status;
pub mod tree;
pub mod util;
pub mod warn;

#[cfg(test)]
pub mod test_support;
