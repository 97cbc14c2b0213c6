//! rsshub: a background RSS/Atom aggregator whose fetch interval and worker
//! count can be changed while it runs, from a separate invocation of the CLI.

pub mod aggregator;
pub mod cli;
pub mod config;
pub mod control;
pub mod feed;
pub mod storage;
pub mod util;
