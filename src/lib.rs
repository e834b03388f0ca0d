//! Distributed deadlock-detection and matching core for message-passing
//! runtime correctness checking.
//!
//! A tree-based overlay (the TBON) mirrors the application's process
//! layout: leaves sit beside application ranks, internal nodes aggregate,
//! the root assembles the global wait-for graph and reports deadlocks.
//! This crate implements the per-node logic of that tree — matching,
//! blocking-state tracking, graph assembly and reporting — independent of
//! how the tree is wired up or how events actually reach a leaf.
//!
//! # Architecture
//!
//! - `types`: shared data model (ranks, communicators, datatypes, requests)
//! - `errors`: the error taxonomy and its severity classification
//! - `config`: typed configuration, loaded from defaults + TOML + env
//! - `transport`: the `Transport` trait plus in-process and TCP backends
//! - `strategy`: framed records, reserved tokens, flood control
//! - `driver`: fair scheduling and tree-wide completion tracking
//! - `resource_mirror`: read-only communicator/datatype snapshot store
//! - `reordering`: per-rank FIFO queue with open/suspend/checkpoint
//! - `match_explorer`: stack-based backtracking for wildcard receives
//! - `p2p_match`: point-to-point send/receive matching
//! - `coll_match`: collective wave matching and parameter cross-checking
//! - `blocking_state`: AND/OR/Mixed blocking-operation tracking
//! - `wfg`: distributed wait-for-graph assembly and cycle detection
//! - `snapshot`: quiescence probing (quiet timer + byte-count consensus)
//! - `finalize`: finalize-time draining and panic propagation
//! - `diagnostics`: outbound diagnostic events and sinks
//! - `reports`: DOT/HTML/reproducer-log report writers
//! - `node`: the orchestrator tying every component together per TBON node

pub mod blocking_state;
pub mod coll_match;
pub mod config;
pub mod diagnostics;
pub mod driver;
pub mod errors;
pub mod finalize;
pub mod match_explorer;
pub mod node;
pub mod p2p_match;
pub mod reordering;
pub mod reports;
pub mod resource_mirror;
pub mod snapshot;
pub mod strategy;
pub mod transport;
pub mod types;
pub mod wfg;

pub use config::Config;
pub use errors::{CoreError, Result, Severity};
pub use node::{Event, EventOutcome, ToolNode};
pub use wfg::DeadlockReport;
