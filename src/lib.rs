//! Scan Orchestrator Library
//!
//! Event-driven scheduling of security scans across local tools and
//! Kubernetes Jobs. The binaries live in `src/main.rs` and `src/bin/`.

pub mod agents;
pub mod api;
pub mod config;
pub mod error;
pub mod events;
pub mod executor;
pub mod jobs;
pub mod models;
pub mod orchestrator;
pub mod policy;
pub mod reconcile;
pub mod storage;
