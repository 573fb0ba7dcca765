//! mirrorgate - a smart-HTTP git gateway for fleets of coding agents
//!
//! Agents clone, fetch and push through mirrorgate instead of talking to the
//! forge directly. Each hosted repository is a bare mirror of an upstream
//! remote; every accepted push is propagated upstream before the client
//! sees success, and agents bound to a unit of work can only move the
//! branch assigned to it.
//!
//! # Architecture
//!
//! - [`server`] - HTTP surface (smart-HTTP routes and the management API)
//! - [`gateway`] - Per-request state machines: authorize, lock, accept, check, propagate
//! - [`protocol`] - pkt-line and receive-pack command parsing
//! - [`sync`] - Fetch from and push to the upstream remote
//! - [`reconcile`] - Startup pass that replays branches left ahead of upstream
//! - [`registry`] - Hosted repositories and their on-disk layout
//! - [`hook`] - Pre-receive hook that protects configured branches
//! - [`auth`] - Credential resolution and branch restrictions
//! - [`forge`] - Pull-request follow-ups on the hosting forge
//! - [`core`] - Domain types, configuration, locks and rollback
//! - [`git`] - Single interface for all Git operations
//! - [`cli`] - Command-line entry points
//! - [`logging`] - tracing subscriber setup
//!
//! # Invariants
//!
//! 1. Outside a held repository lock, every mirrored branch matches upstream
//! 2. A push that cannot be propagated is rolled back before the client is answered
//! 3. Restricted agents never move a branch other than their assigned one

pub mod auth;
pub mod cli;
pub mod core;
pub mod forge;
pub mod gateway;
pub mod git;
pub mod hook;
pub mod logging;
pub mod protocol;
pub mod reconcile;
pub mod registry;
pub mod server;
pub mod sync;
