//! # Assist Core
//!
//! Assist Core is the backend runtime of an AI developer assistant. It
//! routes requests (analysis, fixes, refactoring, chat, workspace scans)
//! to a fleet of specialized agents backed by pluggable model providers
//! and MCP tool servers.
//!
//! ## Architecture
//!
//! The system consists of:
//! - **Orchestrator**: validates, routes and dispatches requests under a
//!   per-agent circuit breaker, retry with backoff and a recovery fallback
//! - **Agent Registry**: lifecycle, health monitoring and capability
//!   lookup for the agent fleet
//! - **Concurrency Governor**: semaphore-bounded executions with a
//!   throughput-driven auto-tuning loop
//! - **Scan Engine**: long-running workspace analysis with progress and
//!   issue events
//! - **Provider / MCP clients**: normalized access to language models and
//!   external tool servers
//! - **Event Bus**: typed pub/sub feeding the external push channel
//!
//! Collaborators the core does not own (code analysis, knowledge
//! retrieval, workflows, persistence) plug in behind narrow traits.

/// Agent trait, concrete agents and the registry
pub mod agents;
/// Code-analysis collaborator boundary and heuristic analyzer
pub mod analysis;
/// HTTP adapter exposing the boundary operations
pub mod api;
/// API-key authentication middleware
pub mod auth;
/// System configuration
pub mod config;
/// System-wide constants
pub mod constants;
/// Error types and the boundary error taxonomy
pub mod error;
/// Typed event bus
pub mod events;
/// Knowledge/retrieval collaborator boundary
pub mod knowledge;
/// MCP (Model Context Protocol) client
pub mod mcp;
/// Core data models
pub mod models;
/// Dispatcher, queue, breaker, governor, executions, recovery
pub mod orchestrator;
/// Model-provider client
pub mod provider;
/// Request-rate limiting
pub mod rate_limit;
/// Workspace scan engine
pub mod scan;
/// Scan-report snapshot persistence
pub mod snapshot;
/// Ingress content policy
pub mod validation;
/// Workflow collaborator boundary
pub mod workflow;

#[cfg(test)]
mod tests;

pub use error::{AssistError, ErrorKind, Result};
