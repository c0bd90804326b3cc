//! # Guard Core
//!
//! Core library for a guarded JSON-RPC reverse proxy in front of blockchain nodes.
//!
//! - **[`middleware`]**: path whitelist, credential check, capped body read, JSON-RPC parse and
//!   method whitelist.
//!
//! - **[`upstream`]**: request rewriting against the live target, the shared HTTP client and
//!   JSON-RPC level response inspection.
//!
//! - **[`proxy`]**: one-shot primary to secondary failover and the fatal channel.
//!
//! - **[`admin`]**: runtime read/replace of a binding's upstream target.
//!
//! - **[`store`]**: durable node-key to target mapping (`SQLite`, in-memory).
//!
//! - **[`runtime`]**: bounded worker pool, request pipeline and assembly.
//!
//! - **[`metrics`]**: Prometheus instrumentation for dispatches, failovers and the pool.
//!
//! ## Request Flow
//!
//! ```text
//! HTTP request
//!       │
//!       ▼
//! ┌─────────────┐
//! │ Worker pool │  bounded queue, N workers
//! └──────┬──────┘
//!        ▼
//! ┌─────────────┐
//! │   Routing   │ ─── admin path ──► Admin surface ──► Config store
//! └──────┬──────┘
//!        ▼
//! ┌─────────────┐
//! │  Validator  │ ─── rejected ──► 400 error envelope
//! └──────┬──────┘
//!        ▼
//! ┌─────────────┐      ┌───────────┐
//! │  Primary    │ ───► │ Inspector │ ─── ok ──► relay
//! └─────────────┘      └─────┬─────┘
//!                            │ rpc error / transport failure
//!                            ▼
//!                     ┌─────────────┐
//!                     │  Secondary  │ ──► relay verbatim
//!                     └─────────────┘
//! ```

pub mod admin;
pub mod config;
pub mod metrics;
pub mod middleware;
pub mod node;
pub mod proxy;
pub mod runtime;
pub mod store;
pub mod types;
pub mod upstream;
