//! HTTP API gateway core: a per-route policy pipeline sitting in front of a
//! terminal backend handler.
//!
//! Each route is built from an ordered chain of policies — caching, GraphQL
//! parsing, idempotency, audit logging, AI-crawler detection, inbound
//! signature verification, decompression, cost budgeting, CDN/security
//! headers, maintenance-mode gating, static file serving, OpenAPI
//! validation, and active backend health checking with retry orchestration —
//! composed by the [`pipeline`] module's anchor resolver.
//!
//! This module reuses the host framework's own middleware shape
//! (`Fn(Request, Next) -> Future<Response>`, see [`crate::middleware`]) at a
//! gateway-local type ([`types::GatewayRequest`]) so every policy can buffer
//! and replay a request body as many times as it needs to.

/// Gateway-local request/middleware types and the body-replay boundary.
pub mod types;

/// Crate-wide error taxonomy and its HTTP/GraphQL wire rendering.
pub mod error;

/// Anchor resolution and ordered middleware chain assembly.
pub mod pipeline;

/// Cache Store and Cache Policy (§4.2-§4.4).
pub mod cache;

/// At-most-once replay with in-flight coalescing (§4.5).
pub mod idempotency;

/// GraphQL parsing, APQ, depth/complexity enforcement, batching (§4.6).
pub mod graphql;

/// Minimal one-shot outbound HTTP transport shared by audit, health, retry.
pub mod transport;

/// Bounded async batching of audit entries to a webhook (§4.7).
pub mod audit;

/// AI-crawler user-agent detection and per-path enforcement (§4.8).
pub mod crawler;

/// HMAC/RSA inbound signature verification with timestamp freshness (§4.9).
pub mod signature;

/// Content-Encoding request body decompression with a zip-bomb limit (§4.10).
pub mod decompression;

/// Per-consumer request cost/budget tracking (§4.11).
pub mod cost;

/// CDN and security response header injection (§4.12).
pub mod headers;

/// Kill-switch maintenance mode with path/IP bypass (§4.13).
pub mod maintenance;

/// Safe static directory serving (§4.14).
pub mod static_files;

/// OpenAPI-spec-backed request/response validation (§4.15).
pub mod openapi;

/// Active HTTP/TCP backend health checking with hysteresis (§4.16).
pub mod health;

/// Retry orchestration: backoff, budget, optional hedging (§4.17).
pub mod retry;
