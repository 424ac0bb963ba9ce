//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer, and the client built on top of them.

/// Quote service client: correlation, stream demultiplexing, lifecycle.
pub mod client;

/// `MessagePack` envelope codec with negotiated compression.
pub mod codec;

/// Configuration loading.
pub mod config;

/// In-process transport pair for tests and demos.
pub mod memory;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// OpenTelemetry tracing integration.
pub mod telemetry;

/// WebSocket transport adapter.
pub mod websocket;
