//! # Busbar
//!
//! `busbar` is an in-process, topic-based publish/subscribe bus built with Rust.
//! Messages flow through a validate, rate-limit, retain, route, dispatch
//! pipeline; subscribers match dotted topics with per-segment wildcards and
//! handlers run outside the broker lock, so they can publish and subscribe
//! freely from inside a delivery.
//!
//! ## Core Modules
//!
//! The library is structured into several modules, each with a distinct responsibility:
//!
//! - `broker`: The bus engine: topic matching, retained messages, rate limiting and dispatch.
//! - `client`: The participant facade: identity, pre-ready queueing and request/reply.
//! - `config`: Handles loading and merging bus configuration.
//! - `router`: Optional rule engine that rewrites, forwards and acts on matching messages.
//! - `tracer`: Optional ring-buffer recorder for per-message pipeline events.
//! - `utils`: Contains shared utilities, such as error handling.

pub mod broker;
pub mod client;
pub mod config;
pub mod router;
pub mod tracer;
pub mod utils;

#[cfg(test)]
mod tests;
