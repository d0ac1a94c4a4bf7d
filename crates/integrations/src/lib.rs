//! Agent Card Integration Library
//!
//! The external-call layer used by the workflow engine.
//!
//! This crate provides:
//! - `IntegrationClient`: per-execution dispatcher with a complete call log
//! - Simulated (canned) responses for integrations without credentials
//! - Live adapter registry for integrations with credentials
//! - Capability to operation mapping
//! - Redacted, non-serializable credential types
//! - Execution-scoped cancellation signals

pub mod adapter;
pub mod cancel;
pub mod client;
pub mod credentials;
pub mod error;
pub mod operation;
pub mod record;
pub mod simulated;

pub use adapter::{AdapterRegistry, IntegrationAdapter, Payload};
pub use cancel::{CancelHandle, CancelSignal};
pub use client::IntegrationClient;
pub use credentials::{CredentialBag, Credentials, Secret};
pub use error::IntegrationError;
pub use operation::Operation;
pub use record::{CallMode, IntegrationCallRecord};
