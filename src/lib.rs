//! sigmap server: a self-authenticating signed-payload key-value service.
//!
//! Publishers POST signed payloads; the server verifies them and stores
//! the verbatim bytes under an endpoint derived from the signers' public
//! keys. Readers GET by endpoint and can verify everything offline. The
//! heavy lifting lives in the `sigmap-payload` (model, codec, signature
//! registry) and `sigmap-storage` (replay-safe TTL engines) crates; this
//! crate is the HTTP façade, configuration, and error mapping.

pub mod config;
pub mod context;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod server;

pub use config::Config;
pub use server::{run, run_with_store};
