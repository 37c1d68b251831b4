//! Core update pipeline for geodb.
//!
//! This crate keeps a locally installed file in sync with a remote copy that
//! publishes a checksum next to it:
//! - Remote version token retrieval and validation.
//! - Streaming download, decompression and content hashing.
//! - Atomic installation over the previous file.
//! - A lifecycle controller with a polling schedule and an event channel.

mod config;
mod controller;
mod decompress;
mod error;
mod events;
mod fetch;
mod inspect;
mod install;
mod oracle;
mod transport;

/// Updater settings with per-field defaults.
pub use config::UpdaterConfig;
/// Lifecycle controller and the state it exposes.
pub use controller::{CycleOutcome, Phase, UpdateController, VersionState};
/// Pluggable decompression strategies.
pub use decompress::{Compression, Decompressor, GzipDecompressor, Passthrough};
/// Error taxonomy, with the pipeline stage each failure belongs to.
pub use error::{ConfigError, ControllerError, DownloadCause, Stage, TransportError, UpdateError};
/// Events delivered to subscribers.
pub use events::LifecycleEvent;
/// Individual pipeline stages, usable on their own.
pub use fetch::fetch_to_file;
pub use inspect::HashAlgorithm;
pub use install::install_atomically;
pub use oracle::VersionOracle;
/// Request/response seam and its HTTP implementation.
pub use transport::{ByteStream, HttpTransport, Transport};
