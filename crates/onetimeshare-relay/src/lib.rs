//! # OneTimeShare Relay
//!
//! Storage and consumption core for one-time secrets. Clients submit an
//! already-encrypted blob; the relay stores it with a time-to-live and a view
//! budget, and hands it out at most `max_views` times before destroying it.
//!
//! ## Features
//!
//! - **Burn-on-read**: the read that exhausts the view budget deletes the record
//!   and still receives the content
//! - **Store-side atomicity**: counters and deletes are executed by the store,
//!   so independent instances can share one store safely
//! - **TTL expiry**: records vanish at their deadline without a background sweep
//! - **Admission control**: fixed-window rate limits per client and endpoint
//! - **Burn notifications**: optional fire-and-forget notifier on final read
//!
//! The relay never sees plaintext.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod admission;
pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod notify;
pub mod schema;
pub mod service;
pub mod storage;
pub mod token;

pub use admission::{AdmissionController, ClientIdentity, Endpoint};
pub use codec::{ConsumeStrategy, SecretRecord};
pub use config::{ReadMode, RelayConfig};
pub use engine::ConsumptionEngine;
pub use error::{RelayError, Result};
pub use notify::{NotificationDispatcher, Notifier};
pub use service::SecretService;
pub use storage::{KvStore, MemoryStore, RedisStore};

/// Default time-to-live for a new secret, in minutes
pub const DEFAULT_TTL_MINUTES: u64 = 60;

/// Default number of permitted reads
pub const DEFAULT_MAX_VIEWS: u32 = 1;

/// Maximum accepted ciphertext size (1 MB)
pub const MAX_CIPHERTEXT_SIZE: usize = 1024 * 1024;
