//! Purchase verification and entitlement gating for paid tourism content.
//!
//! citygate sits between mobile clients, payment providers and the content
//! catalog. It verifies Apple/Google purchase proofs, accepts YooKassa
//! payment webhooks, runs batch "restore purchases" jobs through an external
//! push queue, and answers "can this device/user see this city or tour".
//!
//! The single correctness guarantee: any successful purchase, however many
//! times it is retried, redelivered or raced, results in exactly one
//! persisted [`store::EntitlementGrant`]. The mechanism is a database
//! uniqueness constraint on `(source, source_ref)` combined with a
//! detect-conflict-then-reread pattern in [`grant::GrantService`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod access;
pub mod catalog;
pub mod config;
pub mod error;
pub mod grant;
pub mod http;
pub mod jobs;
pub mod store;
pub mod verify;
pub mod webhook;

pub use config::AppConfig;
pub use error::{Error, Result};
pub use store::Store;
