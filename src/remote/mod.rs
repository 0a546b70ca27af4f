//! Remote record store.
//!
//! - [`store`] - The [`RemoteStore`] trait and the remote view of a record
//! - [`http`] - HTTP implementation
//! - [`auth`] - Bearer token issuing and verification
//! - [`cipher`] - Sealing of sensitive payload fields

pub mod auth;
pub mod cipher;
pub mod http;
#[cfg(test)]
pub mod mock;
pub mod store;

pub use auth::{SignedTokenIssuer, StaticCredential, TokenIssuer};
pub use cipher::{AesGcmCipher, PayloadCipher, PlaintextCipher};
pub use http::HttpRemote;
pub use store::{RemoteRecord, RemoteStore};
