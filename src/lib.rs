//! # Lakegate
//!
//! Lakegate provides the building blocks to set up a read-only server
//! compatible with the `Delta Sharing` protocol.
//!
//! ## Delta Sharing protocol
//!
//! Delta Sharing is an open protocol for secure real-time exchange of
//! large datasets, which enables organizations to share data in real time
//! regardless of which computing platforms they use. It is a simple REST
//! protocol that securely shares access to part of a dataset stored on
//! cloud or on-premise storage and leverages pre-signed URLs to reliably
//! transfer data.
//!
//! ## Design
//!
//! In order to provide flexibility, this crate is built around four core
//! abstractions.
//!
//! - [`Catalog`](catalog::Catalog): resolves share, schema and table names
//!   to the records describing them and where their data lives.
//! - [`TableReader`](reader::TableReader): reads the Delta transaction log
//!   of a shared table into a versioned snapshot.
//! - [`UrlSigner`](signer::UrlSigner): mints the time-bounded urls that
//!   recipients use to fetch the actual data files.
//! - [`TokenStore`](auth::TokenStore): resolves bearer tokens to
//!   recipient principals.
//!
//! The [`router`] module ties these together into an axum `Router` that
//! speaks the protocol wire format, and [`state::SharingServerState`]
//! holds the wiring.

#![warn(missing_docs)]

pub mod auth;
pub mod catalog;
pub mod config;
pub mod reader;
pub mod signer;
pub mod skipping;

pub mod error;
mod extract;
pub mod response;
pub mod router;
pub mod state;

pub use extract::{Capabilities, QueryRequest, ResponseFormat};
