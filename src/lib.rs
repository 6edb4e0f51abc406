//! wvcdm - Widevine license client.
//!
//! This crate provides:
//! - Init data normalization and `pssh` box parsing.
//! - Device identities loaded from PEM keys or `.wvd` files.
//! - The license handshake: signed requests, privacy mode, license
//!   verification and content key extraction.
//! - A per-asset [`cdm::Cdm`] facade and YAML configuration.
//!
//! Feature flags:
//! - `tracing` (default): log through `tracing`.
//! - `cli`: build the `wvcdm` binary.
#![allow(clippy::result_large_err)]

#[macro_use]
mod macros;

/// Per-asset CDM facade.
pub mod cdm;
/// YAML configuration.
pub mod config;
/// AES, CMAC and HMAC helpers.
pub mod crypto;
/// Device identities and session id strategies.
pub mod device;
/// Common error types and Result alias.
pub mod error;
/// Session key ladder.
pub mod kdf;
/// Decrypted key representation.
pub mod key;
/// License protocol messages.
pub mod license_protocol;
/// Init data and `pssh` box handling.
pub mod pssh;
/// License handshake state machine.
pub mod session;

pub use cdm::{Cdm, SessionOptions};
pub use device::{Device, DeviceType};
pub use error::{Error, Result};
pub use key::{ContentKey, KeyType};
pub use session::{Session, SessionState};
