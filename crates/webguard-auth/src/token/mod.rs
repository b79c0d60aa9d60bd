//! Token minting, validation, rotation and revocation.
//!
//! - [`keys`] - Key material and algorithm derivation
//! - [`codec`] - Signing and verifying compact JWTs
//! - [`claims`] - Token payloads
//! - [`service`] - The [`TokenService`] trait and the baseline service
//! - [`family`] - Per-subject token families

pub mod claims;
pub mod codec;
pub mod family;
pub mod keys;
mod procedures;
mod record;
pub mod service;

pub use claims::{Payload, TokenClaims, TokenPair};
pub use codec::TokenCodec;
pub use family::FamilyTokenService;
pub use keys::{KeyMaterial, SigningAlgorithm, algorithm_for_rsa_bits, algorithm_for_secret_len};
pub use record::ACCESS_JTI;
pub use service::{
    CacheTokenService, DENYLIST_PREFIX, FAMILY_PREFIX, REFRESH_PREFIX, TokenService,
};
