//! Bilibili web API client.
//!
//! This crate owns everything that talks to the platform's web API before any
//! stream byte is downloaded: credential persistence, the QR-login session
//! state machine, catalog resolution of a video identifier into concrete
//! stream options, and the pure quality negotiation that picks one video and
//! one audio rendition for the caller's entitlement tier.

pub mod auth;
pub mod catalog;
pub mod client;
pub mod error;
pub mod media;

pub use auth::credential::{CredentialStore, Credentials};
pub use auth::passport::{AccountProfile, ChallengePoll, HttpPassport, LoginChallenge, PassportApi};
pub use auth::session::{AuthSession, AuthState, EntitlementTier};
pub use catalog::ids::{ParsedIdentifier, VideoId, parse_identifier};
pub use catalog::resolver::{CatalogResolver, HttpCatalog};
pub use error::{AuthError, NegotiationError, ResolutionError};
pub use media::negotiate::negotiate;
pub use media::quality::{AudioQuality, Codec, VideoQuality};
pub use media::{
    NegotiatedPair, PartDescriptor, QualityLabel, StreamKind, StreamOption, VideoDescriptor,
};
