//! Staged executive document signing.
//!
//! Documents form dependency chains inside numbered stages. A signer may only
//! sign a document once the document it depends on is signed; unauthenticated
//! signers reach exactly one document through a bearer token; every edit
//! produces an immutable new version row.

pub mod artifact;
pub mod clock;
pub mod document;
pub mod error;
pub mod events;
pub mod notify;
pub mod resolver;
pub mod service;
pub mod signature;
pub mod store;
pub mod token;

pub use error::{ErrorKind, SigningError};
pub use service::{SigningService, SigningSettings};
