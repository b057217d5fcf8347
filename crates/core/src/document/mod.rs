pub mod id;
pub mod model;
pub mod validate;

pub use id::DocumentId;
pub use model::{
    DependencyLink, Document, DocumentChanges, DocumentKind, DocumentStatus, SignatureStatus,
    Signer, SignerIdentity, SignerStatus, TokenGrant,
};
