//! Signature capture: the only writer of `signature_status`, `signed_at` and
//! `signed_file_url`.

mod capture;
pub mod image;

pub use capture::{
    AuthenticatedUser, DeclineRequest, SignatureAuth, SignatureSubmission, SubmitReceipt,
};
pub use image::{ImageError, SignatureImage};
