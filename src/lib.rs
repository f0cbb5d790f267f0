//! `signed_video_validator` authenticates H.264/H.265 video elementary
//! streams signed with a chained-hash-over-GOP scheme carried in
//! user-data-unregistered SEI NAL units.
//!
//! This crate provides:
//! - A streaming [`Session`] that consumes NAL units one at a time and
//!   returns an [`AuthenticityReport`] whenever a GOP's verdict settles.
//! - The wire-level building blocks ([`nalu`], [`tlv`], [`hash`]) a caller
//!   can use directly when building a signer rather than a validator.
//! - An abstract [`Verifier`] collaborator: this crate never ships a
//!   concrete public-key signature scheme, by design.
//!
//! ## Quick start
//! ```no_run
//! use signed_video_validator::{Codec, Session};
//!
//! let mut session = Session::new(Codec::H264);
//! // session.set_verifier(Box::new(my_verifier));
//! # let nal_unit: &[u8] = &[];
//! if let Some(report) = session.add_nalu_and_authenticate(nal_unit).unwrap() {
//!     println!("{:?}", report.latest_validation.authenticity);
//! }
//! ```

pub mod error;
pub mod hash;
pub mod nalu;
pub mod tlv;
pub mod gop;
pub mod validation;
pub mod report;
pub mod verifier;
pub mod session;

mod mp4;
pub mod source;

#[cfg(feature = "async")]
pub mod async_source;

pub use error::Error;
pub use gop::AuthenticityLevel;
pub use nalu::Codec;
pub use report::{AccumulatedValidation, Authenticity, AuthenticityReport, LatestValidation, ProductInfo};
pub use session::{Session, SessionConfig};
pub use verifier::Verifier;

#[cfg(feature = "async")]
pub use async_source::authenticate_stream_from_path;
