//! Domain model shared by the distribution integrity checker: artefact
//! identity, digest algorithms and values, and verification outcomes.
//!
//! This crate performs no I/O. The engine, record store, and notification
//! code in `dist-integrity-checker` build on these types.

pub mod algorithm;
pub mod digest_value;
pub mod error;
pub mod identity;
pub mod outcome;

pub use algorithm::DigestAlgorithm;
pub use digest_value::DigestValue;
pub use error::ValidationError;
pub use identity::{Artefact, ArtefactKey, ArtefactVersion, Namespace};
pub use outcome::{FailureClass, OutcomeKind, SignatureFailure, VerificationOutcome};
