//! # Kargo Core
//!
//! Request-scoped types shared by the Kargo API authorization crates:
//!
//! - [`RequestContext`] - Per-call context carrying the caller identity and
//!   the call's cancellation signal
//! - [`RequestId`] - UUID v7 request identifier
//! - [`CallerIdentity`] / [`ServiceAccountRef`] - Who is calling and which
//!   service accounts they may be reviewed as
//! - [`ErrorCode`] / [`CodedError`] - Status codes surfaced to RPC callers

#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod context;
mod error;
mod identity;

pub use context::{RequestContext, RequestId};
pub use error::{CodedError, ErrorCode, ErrorEnvelope};
pub use identity::{CallerIdentity, ServiceAccountRef, SUBJECT_CLAIM};
