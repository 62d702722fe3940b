//! Error kinds shared by every layer of the tool.
//!
//! Each module owns a `thiserror` enum for its own failures and maps it onto
//! one of these kinds, so callers (and tests) can branch on what went wrong
//! without caring which layer produced it.

use std::fmt;

/// Classification of every error the tool can surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Target URL malformed or missing.
    InvalidTarget,
    /// Token could not be retrieved after retries.
    AuthFailure,
    /// Decryption passphrase rejected or unlock endpoint unreachable.
    UnlockFailed,
    /// Unresolved `((var))` placeholders.
    MissingVars,
    /// A YAML config or env file contains an unrecognized key.
    ConfigKeyUnknown,
    /// The appliance answered 404.
    NotFound,
    /// Operation not allowed in the resource's current state.
    Conflict,
    /// The installation poller observed a `failed` status.
    InstallFailed,
    /// Requested product/version is absent from available products.
    ProductNotAvailable,
    /// File glob matched nothing.
    NoGlobMatch,
    /// File glob matched more than one file.
    GlobAmbiguous,
    /// No candidate matched the slug and version in a blob source.
    NoVersions,
    /// Blob source bucket unreachable.
    BucketMissing,
    /// Blob source bucket has no objects at all.
    BucketEmpty,
    /// Any other unexpected response from a remote service.
    Upstream,
    /// Local failures: I/O, invalid flags, malformed documents.
    Other,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidTarget => write!(f, "invalid_target"),
            Self::AuthFailure => write!(f, "auth_failure"),
            Self::UnlockFailed => write!(f, "unlock_failed"),
            Self::MissingVars => write!(f, "missing_vars"),
            Self::ConfigKeyUnknown => write!(f, "config_key_unknown"),
            Self::NotFound => write!(f, "not_found"),
            Self::Conflict => write!(f, "conflict"),
            Self::InstallFailed => write!(f, "install_failed"),
            Self::ProductNotAvailable => write!(f, "product_not_available"),
            Self::NoGlobMatch => write!(f, "no_glob_match"),
            Self::GlobAmbiguous => write!(f, "glob_ambiguous"),
            Self::NoVersions => write!(f, "no_versions"),
            Self::BucketMissing => write!(f, "bucket_missing"),
            Self::BucketEmpty => write!(f, "bucket_empty"),
            Self::Upstream => write!(f, "upstream"),
            Self::Other => write!(f, "other"),
        }
    }
}

/// Implemented by every module error so kinds survive `anyhow` wrapping.
pub trait Classify {
    /// The kind of this error.
    fn kind(&self) -> ErrorKind;
}

/// Find the kind of the innermost classified error in an `anyhow` chain.
#[must_use]
pub fn kind_of(err: &anyhow::Error) -> ErrorKind {
    for cause in err.chain() {
        if let Some(kind) = classify_dyn(cause) {
            return kind;
        }
    }
    ErrorKind::Other
}

fn classify_dyn(err: &(dyn std::error::Error + 'static)) -> Option<ErrorKind> {
    use crate::{
        api::ApiError, configtemplate::TemplateError, download::DownloadError,
        extractor::ExtractError, interpolate::InterpolateError, network::NetworkError,
        options::BindError, poller::PollError, target::TargetError,
    };

    if let Some(e) = err.downcast_ref::<TargetError>() {
        return Some(e.kind());
    }
    if let Some(e) = err.downcast_ref::<NetworkError>() {
        return Some(e.kind());
    }
    if let Some(e) = err.downcast_ref::<ApiError>() {
        return Some(e.kind());
    }
    if let Some(e) = err.downcast_ref::<InterpolateError>() {
        return Some(e.kind());
    }
    if let Some(e) = err.downcast_ref::<BindError>() {
        return Some(e.kind());
    }
    if let Some(e) = err.downcast_ref::<DownloadError>() {
        return Some(e.kind());
    }
    if let Some(e) = err.downcast_ref::<TemplateError>() {
        return Some(e.kind());
    }
    if let Some(e) = err.downcast_ref::<ExtractError>() {
        return Some(e.kind());
    }
    if let Some(e) = err.downcast_ref::<PollError>() {
        return Some(e.kind());
    }
    None
}
