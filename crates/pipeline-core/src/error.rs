//! Common error types shared across the pipeline runtime.

use thiserror::Error;

/// Errors a [`crate::data::Sample`] operation can report.
///
/// These are data-level errors (spec.md §7 "Input data" / invariant
/// violations that are still recoverable at the call site) rather than
/// control-plane failures, so they are `Result`, not panics.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SampleError {
    #[error("attribute {0:?} is already set")]
    AttributeAlreadySet(crate::data::AttributeKey),

    #[error("attribute {0:?} is not set")]
    AttributeMissing(crate::data::AttributeKey),

    #[error("metadata is already set on this sample")]
    MetadataAlreadySet,

    #[error("sample is not recyclable and cannot be written to in place")]
    NotRecyclable,
}

/// Errors raised while wiring ports together.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectError {
    #[error("input {0} is already connected and does not accept multiple fan-in")]
    AlreadyConnected(usize),

    #[error("output declares media kind {output:?} incompatible with input's expected {input:?}")]
    MetadataIncompatible {
        output: crate::data::MediaKind,
        input: crate::data::MediaKind,
    },

    #[error("no input at index {0}")]
    NoSuchInput(usize),

    #[error("no output at index {0}")]
    NoSuchOutput(usize),

    #[error("no filter named {0:?} in this pipeline")]
    UnknownFilter(String),
}

/// Errors escaping a [`crate::filter::FilterModule`] implementation, caught
/// by the [`crate::filter::FilterWrapper`] and forwarded to the pipeline.
#[derive(Error, Debug)]
pub enum FilterError {
    #[error("{0}")]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl FilterError {
    pub fn other(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        FilterError::Other(Box::new(err))
    }

    pub fn msg(msg: impl Into<String>) -> Self {
        FilterError::Other(Box::new(std::io::Error::other(msg.into())))
    }
}

/// Top-level error type for pipeline control-plane operations.
///
/// Mirrors the teacher crate's `pipeline_common::PipelineError` in shape
/// (stage-tagged process/finish failures, a cancellation variant) but
/// generalized for a graph rather than a linear chain: stages are
/// identified by filter name, not processor name.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("pipeline was cancelled")]
    Cancelled,

    #[error("connect: {0}")]
    Connect(#[from] ConnectError),

    #[error("filter {filter:?} failed during process: {source}")]
    FilterProcess {
        filter: String,
        #[source]
        source: FilterError,
    },

    #[error("filter {filter:?} failed during flush: {source}")]
    FilterFlush {
        filter: String,
        #[source]
        source: FilterError,
    },

    #[error("connection attempted after topology changed since pipeline start")]
    TopologyChanged,

    #[error("cannot remove filter {0:?}: it still has live connections")]
    FilterHasConnections(String),

    #[error("graph loader: {0}")]
    Loader(#[from] LoaderError),
}

/// Errors raised by [`crate::loader::load_graph`].
#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported graph version {found}, expected {expected}")]
    UnsupportedVersion { found: u64, expected: u64 },

    #[error("unknown module name {0:?} referenced in connections")]
    UnknownModule(String),

    #[error("module factory failed for {module:?} (type {kind:?}): {source}")]
    Factory {
        module: String,
        kind: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("pin index {0:?} is not a non-negative integer")]
    InvalidPinIndex(String),

    #[error("connect: {0}")]
    Connect(#[source] Box<PipelineError>),
}
