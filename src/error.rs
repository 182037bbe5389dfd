//! The error taxonomy every public entry point in this crate reports
//! through.
//!
//! Every fallible operation in the core returns `AbiResult<T>`. On error,
//! whatever that function owns is dropped in the usual Rust way and the
//! error propagates to the module orchestrator, which aborts codegen for
//! the whole module — there is no partial recovery within a single
//! translation unit.

use std::fmt;

/// Result alias used throughout this crate, mirroring the
/// `CodegenResult`/`CodegenError` naming its teacher uses for the same
/// purpose.
pub type AbiResult<T> = Result<T, AbiError>;

/// The raise site of an error, for the single-diagnostic contract of
/// `spec.md` §7 ("kind, human message, and (file, line) of the raise
/// site").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RaiseSite {
    pub file: &'static str,
    pub line: u32,
}

impl fmt::Display for RaiseSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// Captures the raise site of the call; use inside `AbiError` constructors
/// rather than by hand.
macro_rules! raise_site {
    () => {
        $crate::error::RaiseSite {
            file: file!(),
            line: line!(),
        }
    };
}

/// The error taxonomy of `spec.md` §7.
///
/// `IteratorEnd` is deliberately not constructible from outside the crate:
/// the spec calls it "a sentinel for iterator completion; never
/// user-visible", so it is used internally as a control-flow value and
/// converted to `Ok(None)`-shaped results at the crate boundary rather than
/// surfaced to callers.
#[derive(Debug, thiserror::Error)]
pub enum AbiError {
    /// Null or out-of-range input from the caller.
    #[error("invalid parameter: {message} (at {site})")]
    InvalidParameter { message: String, site: RaiseSite },

    /// Malformed IR type: cyclic, missing children, or an unknown
    /// typecode.
    #[error("invalid type: {message} (at {site})")]
    InvalidType { message: String, site: RaiseSite },

    /// A consistency check failed, e.g. an X87Up qword not preceded by
    /// X87, or a slot index overflow.
    #[error("invalid state: {message} (at {site})")]
    InvalidState { message: String, site: RaiseSite },

    /// An index exceeded a container; often a symptom of `InvalidType`.
    #[error("index {index} out of bounds (len {len}) (at {site})")]
    OutOfBounds {
        index: usize,
        len: usize,
        site: RaiseSite,
    },

    /// An IR construct the ABI does not permit, e.g. a long-double
    /// register parameter, or an aggregate return whose class combination
    /// this crate does not support.
    #[error("not supported by the System V ABI: {message} (at {site})")]
    NotSupported { message: String, site: RaiseSite },

    /// A recognized but unimplemented feature.
    #[error("not implemented: {message} (at {site})")]
    NotImplemented { message: String, site: RaiseSite },

    /// The emitted byte count for a static-data symbol disagreed with its
    /// computed layout size.
    #[error(
        "static data layout mismatch for `{symbol}`: expected {expected} bytes, emitted {emitted} (at {site})"
    )]
    DataLayoutMismatch {
        symbol: String,
        expected: u64,
        emitted: u64,
        site: RaiseSite,
    },

    /// The allocator refused. This always terminates module codegen.
    #[error("out of memory (at {site})")]
    OutOfMemory { site: RaiseSite },
}

impl AbiError {
    pub(crate) fn invalid_type(message: impl Into<String>) -> Self {
        AbiError::InvalidType {
            message: message.into(),
            site: raise_site!(),
        }
    }

    pub(crate) fn invalid_state(message: impl Into<String>) -> Self {
        AbiError::InvalidState {
            message: message.into(),
            site: raise_site!(),
        }
    }

    pub(crate) fn invalid_parameter(message: impl Into<String>) -> Self {
        AbiError::InvalidParameter {
            message: message.into(),
            site: raise_site!(),
        }
    }

    pub(crate) fn out_of_bounds(index: usize, len: usize) -> Self {
        AbiError::OutOfBounds {
            index,
            len,
            site: raise_site!(),
        }
    }

    pub(crate) fn not_supported(message: impl Into<String>) -> Self {
        AbiError::NotSupported {
            message: message.into(),
            site: raise_site!(),
        }
    }

    pub(crate) fn not_implemented(message: impl Into<String>) -> Self {
        AbiError::NotImplemented {
            message: message.into(),
            site: raise_site!(),
        }
    }

    pub(crate) fn data_layout_mismatch(
        symbol: impl Into<String>,
        expected: u64,
        emitted: u64,
    ) -> Self {
        AbiError::DataLayoutMismatch {
            symbol: symbol.into(),
            expected,
            emitted,
            site: raise_site!(),
        }
    }

    /// Does this error class terminate the whole module, per the
    /// propagation policy of `spec.md` §7?
    pub fn terminates_module(&self) -> bool {
        matches!(
            self,
            AbiError::NotImplemented { .. } | AbiError::InvalidType { .. } | AbiError::OutOfMemory { .. }
        )
    }
}
