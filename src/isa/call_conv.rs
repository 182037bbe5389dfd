//! Calling convention identifier.
//!
//! This crate implements exactly one calling convention — System V AMD64
//! — but keeps it behind a named enum rather than hard-coding "the ABI"
//! everywhere. Other conventions (Windows x64, say) are out of scope per
//! `spec.md` §1.

use std::fmt;
use std::str::FromStr;

/// Calling convention identifiers.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "enable-serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CallConv {
    /// The System V AMD64 ABI used on Linux, macOS, and other Unix-like
    /// targets. The only variant this crate's codegen paths implement.
    SystemV,
}

impl CallConv {
    pub fn is_variadic_capable(self) -> bool {
        true
    }
}

impl fmt::Display for CallConv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CallConv::SystemV => "system_v",
        })
    }
}

impl FromStr for CallConv {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system_v" => Ok(CallConv::SystemV),
            _ => Err(()),
        }
    }
}
