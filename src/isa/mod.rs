//! Target configuration and register descriptions.
//!
//! `spec.md` §6 lists the driver-configurable knobs as CLI/environment
//! surface; here they are just fields on a plain struct the driver builds
//! once and passes by reference into every entry point, consistent with
//! §6's "Persisted state: None — the core is a pure function from (IR
//! module, config) to assembler text."

mod call_conv;
mod registers;

pub use call_conv::CallConv;
pub use registers::{GpReg, ARG_XMMS, RET_XMMS};

/// Assembly syntax dialect the sink is expected to render in. This crate
/// never branches on it directly — it only matters to the external
/// assembler-text formatter — but it is threaded through so that
/// diagnostics and inline-asm substitution (C9) can mention it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "enable-serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Syntax {
    IntelPrefix,
    IntelNoPrefix,
    Att,
}

impl Default for Syntax {
    fn default() -> Self {
        Syntax::IntelPrefix
    }
}

/// Driver-configurable knobs for a codegen run.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "enable-serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TargetConfig {
    pub syntax: Syntax,
    pub emulated_tls: bool,
    pub position_independent_code: bool,
    /// The `KEFIR_DISABLE_LONG_DOUBLE` escape hatch: when set, `long
    /// double` is treated as a 64-bit `double` for classification and
    /// layout purposes, for targets without x87. Per `spec.md` §9 this is
    /// branched once, at layout-table construction time
    /// (`layout::TypeLayoutTable::new`), not re-checked in every emit
    /// path.
    pub disable_long_double: bool,
}

impl Default for TargetConfig {
    fn default() -> Self {
        TargetConfig {
            syntax: Syntax::IntelPrefix,
            emulated_tls: false,
            position_independent_code: false,
            disable_long_double: false,
        }
    }
}
