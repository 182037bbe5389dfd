//! Frame Planner (C4): lay out a function's stack frame.
//!
//! All offsets below `RBP` are recorded as the distance from `RBP` to the
//! *far* (most negative) edge of their region, i.e. `region.base` is how
//! far past `RBP` the region's last byte sits, and a position `p` inside
//! the region (counting up from its nearest edge to `RBP`, matching how
//! `spec.md` §4.5 lists the register-save slots as `0, 8, 16, ...`) is at
//! address `RBP - region.base - region.size + p`. Offsets above `RBP`
//! (incoming stack parameters) are plain positive displacements.

use crate::abi::params::{CallerRequirements, FunctionDescriptor};
use crate::error::AbiResult;
use crate::ir::IrType;
use crate::isa::TargetConfig;

const REGISTER_SAVE_AREA_SIZE: u64 = 6 * 8 + 8 * 16;
const REGISTER_SAVE_AREA_ALIGN: u32 = 16;

/// The register-save area of a variadic function's frame (`spec.md`
/// §4.4.2): 6 integer argument-register slots followed by 8 SSE slots.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "enable-serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RegisterSaveArea {
    pub base: u64,
    pub size: u64,
}

impl RegisterSaveArea {
    /// Displacement, relative to `RBP`, of the slot at region-relative
    /// offset `p` (one of the fixed values `spec.md` §4.5 lists: `0, 8,
    /// 16, 24, 32, 40` for the integer registers, `48, 64, .., 160` for
    /// the XMMs).
    pub fn disp(&self, p: u64) -> i64 {
        -((self.base + self.size - p) as i64)
    }
}

/// A function's full frame layout.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "enable-serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FramePlan {
    /// Distance past the saved `RBP`/return address to the first
    /// incoming stack parameter; always 16.
    pub parameters_in_memory_base: u64,
    pub register_save_area: Option<RegisterSaveArea>,
    pub locals_base: u64,
    pub locals_size: u64,
    pub outgoing_call_temporaries_base: u64,
    pub outgoing_call_temporaries_size: u64,
    pub total_size: u64,
    pub required_alignment: u32,
}

impl FramePlan {
    pub fn parameter_memory_disp(&self, param_offset: u64) -> i64 {
        (self.parameters_in_memory_base + param_offset) as i64
    }

    pub fn locals_disp(&self, p: u64) -> i64 {
        -((self.locals_base + self.locals_size - p) as i64)
    }

    pub fn outgoing_disp(&self, p: u64) -> i64 {
        -((self.outgoing_call_temporaries_base + self.outgoing_call_temporaries_size - p) as i64)
    }
}

fn round_up(value: u64, align: u64) -> u64 {
    (value + align - 1) & !(align - 1)
}

/// Plan the frame for a function whose Function Descriptor is `descriptor`
/// and whose local variables are collectively typed `locals`.
/// `max_outgoing_stack_bytes` is the running maximum, over every call
/// site in the function body, of that call's required stack-argument
/// area — per `spec.md` §9 open question 4, this crate sizes it at
/// call-materialization time (C6) and folds the result in here, rather
/// than via the original's separate pre-pass over instructions.
pub fn plan(
    _descriptor: &FunctionDescriptor,
    is_variadic: bool,
    locals: &IrType,
    max_outgoing_stack_bytes: u64,
    config: &TargetConfig,
) -> AbiResult<FramePlan> {
    let locals_layout = crate::layout::compute(locals, config)?;
    let locals_size = locals_layout.root().size;
    let locals_align = locals_layout.root().alignment.max(1);

    let register_save_area = if is_variadic {
        Some(RegisterSaveArea {
            base: 0,
            size: REGISTER_SAVE_AREA_SIZE,
        })
    } else {
        None
    };
    let after_register_save = register_save_area
        .map(|area| area.base + area.size)
        .unwrap_or(0);

    let locals_base = round_up(after_register_save, u64::from(locals_align));
    let after_locals = locals_base + locals_size;

    let outgoing_base = round_up(after_locals, 16);
    let outgoing_size = round_up(max_outgoing_stack_bytes, 16);
    let after_outgoing = outgoing_base + outgoing_size;

    let mut total_size = round_up(after_outgoing, 16);
    if total_size % 16 == 0 {
        total_size += 8;
    }

    let required_alignment = locals_align.max(REGISTER_SAVE_AREA_ALIGN).max(16);

    Ok(FramePlan {
        parameters_in_memory_base: 16,
        register_save_area,
        locals_base,
        locals_size,
        outgoing_call_temporaries_base: outgoing_base,
        outgoing_call_temporaries_size: outgoing_size,
        total_size,
        required_alignment,
    })
}

/// A variadic function's caller-requirements summary feeds the `AL`
/// vararg marshalling step at call sites that target it; exposed here
/// since `abi::frame` is where `CallerRequirements` and the frame it
/// produces are both in scope for the module orchestrator.
pub fn sse_register_count(requirements: &CallerRequirements) -> u8 {
    requirements.sse_used
}
