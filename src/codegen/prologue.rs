//! Prologue Emitter (C5, entry half).

use crate::abi::{FramePlan, FunctionDescriptor, ParameterLocation};
use crate::isa::GpReg;
use crate::sink::{AssemblerSink, Operand, PointerSize};

/// Dedicated frame slot (relative to `RBP`) the callee's hidden return
/// pointer is spilled to when the return value is `Memory`, per
/// `spec.md` §4.5 step 5. Lives just past the register-save area in the
/// locals region the frame planner already reserved for it.
pub const MEMORY_RETURN_POINTER_SLOT_OFFSET: u64 = 8;

fn rbp_slot(disp: i64, size: PointerSize) -> Operand {
    Operand::Memory {
        base: GpReg::Rbp,
        disp,
        size,
    }
}

/// Emit a function's prologue, per `spec.md` §4.5.
///
/// `param_frame_slots[i]` is the `RBP`-relative displacement the caller
/// (the module orchestrator, which owns the local-variable frame layout)
/// has reserved to spill parameter `i` into — every register-passed
/// parameter is spilled on entry per the conservative policy `spec.md`
/// §9 open question 1 describes; memory parameters already live at their
/// ABI-mandated address and are left untouched.
pub fn emit(
    sink: &mut dyn AssemblerSink,
    function_name: &str,
    descriptor: &FunctionDescriptor,
    frame: &FramePlan,
    is_variadic: bool,
    param_frame_slots: &[i64],
) {
    sink.instr("push", &[Operand::Gpr(GpReg::Rbp)]);
    sink.instr("mov", &[Operand::Gpr(GpReg::Rbp), Operand::Gpr(GpReg::Rsp)]);
    sink.instr(
        "sub",
        &[Operand::Gpr(GpReg::Rsp), Operand::Immediate(frame.total_size as i64)],
    );

    if is_variadic {
        emit_register_save_area(sink, function_name, frame);
    }

    for (i, loc) in descriptor.parameters.iter().enumerate() {
        spill_parameter(sink, loc, param_frame_slots[i]);
    }

    if let Some(GpReg::Rdi) = descriptor.implicit_parameter {
        let disp = frame.locals_disp(MEMORY_RETURN_POINTER_SLOT_OFFSET);
        sink.instr("mov", &[rbp_slot(disp, PointerSize::Qword), Operand::Gpr(GpReg::Rdi)]);
    }
}

fn emit_register_save_area(sink: &mut dyn AssemblerSink, function_name: &str, frame: &FramePlan) {
    let area = frame
        .register_save_area
        .expect("register save area is only emitted for variadic functions");

    for (reg, p) in GpReg::ARG_GPRS.iter().zip([0u64, 8, 16, 24, 32, 40]) {
        sink.instr("mov", &[rbp_slot(area.disp(p), PointerSize::Qword), Operand::Gpr(*reg)]);
    }

    let skip_sse_label = format!("{}_vararg_skip_sse", function_name);
    sink.instr("test", &[Operand::Gpr(GpReg::Rax), Operand::Gpr(GpReg::Rax)]);
    sink.instr("jz", &[Operand::Label(skip_sse_label.clone())]);
    for (n, p) in (0u8..8).zip((0..8).map(|i| 48 + i * 16)) {
        sink.instr("movdqu", &[rbp_slot(area.disp(p), PointerSize::Tbyte), Operand::Xmm(n)]);
    }
    sink.label(&skip_sse_label);
}

fn spill_parameter(sink: &mut dyn AssemblerSink, loc: &ParameterLocation, base_disp: i64) {
    match loc {
        ParameterLocation::GeneralPurposeRegister(reg) => {
            sink.instr("mov", &[rbp_slot(base_disp, PointerSize::Qword), Operand::Gpr(*reg)]);
        }
        ParameterLocation::SseRegister(n) => {
            sink.instr("movq", &[rbp_slot(base_disp, PointerSize::Qword), Operand::Xmm(*n)]);
        }
        ParameterLocation::MultipleRegisters(qwords) => {
            for (i, q) in qwords.iter().enumerate() {
                spill_parameter(sink, q, base_disp + (i as i64) * 8);
            }
        }
        ParameterLocation::Memory { .. } | ParameterLocation::None => {}
        ParameterLocation::X87 | ParameterLocation::X87Up | ParameterLocation::ComplexX87 => {
            debug_assert!(false, "x87 locations never occur for parameters");
        }
        ParameterLocation::Nested { .. } => {
            debug_assert!(false, "classify never emits a top-level Nested location");
        }
    }
}
