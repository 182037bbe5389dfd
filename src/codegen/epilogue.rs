//! Epilogue Emitter (C5, exit half).

use crate::abi::{FramePlan, ParameterLocation};
use crate::codegen::call::emit_aggregate_copy;
use crate::codegen::prologue::MEMORY_RETURN_POINTER_SLOT_OFFSET;
use crate::isa::GpReg;
use crate::sink::{AssemblerSink, Operand, PointerSize};

fn rbp_slot(disp: i64, size: PointerSize) -> Operand {
    Operand::Memory {
        base: GpReg::Rbp,
        disp,
        size,
    }
}

/// Where the return value sits in the callee's frame, just before the
/// epilogue materializes it into its ABI-designated location(s). The
/// per-function codegen state (out of scope here; owned by the module
/// orchestrator) picks this slot the same way it picks parameter spill
/// slots for the prologue.
#[derive(Debug, Clone, Copy)]
pub enum ReturnValueSlot {
    /// No value to return.
    None,
    /// A scalar or small-aggregate return value at this `RBP`-relative
    /// displacement, ready to be loaded into its register(s).
    Frame(i64),
    /// A `Memory`-classified return value: `disp` is the frame slot the
    /// callee built the result in, `size` its byte count. Copied into the
    /// caller-provided buffer (whose address the prologue saved at
    /// [`MEMORY_RETURN_POINTER_SLOT_OFFSET`]) before `RAX` is set.
    Buffer { disp: i64, size: u64 },
}

/// Emit a function's epilogue, per `spec.md` §4.5.
pub fn emit(sink: &mut dyn AssemblerSink, return_location: &ParameterLocation, frame: &FramePlan, value: ReturnValueSlot) {
    materialize_return(sink, return_location, frame, value);
    sink.instr("mov", &[Operand::Gpr(GpReg::Rsp), Operand::Gpr(GpReg::Rbp)]);
    sink.instr("pop", &[Operand::Gpr(GpReg::Rbp)]);
    sink.instr("ret", &[]);
}

fn materialize_return(
    sink: &mut dyn AssemblerSink,
    return_location: &ParameterLocation,
    frame: &FramePlan,
    value: ReturnValueSlot,
) {
    match (return_location, value) {
        (ParameterLocation::None, _) => {}
        (ParameterLocation::GeneralPurposeRegister(reg), ReturnValueSlot::Frame(disp)) => {
            sink.instr("mov", &[Operand::Gpr(*reg), rbp_slot(disp, PointerSize::Qword)]);
        }
        (ParameterLocation::SseRegister(n), ReturnValueSlot::Frame(disp)) => {
            sink.instr("movq", &[Operand::Xmm(*n), rbp_slot(disp, PointerSize::Qword)]);
        }
        (ParameterLocation::MultipleRegisters(qwords), ReturnValueSlot::Frame(disp)) => {
            for (i, q) in qwords.iter().enumerate() {
                let qdisp = disp + (i as i64) * 8;
                match q {
                    ParameterLocation::GeneralPurposeRegister(reg) => {
                        sink.instr("mov", &[Operand::Gpr(*reg), rbp_slot(qdisp, PointerSize::Qword)]);
                    }
                    ParameterLocation::SseRegister(n) => {
                        sink.instr("movq", &[Operand::Xmm(*n), rbp_slot(qdisp, PointerSize::Qword)]);
                    }
                    other => debug_assert!(false, "unexpected qword location {:?}", other),
                }
            }
        }
        (ParameterLocation::X87, ReturnValueSlot::Frame(disp)) => {
            sink.instr("fld", &[rbp_slot(disp, PointerSize::Tbyte)]);
        }
        (ParameterLocation::ComplexX87, ReturnValueSlot::Frame(disp)) => {
            sink.instr("fld", &[rbp_slot(disp, PointerSize::Tbyte)]);
        }
        (ParameterLocation::Memory { .. }, ReturnValueSlot::Buffer { disp, size }) => {
            let pointer_disp = frame.locals_disp(MEMORY_RETURN_POINTER_SLOT_OFFSET);
            sink.instr("mov", &[Operand::Gpr(GpReg::Rax), rbp_slot(pointer_disp, PointerSize::Qword)]);
            // The return buffer lives in the callee's own frame; the
            // destination is the caller-owned buffer the hidden pointer
            // names, stashed in RAX above. We scratch through R11 (caller-
            // saved, never ABI-significant here) to keep RAX intact for the
            // final `mov rax, r11` that hands the pointer back per the ABI.
            sink.instr("mov", &[Operand::Gpr(GpReg::R11), Operand::Gpr(GpReg::Rax)]);
            emit_aggregate_copy(sink, GpReg::R11, 0, GpReg::Rbp, disp, size);
            sink.instr("mov", &[Operand::Gpr(GpReg::Rax), Operand::Gpr(GpReg::R11)]);
        }
        (ParameterLocation::None, ReturnValueSlot::None) => {}
        other => debug_assert!(false, "unsupported return materialization combination: {:?}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::{frame, params};
    use crate::ir::{FunctionSignature, IrType, TypeCode};
    use crate::isa::TargetConfig;
    use crate::sink::TextSink;

    fn plan_for(sig: &FunctionSignature) -> (crate::abi::FunctionDescriptor, FramePlan) {
        let config = TargetConfig::default();
        let descriptor = params::allocate(sig, &config).unwrap();
        let locals = IrType::Padding { bytes: 0 };
        let plan = frame::plan(&descriptor, sig.is_variadic, &locals, 0, &config).unwrap();
        (descriptor, plan)
    }

    #[test]
    fn scenario_1_integer_return_loads_eax_then_leaves() {
        let sig = FunctionSignature {
            name: "f".to_string(),
            parameters: vec![IrType::int(32)],
            return_type: IrType::int(32),
            is_variadic: false,
            returns_twice: false,
        };
        let (descriptor, plan) = plan_for(&sig);
        let mut sink = TextSink::new();
        emit(&mut sink, &descriptor.return_location, &plan, ReturnValueSlot::Frame(-8));
        assert_eq!(sink.lines[0], "mov rax, qword ptr [rbp-8]");
        assert!(sink.lines.contains(&"mov rsp, rbp".to_string()));
        assert!(sink.lines.contains(&"ret".to_string()));
    }

    #[test]
    fn scenario_4_long_double_return_uses_fld() {
        let sig = FunctionSignature {
            name: "sinl".to_string(),
            parameters: vec![IrType::Scalar(TypeCode::LongDouble)],
            return_type: IrType::Scalar(TypeCode::LongDouble),
            is_variadic: false,
            returns_twice: false,
        };
        let (descriptor, plan) = plan_for(&sig);
        let mut sink = TextSink::new();
        emit(&mut sink, &descriptor.return_location, &plan, ReturnValueSlot::Frame(-16));
        assert_eq!(sink.lines[0], "fld tbyte ptr [rbp-16]");
    }

    #[test]
    fn memory_return_copies_into_callers_buffer_and_sets_rax() {
        let big = IrType::Struct {
            members: vec![IrType::Array {
                element: Box::new(IrType::Scalar(TypeCode::Int8)),
                count: 32,
            }],
            explicit_alignment: None,
        };
        let sig = FunctionSignature {
            name: "f3".to_string(),
            parameters: vec![big.clone()],
            return_type: big,
            is_variadic: false,
            returns_twice: false,
        };
        let (descriptor, plan) = plan_for(&sig);
        let mut sink = TextSink::new();
        emit(
            &mut sink,
            &descriptor.return_location,
            &plan,
            ReturnValueSlot::Buffer { disp: -64, size: 32 },
        );
        assert!(sink.lines.iter().any(|l| l.contains("mov rax,")));
        assert!(sink.lines.iter().any(|l| l.contains("mov r11, rax")));
        assert_eq!(sink.lines.last().unwrap(), "ret");
    }
}
