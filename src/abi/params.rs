//! Parameter Allocator (C3): turn a function signature's classifications
//! into concrete register/memory locations.

use smallvec::SmallVec;

use crate::classify::{classify, Classification, EightbyteClass};
use crate::error::{AbiError, AbiResult};
use crate::ir::{FunctionSignature, IrType};
use crate::isa::{GpReg, TargetConfig, ARG_XMMS, RET_XMMS};

/// Where a single eightbyte (or a whole zero/one-eightbyte value) lives.
///
/// `Memory`'s `offset` is the canonical stack-argument offset as seen by
/// the *caller*, i.e. the byte the value sits at relative to `RSP` at the
/// moment of `CALL`. The callee sees the same slot at `RBP +
/// FramePlan::parameters_in_memory_base + offset`, past the pushed
/// return address and saved `RBP` — `abi::frame` is what turns one view
/// into the other; this type only records the one canonical number.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "enable-serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ParameterLocation {
    /// A zero-sized value: no register, no stack slot.
    None,
    GeneralPurposeRegister(GpReg),
    /// An XMM register, numbered 0..7 for parameters, 0..1 for returns.
    SseRegister(u8),
    /// A `long double` return value, living on the x87 stack.
    X87,
    X87Up,
    /// A `_Complex long double` return value.
    ComplexX87,
    /// An aggregate spanning more than one eightbyte, each with its own
    /// location (`spec.md` invariant 5: at most two, since anything
    /// larger is always `Memory`).
    MultipleRegisters(SmallVec<[ParameterLocation; 2]>),
    Memory { base: GpReg, offset: u64 },
    /// A member's location inside a parent aggregate already placed by
    /// one of the variants above.
    Nested {
        parent_location: Box<ParameterLocation>,
        member_offset: u64,
    },
}

/// The resources a call to a function consumes from the shared register
/// pools and the stack, per `spec.md` §3's Function Descriptor.
#[derive(Debug, Clone, Copy, Default)]
#[cfg_attr(feature = "enable-serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CallerRequirements {
    pub gp_used: u8,
    pub sse_used: u8,
    pub stack_bytes: u64,
    pub stack_align: u32,
}

/// A function declaration's full calling-convention picture: every
/// parameter's location, the return location, an implicit return-pointer
/// parameter when applicable, and the resource summary callers need.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "enable-serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FunctionDescriptor {
    pub parameters: Vec<ParameterLocation>,
    pub return_location: ParameterLocation,
    /// Present exactly when the return value is `Memory`: the register
    /// (always `RDI`) that carries the caller-owned return buffer's
    /// address.
    pub implicit_parameter: Option<GpReg>,
    pub requirements: CallerRequirements,
}

struct AllocatorState {
    int_regs_used: u8,
    sse_regs_used: u8,
    stack_bytes_used: u64,
    stack_align: u32,
}

impl AllocatorState {
    fn new() -> Self {
        AllocatorState {
            int_regs_used: 0,
            sse_regs_used: 0,
            stack_bytes_used: 0,
            stack_align: 8,
        }
    }
}

/// Allocate the Function Descriptor for `signature`, per `spec.md` §4.3.
pub fn allocate(signature: &FunctionSignature, config: &TargetConfig) -> AbiResult<FunctionDescriptor> {
    let mut state = AllocatorState::new();

    let return_class = classify(&signature.return_type, config)?;
    let (return_location, implicit_parameter) = allocate_return(&return_class, &mut state)?;

    let mut parameters = Vec::with_capacity(signature.parameters.len());
    for param_ty in &signature.parameters {
        let class = classify(param_ty, config)?;
        parameters.push(allocate_parameter(param_ty, &class, &mut state)?);
    }

    Ok(FunctionDescriptor {
        parameters,
        return_location,
        implicit_parameter,
        requirements: CallerRequirements {
            gp_used: state.int_regs_used,
            sse_used: state.sse_regs_used,
            stack_bytes: state.stack_bytes_used,
            stack_align: state.stack_align,
        },
    })
}

fn allocate_return(
    class: &Classification,
    state: &mut AllocatorState,
) -> AbiResult<(ParameterLocation, Option<GpReg>)> {
    if class.size == 0 {
        return Ok((ParameterLocation::None, None));
    }
    if class.is_memory() {
        state.int_regs_used += 1;
        return Ok((
            ParameterLocation::Memory {
                base: GpReg::Rdi,
                offset: 0,
            },
            Some(GpReg::Rdi),
        ));
    }
    if class.is_x87_pair() {
        return Ok((ParameterLocation::X87, None));
    }
    if class.qwords == [EightbyteClass::ComplexX87] {
        return Ok((ParameterLocation::ComplexX87, None));
    }

    let mut int_idx = 0usize;
    let mut sse_idx = 0usize;
    let mut locations = SmallVec::<[ParameterLocation; 2]>::new();
    for qclass in &class.qwords {
        let loc = match qclass {
            EightbyteClass::Integer => {
                let reg = *GpReg::RET_GPRS
                    .get(int_idx)
                    .ok_or_else(|| AbiError::not_supported("return exhausts integer return registers"))?;
                int_idx += 1;
                ParameterLocation::GeneralPurposeRegister(reg)
            }
            EightbyteClass::Sse => {
                let reg = *RET_XMMS
                    .get(sse_idx)
                    .ok_or_else(|| AbiError::not_supported("return exhausts SSE return registers"))?;
                sse_idx += 1;
                ParameterLocation::SseRegister(reg)
            }
            other => {
                return Err(AbiError::invalid_state(format!(
                    "unexpected eightbyte class in register return: {:?}",
                    other
                )))
            }
        };
        locations.push(loc);
    }

    if locations.len() == 1 {
        Ok((locations.into_iter().next().unwrap(), None))
    } else {
        Ok((ParameterLocation::MultipleRegisters(locations), None))
    }
}

fn allocate_parameter(
    ty: &IrType,
    class: &Classification,
    state: &mut AllocatorState,
) -> AbiResult<ParameterLocation> {
    if class.size == 0 {
        return Ok(ParameterLocation::None);
    }

    // Per invariant 6, long doubles (and anything the classifier marked
    // Memory, or over 16 bytes) are always passed in memory as
    // parameters — the x87 stack is a return-only location.
    let forces_memory = class.is_memory()
        || class
            .qwords
            .iter()
            .any(|c| matches!(c, EightbyteClass::X87 | EightbyteClass::X87Up | EightbyteClass::ComplexX87));

    if !forces_memory {
        let demand_int = class.qwords.iter().filter(|c| **c == EightbyteClass::Integer).count() as u8;
        let demand_sse = class.qwords.iter().filter(|c| **c == EightbyteClass::Sse).count() as u8;

        if state.int_regs_used + demand_int <= 6 && state.sse_regs_used + demand_sse <= 8 {
            let mut locations = SmallVec::<[ParameterLocation; 2]>::new();
            for qclass in &class.qwords {
                let loc = match qclass {
                    EightbyteClass::Integer => {
                        let reg = GpReg::ARG_GPRS[state.int_regs_used as usize];
                        state.int_regs_used += 1;
                        ParameterLocation::GeneralPurposeRegister(reg)
                    }
                    EightbyteClass::Sse => {
                        let reg = ARG_XMMS[state.sse_regs_used as usize];
                        state.sse_regs_used += 1;
                        ParameterLocation::SseRegister(reg)
                    }
                    other => {
                        return Err(AbiError::invalid_state(format!(
                            "unexpected eightbyte class in register parameter: {:?}",
                            other
                        )))
                    }
                };
                locations.push(loc);
            }
            return Ok(if locations.len() == 1 {
                locations.into_iter().next().unwrap()
            } else {
                ParameterLocation::MultipleRegisters(locations)
            });
        }
    }

    // Memory parameter: round up to max(8, the type's own alignment).
    let param_align = layout_alignment(ty)?;
    let align = param_align.max(8) as u64;
    let offset = round_up(state.stack_bytes_used, align);
    state.stack_align = state.stack_align.max(align as u32);
    state.stack_bytes_used = offset + round_up(class.size, 8);
    Ok(ParameterLocation::Memory {
        base: GpReg::Rsp,
        offset,
    })
}

fn layout_alignment(ty: &IrType) -> AbiResult<u32> {
    let table = crate::layout::compute(ty, &TargetConfig::default())?;
    Ok(table.root().alignment)
}

fn round_up(value: u64, align: u64) -> u64 {
    (value + align - 1) & !(align - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::TypeCode;

    fn sig(params: Vec<IrType>, return_type: IrType) -> FunctionSignature {
        FunctionSignature {
            name: "f".to_string(),
            parameters: params,
            return_type,
            is_variadic: false,
            returns_twice: false,
        }
    }

    #[test]
    fn scenario_1_int_in_int_out() {
        let s = sig(vec![IrType::int(32)], IrType::int(32));
        let d = allocate(&s, &TargetConfig::default()).unwrap();
        assert_eq!(d.parameters[0], ParameterLocation::GeneralPurposeRegister(GpReg::Rdi));
        assert_eq!(d.return_location, ParameterLocation::GeneralPurposeRegister(GpReg::Rax));
        assert!(d.implicit_parameter.is_none());
    }

    #[test]
    fn scenario_3_big_struct_is_memory_both_ways() {
        let big = IrType::Struct {
            members: vec![IrType::Array {
                element: Box::new(IrType::Scalar(TypeCode::Int8)),
                count: 32,
            }],
            explicit_alignment: None,
        };
        let s = sig(vec![big.clone()], big);
        let d = allocate(&s, &TargetConfig::default()).unwrap();
        assert!(matches!(d.parameters[0], ParameterLocation::Memory { .. }));
        assert!(matches!(d.return_location, ParameterLocation::Memory { .. }));
        assert_eq!(d.implicit_parameter, Some(GpReg::Rdi));
        // RDI reserved for the return pointer, so the (otherwise
        // register-eligible) parameter is pushed off the registers
        // anyway here since the struct itself classifies as Memory.
    }

    #[test]
    fn scenario_4_long_double_param_is_memory_return_is_x87() {
        let s = sig(vec![IrType::Scalar(TypeCode::LongDouble)], IrType::Scalar(TypeCode::LongDouble));
        let d = allocate(&s, &TargetConfig::default()).unwrap();
        assert!(matches!(d.parameters[0], ParameterLocation::Memory { .. }));
        assert_eq!(d.return_location, ParameterLocation::X87);
    }

    #[test]
    fn seventh_integer_parameter_spills_to_memory() {
        let params: Vec<IrType> = (0..7).map(|_| IrType::int(64)).collect();
        let s = sig(params, IrType::int(32));
        let d = allocate(&s, &TargetConfig::default()).unwrap();
        for loc in &d.parameters[..6] {
            assert!(matches!(loc, ParameterLocation::GeneralPurposeRegister(_)));
        }
        assert!(matches!(d.parameters[6], ParameterLocation::Memory { offset: 0, .. }));
    }

    #[test]
    fn memory_return_reserves_rdi_and_next_int_param_is_rsi() {
        let big = IrType::Struct {
            members: vec![IrType::Array {
                element: Box::new(IrType::Scalar(TypeCode::Int8)),
                count: 32,
            }],
            explicit_alignment: None,
        };
        let s = sig(vec![IrType::int(32)], big);
        let d = allocate(&s, &TargetConfig::default()).unwrap();
        assert_eq!(d.implicit_parameter, Some(GpReg::Rdi));
        assert_eq!(d.parameters[0], ParameterLocation::GeneralPurposeRegister(GpReg::Rsi));
    }
}
