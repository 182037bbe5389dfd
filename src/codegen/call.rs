//! Call Materializer (C6): marshal arguments and emit a call.

use smallvec::SmallVec;

use crate::abi::{FunctionDescriptor, ParameterLocation};
use crate::isa::GpReg;
use crate::sink::{AssemblerSink, DataWidth, Operand, PointerSize};

/// Threshold (in bytes) below which an aggregate copy is unrolled into
/// plain loads/stores rather than a `rep movs` loop. Taken from the
/// original's `copy_utils.c`/`call.c`, which draw the line at one
/// cache-line-ish chunk before preferring the string-move instructions.
pub const AGGREGATE_COPY_UNROLL_THRESHOLD: u64 = 64;

/// The set of caller-saved registers holding live values across a call,
/// following `cranelift-codegen`'s bitset-backed `RegisterSet`, scoped
/// down to just the fixed System V caller-saved files (this crate has no
/// coloring allocator to track a larger universe).
#[derive(Debug, Clone, Copy, Default)]
pub struct RegisterStash {
    gp: u16,
    sse: u8,
}

impl RegisterStash {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_gp(&mut self, reg: GpReg) {
        if let Some(i) = GpReg::CALLER_SAVED.iter().position(|r| *r == reg) {
            self.gp |= 1 << i;
        }
    }

    pub fn mark_sse(&mut self, n: u8) {
        debug_assert!(n < 8);
        self.sse |= 1 << n;
    }

    /// Drop a register from the stash because it is about to be
    /// overwritten by the call's return value and need not be preserved.
    pub fn exclude_gp(&mut self, reg: GpReg) {
        if let Some(i) = GpReg::CALLER_SAVED.iter().position(|r| *r == reg) {
            self.gp &= !(1 << i);
        }
    }

    pub fn exclude_sse(&mut self, n: u8) {
        self.sse &= !(1 << n);
    }

    fn iter_gp(&self) -> impl Iterator<Item = GpReg> + '_ {
        GpReg::CALLER_SAVED
            .iter()
            .copied()
            .enumerate()
            .filter(move |(i, _)| self.gp & (1 << i) != 0)
            .map(|(_, r)| r)
    }

    fn iter_sse(&self) -> impl Iterator<Item = u8> + '_ {
        (0u8..8).filter(move |n| self.sse & (1 << n) != 0)
    }

    fn sse_count(&self) -> usize {
        self.sse.count_ones() as usize
    }
}

/// Where an argument's current value lives, before marshalling moves it
/// to its ABI-designated location.
#[derive(Debug, Clone, Copy)]
pub enum ArgumentValue {
    /// An 8-byte-or-smaller scalar, at `[base + disp]`.
    Scalar { base: GpReg, disp: i64 },
    /// The address of an aggregate's first byte, `size` bytes long.
    Aggregate { base: GpReg, disp: i64, size: u64 },
}

/// Where the call's return value should end up.
#[derive(Debug, Clone, Copy)]
pub enum ReturnDest {
    Scalar { base: GpReg, disp: i64 },
    /// A caller-owned buffer the callee will memcpy the Memory-classified
    /// return value into; its address is also what gets passed as the
    /// hidden return pointer.
    Buffer { base: GpReg, disp: i64, size: u64 },
}

fn mem(base: GpReg, disp: i64, size: PointerSize) -> Operand {
    Operand::Memory { base, disp, size }
}

/// Emit a full call sequence, per `spec.md` §4.6.
#[allow(clippy::too_many_arguments)]
pub fn emit_call(
    sink: &mut dyn AssemblerSink,
    callee: CalleeTarget,
    descriptor: &FunctionDescriptor,
    args: &[ArgumentValue],
    return_dest: Option<ReturnDest>,
    mut stash: RegisterStash,
    outgoing_stack_bytes: u64,
    variadic_sse_count: Option<u8>,
    position_independent: bool,
    returns_twice: bool,
) {
    sink.instr(
        "sub",
        &[Operand::Gpr(GpReg::Rsp), Operand::Immediate(outgoing_stack_bytes as i64)],
    );

    if let Some(ReturnDest::Scalar { base, .. }) = &return_dest {
        stash.exclude_gp(*base);
    }
    emit_stash(sink, &stash, true);

    if let Some(ReturnDest::Buffer { base, disp, .. }) = &return_dest {
        sink.instr("lea", &[Operand::Gpr(GpReg::Rdi), mem(*base, *disp, PointerSize::Qword)]);
    }

    for (loc, value) in descriptor.parameters.iter().zip(args) {
        marshal_argument(sink, loc, value);
    }

    if let Some(sse_count) = variadic_sse_count {
        sink.instr("mov", &[Operand::Gpr(GpReg::Rax), Operand::Immediate(i64::from(sse_count))]);
    }

    if cfg!(debug_assertions) {
        sink.instr("test", &[Operand::Gpr(GpReg::Rsp), Operand::Immediate(0xf)]);
        sink.instr("jnz", &[Operand::Label("__kefir_abi_frame_check_panic".to_string())]);
    }

    match callee {
        CalleeTarget::Direct { symbol, external } => {
            sink.instr(
                "call",
                &[Operand::Symbol {
                    name: symbol.to_string(),
                    plt: external && position_independent,
                }],
            );
        }
        CalleeTarget::Indirect => {
            sink.instr("call", &[Operand::Gpr(GpReg::Rax)]);
        }
        CalleeTarget::TailDirect { symbol, external } => {
            sink.instr(
                "jmp",
                &[Operand::Symbol {
                    name: symbol.to_string(),
                    plt: external && position_independent,
                }],
            );
            return;
        }
    }

    if returns_twice {
        // The callee may hand control back here more than once (the
        // setjmp family). Every frame-resident value must be reloaded
        // from memory from this point on rather than trusted in whatever
        // register last held it — the driver owns that reload, this is
        // just the marker it hangs it off of. Mirrors the original's
        // preserve-active-registers-then-mark-all-locals-global pair
        // emitted right after the `call` for a `returns_twice` callee.
        sink.comment("returns_twice: treat all locals as reloaded from memory below this point");
    }

    retrieve_return(sink, descriptor, return_dest);
    emit_stash(sink, &stash, false);
    sink.instr(
        "add",
        &[Operand::Gpr(GpReg::Rsp), Operand::Immediate(outgoing_stack_bytes as i64)],
    );
}

/// The callee of a call instruction.
#[derive(Debug, Clone, Copy)]
pub enum CalleeTarget<'a> {
    Direct { symbol: &'a str, external: bool },
    Indirect,
    /// A tail call: emits `jmp` in place of `call` and skips return-value
    /// retrieval and unstashing, since control never comes back here.
    TailDirect { symbol: &'a str, external: bool },
}

fn marshal_argument(sink: &mut dyn AssemblerSink, loc: &ParameterLocation, value: &ArgumentValue) {
    match (loc, value) {
        (ParameterLocation::None, _) => {}
        (ParameterLocation::GeneralPurposeRegister(reg), ArgumentValue::Scalar { base, disp }) => {
            sink.instr("mov", &[Operand::Gpr(*reg), mem(*base, *disp, PointerSize::Qword)]);
        }
        (ParameterLocation::SseRegister(n), ArgumentValue::Scalar { base, disp }) => {
            sink.instr("movq", &[Operand::Xmm(*n), mem(*base, *disp, PointerSize::Qword)]);
        }
        (ParameterLocation::MultipleRegisters(qwords), ArgumentValue::Aggregate { base, disp, size }) => {
            for (i, q) in qwords.iter().enumerate() {
                let qdisp = disp + (i as i64) * 8;
                let remaining = size.saturating_sub((i as u64) * 8).min(8);
                let ptr_size = pointer_size_for(remaining);
                match q {
                    ParameterLocation::GeneralPurposeRegister(reg) => {
                        sink.instr("mov", &[Operand::Gpr(*reg), mem(*base, qdisp, ptr_size)]);
                    }
                    ParameterLocation::SseRegister(n) => {
                        sink.instr("movq", &[Operand::Xmm(*n), mem(*base, qdisp, ptr_size)]);
                    }
                    other => debug_assert!(false, "unexpected qword location {:?}", other),
                }
            }
        }
        (ParameterLocation::Memory { offset, .. }, ArgumentValue::Scalar { base, disp }) => {
            sink.instr("mov", &[Operand::Gpr(GpReg::Rax), mem(*base, *disp, PointerSize::Qword)]);
            sink.instr(
                "mov",
                &[mem(GpReg::Rsp, *offset as i64, PointerSize::Qword), Operand::Gpr(GpReg::Rax)],
            );
        }
        (ParameterLocation::Memory { offset, .. }, ArgumentValue::Aggregate { base, disp, size }) => {
            emit_aggregate_copy(sink, GpReg::Rsp, *offset as i64, *base, *disp, *size);
        }
        other => debug_assert!(
            false,
            "unsupported (location, value) combination in argument marshalling: {:?}",
            other.0
        ),
    }
}

fn pointer_size_for(bytes: u64) -> PointerSize {
    match bytes {
        0 | 1 => PointerSize::Byte,
        2 | 3 => PointerSize::Word,
        4..=7 => PointerSize::Dword,
        _ => PointerSize::Qword,
    }
}

fn retrieve_return(sink: &mut dyn AssemblerSink, descriptor: &FunctionDescriptor, dest: Option<ReturnDest>) {
    let dest = match dest {
        Some(d) => d,
        None => return,
    };
    match (&descriptor.return_location, dest) {
        (ParameterLocation::None, _) => {}
        (ParameterLocation::GeneralPurposeRegister(reg), ReturnDest::Scalar { base, disp }) => {
            sink.instr("mov", &[mem(base, disp, PointerSize::Qword), Operand::Gpr(*reg)]);
        }
        (ParameterLocation::SseRegister(n), ReturnDest::Scalar { base, disp }) => {
            sink.instr("movq", &[mem(base, disp, PointerSize::Qword), Operand::Xmm(*n)]);
        }
        (ParameterLocation::MultipleRegisters(qwords), ReturnDest::Scalar { base, disp }) => {
            for (i, q) in qwords.iter().enumerate() {
                let qdisp = disp + (i as i64) * 8;
                match q {
                    ParameterLocation::GeneralPurposeRegister(reg) => {
                        sink.instr("mov", &[mem(base, qdisp, PointerSize::Qword), Operand::Gpr(*reg)]);
                    }
                    ParameterLocation::SseRegister(n) => {
                        sink.instr("movq", &[mem(base, qdisp, PointerSize::Qword), Operand::Xmm(*n)]);
                    }
                    other => debug_assert!(false, "unexpected qword location {:?}", other),
                }
            }
        }
        (ParameterLocation::X87, ReturnDest::Scalar { base, disp }) => {
            sink.instr("fstp", &[mem(base, disp, PointerSize::Tbyte)]);
        }
        (ParameterLocation::Memory { .. }, ReturnDest::Buffer { .. }) => {
            // The value is already at the buffer the hidden pointer named;
            // nothing further to copy.
        }
        other => debug_assert!(false, "unsupported return retrieval combination: {:?}", other),
    }
}

fn emit_stash(sink: &mut dyn AssemblerSink, stash: &RegisterStash, preserve: bool) {
    let gps: SmallVec<[GpReg; 9]> = stash.iter_gp().collect();
    if preserve {
        for reg in &gps {
            sink.instr("push", &[Operand::Gpr(*reg)]);
        }
    } else {
        for reg in gps.iter().rev() {
            sink.instr("pop", &[Operand::Gpr(*reg)]);
        }
    }

    let sse_count = stash.sse_count();
    if sse_count == 0 {
        return;
    }
    if preserve {
        sink.instr(
            "sub",
            &[Operand::Gpr(GpReg::Rsp), Operand::Immediate((sse_count * 16) as i64)],
        );
        for (i, n) in stash.iter_sse().enumerate() {
            sink.instr(
                "movdqu",
                &[mem(GpReg::Rsp, (i * 16) as i64, PointerSize::Tbyte), Operand::Xmm(n)],
            );
        }
    } else {
        for (i, n) in stash.iter_sse().enumerate() {
            sink.instr(
                "movdqu",
                &[Operand::Xmm(n), mem(GpReg::Rsp, (i * 16) as i64, PointerSize::Tbyte)],
            );
        }
        sink.instr(
            "add",
            &[Operand::Gpr(GpReg::Rsp), Operand::Immediate((sse_count * 16) as i64)],
        );
    }
}

/// Copy `size` bytes from `[src_base + src_disp]` to `[dest_base +
/// dest_disp]`, unrolled below `AGGREGATE_COPY_UNROLL_THRESHOLD` and via
/// a `rep movs` string instruction above it.
pub(crate) fn emit_aggregate_copy(
    sink: &mut dyn AssemblerSink,
    dest_base: GpReg,
    dest_disp: i64,
    src_base: GpReg,
    src_disp: i64,
    size: u64,
) {
    if size == 0 {
        return;
    }
    if size <= AGGREGATE_COPY_UNROLL_THRESHOLD {
        emit_unrolled_copy(sink, dest_base, dest_disp, src_base, src_disp, size);
    } else {
        emit_rep_movs(sink, dest_base, dest_disp, src_base, src_disp, size);
    }
}

fn emit_unrolled_copy(
    sink: &mut dyn AssemblerSink,
    dest_base: GpReg,
    dest_disp: i64,
    src_base: GpReg,
    src_disp: i64,
    size: u64,
) {
    let mut offset = 0u64;
    let mut remaining = size;
    while remaining > 0 {
        let (chunk, ptr_size) = if remaining >= 8 {
            (8, PointerSize::Qword)
        } else if remaining >= 4 {
            (4, PointerSize::Dword)
        } else if remaining >= 2 {
            (2, PointerSize::Word)
        } else {
            (1, PointerSize::Byte)
        };
        sink.instr(
            "mov",
            &[Operand::Gpr(GpReg::Rax), mem(src_base, src_disp + offset as i64, ptr_size)],
        );
        sink.instr(
            "mov",
            &[mem(dest_base, dest_disp + offset as i64, ptr_size), Operand::Gpr(GpReg::Rax)],
        );
        offset += chunk;
        remaining -= chunk;
    }
}

fn emit_rep_movs(
    sink: &mut dyn AssemblerSink,
    dest_base: GpReg,
    dest_disp: i64,
    src_base: GpReg,
    src_disp: i64,
    size: u64,
) {
    let (unit, mnemonic) = if size % 8 == 0 {
        (8, "movsq_rep")
    } else if size % 4 == 0 {
        (4, "movsl_rep")
    } else if size % 2 == 0 {
        (2, "movsw_rep")
    } else {
        (1, "movsb_rep")
    };
    sink.instr("lea", &[Operand::Gpr(GpReg::Rdi), mem(dest_base, dest_disp, PointerSize::Qword)]);
    sink.instr("lea", &[Operand::Gpr(GpReg::Rsi), mem(src_base, src_disp, PointerSize::Qword)]);
    sink.instr("mov", &[Operand::Gpr(GpReg::Rcx), Operand::Immediate((size / unit) as i64)]);
    sink.instr("cld", &[]);
    sink.instr(mnemonic, &[]);
    let _ = DataWidth::Byte; // width table lives on the sink's data() path, not here
}

/// Is a call at the current point in the function eligible to be a tail
/// call, per `spec.md` §4.6?
pub fn is_tail_call_eligible(
    caller_incoming_stack_bytes: u64,
    callee_outgoing_stack_bytes: u64,
    caller_return_location: &ParameterLocation,
    callee_return_location: &ParameterLocation,
    live_values_span_call: bool,
    at_return_point: bool,
) -> bool {
    at_return_point
        && !live_values_span_call
        && callee_outgoing_stack_bytes <= caller_incoming_stack_bytes
        && locations_compatible(caller_return_location, callee_return_location)
}

fn locations_compatible(a: &ParameterLocation, b: &ParameterLocation) -> bool {
    std::mem::discriminant(a) == std::mem::discriminant(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unrolled_threshold_is_64_bytes() {
        assert_eq!(AGGREGATE_COPY_UNROLL_THRESHOLD, 64);
    }

    #[test]
    fn stash_tracks_only_caller_saved_registers() {
        let mut stash = RegisterStash::new();
        stash.mark_gp(GpReg::Rbx); // callee-saved: not tracked
        stash.mark_gp(GpReg::Rcx);
        assert_eq!(stash.iter_gp().collect::<Vec<_>>(), vec![GpReg::Rcx]);
    }

    #[test]
    fn exclude_drops_the_return_clobbered_register() {
        let mut stash = RegisterStash::new();
        stash.mark_gp(GpReg::Rax);
        stash.mark_gp(GpReg::Rcx);
        stash.exclude_gp(GpReg::Rax);
        assert_eq!(stash.iter_gp().collect::<Vec<_>>(), vec![GpReg::Rcx]);
    }

    #[test]
    fn tail_call_rejected_when_live_values_span_it() {
        let loc = ParameterLocation::GeneralPurposeRegister(GpReg::Rax);
        assert!(!is_tail_call_eligible(32, 16, &loc, &loc, true, true));
    }

    #[test]
    fn tail_call_rejected_when_not_at_return_point() {
        let loc = ParameterLocation::None;
        assert!(!is_tail_call_eligible(32, 16, &loc, &loc, false, false));
    }

    #[test]
    fn tail_call_accepted_when_all_checks_pass() {
        let loc = ParameterLocation::GeneralPurposeRegister(GpReg::Rax);
        assert!(is_tail_call_eligible(32, 16, &loc, &loc, false, true));
    }
}
