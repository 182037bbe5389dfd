//! x86-64 register descriptions.
//!
//! The ABI only ever talks about a handful of fixed registers — six
//! integer argument registers, two integer return registers, eight SSE
//! registers — so unlike a full register allocator's ISA description
//! this does not need a `RegBank`/`RegClass` table. A plain enum plus a
//! width-aware name lookup (`sub_register`) is what the prologue, the
//! call materializer, and the inline-asm formatter all need.

use std::fmt;

/// A general-purpose register, named by its 64-bit form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "enable-serde", derive(serde::Serialize, serde::Deserialize))]
#[allow(non_camel_case_types)]
pub enum GpReg {
    Rax,
    Rbx,
    Rcx,
    Rdx,
    Rsi,
    Rdi,
    Rbp,
    Rsp,
    R8,
    R9,
    R10,
    R11,
    R12,
    R13,
    R14,
    R15,
}

impl fmt::Display for GpReg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sub_register(8))
    }
}

impl GpReg {
    /// Integer argument registers in System V order (`spec.md` §3).
    pub const ARG_GPRS: [GpReg; 6] = [
        GpReg::Rdi,
        GpReg::Rsi,
        GpReg::Rdx,
        GpReg::Rcx,
        GpReg::R8,
        GpReg::R9,
    ];

    /// Integer return registers, in qword order.
    pub const RET_GPRS: [GpReg; 2] = [GpReg::Rax, GpReg::Rdx];

    /// Registers callee-saved under System V.
    pub const CALLEE_SAVED: [GpReg; 6] = [
        GpReg::Rbx,
        GpReg::Rbp,
        GpReg::R12,
        GpReg::R13,
        GpReg::R14,
        GpReg::R15,
    ];

    /// Registers caller-saved under System V (excluding RSP, which is
    /// never a general allocatable value).
    pub const CALLER_SAVED: [GpReg; 9] = [
        GpReg::Rax,
        GpReg::Rcx,
        GpReg::Rdx,
        GpReg::Rsi,
        GpReg::Rdi,
        GpReg::R8,
        GpReg::R9,
        GpReg::R10,
        GpReg::R11,
    ];

    /// Return the register's name at the given width in bytes (1, 2, 4,
    /// or 8), e.g. `Rax.sub_register(1)` is `"al"`.
    pub fn sub_register(self, bytes: u32) -> &'static str {
        use GpReg::*;
        match (self, bytes) {
            (Rax, 8) => "rax",
            (Rax, 4) => "eax",
            (Rax, 2) => "ax",
            (Rax, 1) => "al",
            (Rbx, 8) => "rbx",
            (Rbx, 4) => "ebx",
            (Rbx, 2) => "bx",
            (Rbx, 1) => "bl",
            (Rcx, 8) => "rcx",
            (Rcx, 4) => "ecx",
            (Rcx, 2) => "cx",
            (Rcx, 1) => "cl",
            (Rdx, 8) => "rdx",
            (Rdx, 4) => "edx",
            (Rdx, 2) => "dx",
            (Rdx, 1) => "dl",
            (Rsi, 8) => "rsi",
            (Rsi, 4) => "esi",
            (Rsi, 2) => "si",
            (Rsi, 1) => "sil",
            (Rdi, 8) => "rdi",
            (Rdi, 4) => "edi",
            (Rdi, 2) => "di",
            (Rdi, 1) => "dil",
            (Rbp, 8) => "rbp",
            (Rbp, 4) => "ebp",
            (Rbp, 2) => "bp",
            (Rbp, 1) => "bpl",
            (Rsp, 8) => "rsp",
            (Rsp, 4) => "esp",
            (Rsp, 2) => "sp",
            (Rsp, 1) => "spl",
            (R8, 8) => "r8",
            (R8, 4) => "r8d",
            (R8, 2) => "r8w",
            (R8, 1) => "r8b",
            (R9, 8) => "r9",
            (R9, 4) => "r9d",
            (R9, 2) => "r9w",
            (R9, 1) => "r9b",
            (R10, 8) => "r10",
            (R10, 4) => "r10d",
            (R10, 2) => "r10w",
            (R10, 1) => "r10b",
            (R11, 8) => "r11",
            (R11, 4) => "r11d",
            (R11, 2) => "r11w",
            (R11, 1) => "r11b",
            (R12, 8) => "r12",
            (R12, 4) => "r12d",
            (R12, 2) => "r12w",
            (R12, 1) => "r12b",
            (R13, 8) => "r13",
            (R13, 4) => "r13d",
            (R13, 2) => "r13w",
            (R13, 1) => "r13b",
            (R14, 8) => "r14",
            (R14, 4) => "r14d",
            (R14, 2) => "r14w",
            (R14, 1) => "r14b",
            (R15, 8) => "r15",
            (R15, 4) => "r15d",
            (R15, 2) => "r15w",
            (R15, 1) => "r15b",
            (_, other) => panic!("unsupported register width: {}", other),
        }
    }
}

/// The eight SSE argument registers, in order.
pub const ARG_XMMS: [u8; 8] = [0, 1, 2, 3, 4, 5, 6, 7];

/// SSE return registers, in qword order.
pub const RET_XMMS: [u8; 2] = [0, 1];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sub_register_widths() {
        assert_eq!(GpReg::Rdi.sub_register(8), "rdi");
        assert_eq!(GpReg::Rdi.sub_register(4), "edi");
        assert_eq!(GpReg::Rdi.sub_register(2), "di");
        assert_eq!(GpReg::Rdi.sub_register(1), "dil");
        assert_eq!(GpReg::R9.sub_register(4), "r9d");
    }

    #[test]
    fn arg_gprs_are_system_v_order() {
        assert_eq!(
            GpReg::ARG_GPRS,
            [GpReg::Rdi, GpReg::Rsi, GpReg::Rdx, GpReg::Rcx, GpReg::R8, GpReg::R9]
        );
    }
}
