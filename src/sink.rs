//! The write-only assembler sink interface (`spec.md` §6).
//!
//! The sink renders a syntax dialect (Intel with or without size prefixes,
//! or AT&T); that rendering is an external collaborator's job (`spec.md`
//! §1, "The assembler text formatter... treated as a sink"). This crate
//! only ever calls through `AssemblerSink`, so it never has to know which
//! dialect it is talking to.

use crate::isa::GpReg;
use std::fmt;

/// A directive-level data width, used by `data`/`bindata`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataWidth {
    Byte,
    Word,
    Double,
    Quad,
    Ascii,
}

/// One assembly-level operand. Instruction helper methods on
/// `AssemblerSink` take these rather than raw strings, so a sink can
/// render registers, memory, and immediates in its own dialect.
#[derive(Debug, Clone)]
pub enum Operand {
    Gpr(GpReg),
    /// An XMM register, numbered 0..15.
    Xmm(u8),
    /// The x87 top-of-stack pseudo-register.
    St0,
    Immediate(i64),
    /// `[base + disp]`, sized via `PointerSize`.
    Memory {
        base: GpReg,
        disp: i64,
        size: PointerSize,
    },
    /// A bare symbol reference, optionally PLT-relocated.
    Symbol { name: String, plt: bool },
    Label(String),
}

/// Pointer-size prefix for a memory operand (`byte ptr`, `qword ptr`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerSize {
    Byte,
    Word,
    Dword,
    Qword,
    Tbyte,
}

impl fmt::Display for PointerSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PointerSize::Byte => "byte",
            PointerSize::Word => "word",
            PointerSize::Dword => "dword",
            PointerSize::Qword => "qword",
            PointerSize::Tbyte => "tbyte",
        })
    }
}

/// The write-only sink `spec.md` §6 describes. Every method is a thin,
/// synchronous emit: the sink itself owns buffering and dialect
/// rendering, and is expected to never fail except through `fmt::Error`-
/// shaped plumbing, which callers of this crate surface however they see
/// fit (this crate's own entry points do not return I/O errors).
pub trait AssemblerSink {
    fn section(&mut self, name: &str);
    fn label(&mut self, name: &str);
    fn global(&mut self, symbol: &str);
    fn external(&mut self, symbol: &str);
    fn align(&mut self, bytes: u32);
    fn align_zero(&mut self, bytes: u32);

    fn data(&mut self, kind: DataWidth, operands: &[Operand]);
    fn bindata(&mut self, bytes: &[u8]);
    fn zerodata(&mut self, bytes: u64);
    fn uninitdata(&mut self, bytes: u64);

    fn instr(&mut self, mnemonic: &str, operands: &[Operand]);

    fn inline_assembly(&mut self, template: &str);

    fn comment(&mut self, text: &str);
    fn newline(&mut self, count: u32);
    fn close(&mut self);
}

/// A simple in-memory `AssemblerSink` used by this crate's own tests: it
/// just records every call as a line of text. A real driver would plug in
/// a dialect-aware formatter instead.
#[derive(Debug, Default)]
pub struct TextSink {
    pub lines: Vec<String>,
}

impl TextSink {
    pub fn new() -> Self {
        Self { lines: Vec::new() }
    }

    fn operand_text(op: &Operand) -> String {
        match op {
            Operand::Gpr(r) => format!("{}", r),
            Operand::Xmm(n) => format!("xmm{}", n),
            Operand::St0 => "st0".to_string(),
            Operand::Immediate(v) => format!("{}", v),
            Operand::Memory { base, disp, size } => {
                if *disp >= 0 {
                    format!("{} ptr [{}+{}]", size, base, disp)
                } else {
                    format!("{} ptr [{}{}]", size, base, disp)
                }
            }
            Operand::Symbol { name, plt } => {
                if *plt {
                    format!("{}@PLT", name)
                } else {
                    name.clone()
                }
            }
            Operand::Label(name) => name.clone(),
        }
    }
}

impl AssemblerSink for TextSink {
    fn section(&mut self, name: &str) {
        self.lines.push(format!("section {}", name));
    }

    fn label(&mut self, name: &str) {
        self.lines.push(format!("{}:", name));
    }

    fn global(&mut self, symbol: &str) {
        self.lines.push(format!("global {}", symbol));
    }

    fn external(&mut self, symbol: &str) {
        self.lines.push(format!("extern {}", symbol));
    }

    fn align(&mut self, bytes: u32) {
        self.lines.push(format!("align {}", bytes));
    }

    fn align_zero(&mut self, bytes: u32) {
        self.lines.push(format!("align {}, 0", bytes));
    }

    fn data(&mut self, kind: DataWidth, operands: &[Operand]) {
        let directive = match kind {
            DataWidth::Byte => ".byte",
            DataWidth::Word => ".word",
            DataWidth::Double => ".long",
            DataWidth::Quad => ".quad",
            DataWidth::Ascii => ".ascii",
        };
        let rendered: Vec<String> = operands.iter().map(Self::operand_text).collect();
        self.lines.push(format!("{} {}", directive, rendered.join(", ")));
    }

    fn bindata(&mut self, bytes: &[u8]) {
        let rendered: Vec<String> = bytes.iter().map(|b| format!("0x{:02x}", b)).collect();
        self.lines.push(format!(".byte {}", rendered.join(", ")));
    }

    fn zerodata(&mut self, bytes: u64) {
        self.lines.push(format!(".zero {}", bytes));
    }

    fn uninitdata(&mut self, bytes: u64) {
        self.lines.push(format!(".zero {}", bytes));
    }

    fn instr(&mut self, mnemonic: &str, operands: &[Operand]) {
        if operands.is_empty() {
            self.lines.push(mnemonic.to_string());
        } else {
            let rendered: Vec<String> = operands.iter().map(Self::operand_text).collect();
            self.lines.push(format!("{} {}", mnemonic, rendered.join(", ")));
        }
    }

    fn inline_assembly(&mut self, template: &str) {
        self.lines.push(template.to_string());
    }

    fn comment(&mut self, text: &str) {
        self.lines.push(format!("; {}", text));
    }

    fn newline(&mut self, count: u32) {
        for _ in 0..count {
            self.lines.push(String::new());
        }
    }

    fn close(&mut self) {}
}
