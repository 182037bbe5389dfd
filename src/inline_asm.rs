//! Inline-Asm Formatter (C9): substitute parameter placeholders in a user
//! inline-assembly template with ABI-resolved operands (`spec.md` §4.9).
//!
//! The grammar recognized in a template is: `%N` (plain substitution),
//! `%bN`/`%wN`/`%dN`/`%qN` (byte/word/dword/qword width forcing), `%lN`
//! (jump-target label), `%=` (a unique integer, once per fragment), `%%`
//! (a literal `%`). Everything outside a placeholder passes through
//! unchanged.

use std::fmt::Write as _;

use crate::error::{AbiError, AbiResult};
use crate::isa::GpReg;
use crate::module::symbols;

/// One inline-assembly operand, already resolved to its ABI location by
/// the Parameter Allocator (C3) when the fragment sits inside a function
/// body, or by a dedicated top-level allocator otherwise — this module
/// only consumes the resolved value, per `spec.md` §4.9's "Substitutions
/// use the parameter's pre-computed allocation."
#[derive(Debug, Clone)]
pub enum AsmParameter {
    /// A value living in a general-purpose register.
    Register(GpReg),
    /// A value living in an XMM register.
    XmmRegister(u8),
    /// A value at `[base + disp]`.
    Memory { base: GpReg, disp: i64 },
    /// A bare immediate.
    Immediate(i64),
    /// An identifier substituted verbatim (a symbol name or constant
    /// expression the driver has already rendered to text).
    Identifier(String),
    /// A jump target within the same fragment: substituted via `%lN` as
    /// the bit-exact trampoline label of `spec.md` §6.
    JumpTarget { target_uid: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Width {
    Byte,
    Word,
    Dword,
    Qword,
}

impl Width {
    fn bytes(self) -> u32 {
        match self {
            Width::Byte => 1,
            Width::Word => 2,
            Width::Dword => 4,
            Width::Qword => 8,
        }
    }

    fn ptr_prefix(self) -> &'static str {
        match self {
            Width::Byte => "byte ptr",
            Width::Word => "word ptr",
            Width::Dword => "dword ptr",
            Width::Qword => "qword ptr",
        }
    }
}

/// Substitute every placeholder in `template`, returning the text to hand
/// the assembler sink verbatim via `AssemblerSink::inline_assembly`.
///
/// `func` names the enclosing function (used only if a `%lN` jump-target
/// substitution occurs); `asm_id` is this fragment's unique id within the
/// module, threaded into `%=` and into jump-trampoline labels.
pub fn format_template(template: &str, func: &str, asm_id: u64, parameters: &[AsmParameter]) -> AbiResult<String> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.char_indices().peekable();

    while let Some((_, c)) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let (_, next) = chars.next().ok_or_else(|| AbiError::invalid_parameter("template ends with a bare '%'"))?;
        match next {
            '%' => out.push('%'),
            '=' => {
                write!(out, "{}", asm_id).expect("String write is infallible");
            }
            'l' => {
                let index = take_number(&mut chars)?;
                let param = parameter_at(parameters, index)?;
                let target_uid = match param {
                    AsmParameter::JumpTarget { target_uid } => *target_uid,
                    other => {
                        return Err(AbiError::invalid_parameter(format!(
                            "%l{} does not name a jump-target parameter: {:?}",
                            index, other
                        )))
                    }
                };
                out.push_str(&symbols::inline_asm_label(func, asm_id, target_uid));
            }
            'b' | 'w' | 'd' | 'q' => {
                let width = match next {
                    'b' => Width::Byte,
                    'w' => Width::Word,
                    'd' => Width::Dword,
                    'q' => Width::Qword,
                    _ => unreachable!(),
                };
                let index = take_number(&mut chars)?;
                let param = parameter_at(parameters, index)?;
                substitute(&mut out, param, Some(width))?;
            }
            '0'..='9' => {
                let index = take_number_starting_with(&mut chars, next)?;
                let param = parameter_at(parameters, index)?;
                substitute(&mut out, param, None)?;
            }
            other => {
                return Err(AbiError::invalid_parameter(format!(
                    "unrecognized inline-assembly placeholder '%{}'",
                    other
                )))
            }
        }
    }

    Ok(out)
}

fn take_number(chars: &mut std::iter::Peekable<std::str::CharIndices<'_>>) -> AbiResult<usize> {
    let (_, first) = chars
        .next()
        .ok_or_else(|| AbiError::invalid_parameter("placeholder missing a parameter index"))?;
    if !first.is_ascii_digit() {
        return Err(AbiError::invalid_parameter(format!(
            "expected a digit after placeholder prefix, found '{}'",
            first
        )));
    }
    take_number_starting_with(chars, first)
}

fn take_number_starting_with(chars: &mut std::iter::Peekable<std::str::CharIndices<'_>>, first: char) -> AbiResult<usize> {
    let mut digits = String::new();
    digits.push(first);
    while let Some((_, c)) = chars.peek() {
        if c.is_ascii_digit() {
            digits.push(*c);
            chars.next();
        } else {
            break;
        }
    }
    digits
        .parse()
        .map_err(|_| AbiError::invalid_parameter(format!("malformed placeholder index '{}'", digits)))
}

fn parameter_at(parameters: &[AsmParameter], index: usize) -> AbiResult<&AsmParameter> {
    parameters
        .get(index)
        .ok_or_else(|| AbiError::out_of_bounds(index, parameters.len()))
}

fn substitute(out: &mut String, param: &AsmParameter, width: Option<Width>) -> AbiResult<()> {
    match param {
        AsmParameter::Register(reg) => {
            let bytes = width.map(Width::bytes).unwrap_or(8);
            out.push_str(reg.sub_register(bytes));
        }
        AsmParameter::XmmRegister(n) => {
            write!(out, "xmm{}", n).expect("String write is infallible");
        }
        AsmParameter::Memory { base, disp } => {
            let prefix = width.unwrap_or(Width::Qword).ptr_prefix();
            if *disp >= 0 {
                write!(out, "{} [{}+{}]", prefix, base, disp).expect("String write is infallible");
            } else {
                write!(out, "{} [{}{}]", prefix, base, disp).expect("String write is infallible");
            }
        }
        AsmParameter::Immediate(value) => {
            write!(out, "{}", value).expect("String write is infallible");
        }
        AsmParameter::Identifier(name) => out.push_str(name),
        AsmParameter::JumpTarget { .. } => {
            return Err(AbiError::invalid_parameter(
                "a jump-target parameter can only be substituted via %lN",
            ))
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_register_substitution_uses_natural_width() {
        let out = format_template("mov %0, 1", "f", 0, &[AsmParameter::Register(GpReg::Rax)]).unwrap();
        assert_eq!(out, "mov rax, 1");
    }

    #[test]
    fn width_forced_substitution_narrows_the_register() {
        let out = format_template("mov %b0, 1", "f", 0, &[AsmParameter::Register(GpReg::Rax)]).unwrap();
        assert_eq!(out, "mov al, 1");
    }

    #[test]
    fn memory_operand_gets_pointer_size_prefix() {
        let out = format_template(
            "mov %d0, eax",
            "f",
            0,
            &[AsmParameter::Memory { base: GpReg::Rbp, disp: -8 }],
        )
        .unwrap();
        assert_eq!(out, "mov dword ptr [rbp-8], eax");
    }

    #[test]
    fn percent_percent_is_a_literal_percent() {
        let out = format_template("shl %0, %%1", "f", 0, &[AsmParameter::Immediate(2)]).unwrap();
        assert_eq!(out, "shl 2, %1");
    }

    #[test]
    fn percent_equals_is_the_fragment_unique_id() {
        let out = format_template("label_%=:", "f", 7, &[]).unwrap();
        assert_eq!(out, "label_7:");
    }

    #[test]
    fn jump_target_becomes_bit_exact_trampoline_label() {
        let out = format_template(
            "jmp %l0",
            "my_func",
            3,
            &[AsmParameter::JumpTarget { target_uid: 9 }],
        )
        .unwrap();
        assert_eq!(out, "jmp __kefir_asm_label_my_func_3_9");
    }

    #[test]
    fn out_of_range_index_is_reported() {
        let result = format_template("mov %5, 1", "f", 0, &[AsmParameter::Immediate(1)]);
        assert!(matches!(result, Err(AbiError::OutOfBounds { .. })));
    }

    #[test]
    fn bare_percent_sign_is_rejected() {
        let result = format_template("mov %", "f", 0, &[]);
        assert!(result.is_err());
    }
}
