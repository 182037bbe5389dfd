//! Eightbyte Classifier (C2): partition a type into 8-byte qwords and
//! assign each an ABI class.
//!
//! `classify` only decides per-qword classes; turning those into concrete
//! register assignments is the Parameter Allocator's job (`abi::params`,
//! C3), since that depends on which registers earlier parameters already
//! consumed and on whether the type sits in parameter or return position
//! (a bare `long double`, for instance, classifies identically either way
//! but is placed on the x87 stack only as a return value — as a parameter
//! it is always memory, per `spec.md` invariant 6).

use crate::entity::Slot;
use crate::error::AbiResult;
use crate::ir::{IrType, TypeCode};
use crate::isa::TargetConfig;
use crate::layout::{self, TypeLayoutTable};

/// One eightbyte's ABI class.
///
/// `SseUp` is part of the ABI's vocabulary for the upper half of a
/// 16-byte SSE vector register (`__m128`-shaped values); this crate does
/// not support vector types (`spec.md` §1), so no leaf ever produces it.
/// It stays in the enum because the post-pass correction rule is stated
/// in terms of it, and its absence is exactly what forces every aggregate
/// over 16 bytes into memory here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "enable-serde", derive(serde::Serialize, serde::Deserialize))]
pub enum EightbyteClass {
    NoClass,
    Integer,
    Sse,
    SseUp,
    X87,
    X87Up,
    ComplexX87,
    Memory,
}

fn merge(a: EightbyteClass, b: EightbyteClass) -> EightbyteClass {
    use EightbyteClass::*;
    if a == b {
        return a;
    }
    if a == NoClass {
        return b;
    }
    if b == NoClass {
        return a;
    }
    if a == Memory || b == Memory {
        return Memory;
    }
    if a == Integer || b == Integer {
        return Integer;
    }
    if matches!(a, X87 | X87Up | ComplexX87) || matches!(b, X87 | X87Up | ComplexX87) {
        return Memory;
    }
    Sse
}

/// The classification result for a whole type: its byte size and the
/// class of each of its eightbytes (empty for a zero-sized type).
#[derive(Debug, Clone)]
#[cfg_attr(feature = "enable-serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Classification {
    pub size: u64,
    pub qwords: Vec<EightbyteClass>,
}

impl Classification {
    pub fn is_memory(&self) -> bool {
        self.qwords.iter().any(|c| *c == EightbyteClass::Memory)
    }

    pub fn qword_class(&self, index: usize) -> EightbyteClass {
        self.qwords[index]
    }

    /// Is this exactly one eightbyte of class `Integer`?
    pub fn is_single_integer(&self) -> bool {
        self.qwords == [EightbyteClass::Integer]
    }

    pub fn is_single_sse(&self) -> bool {
        self.qwords == [EightbyteClass::Sse]
    }

    /// The long-double x87/x87-up pair, as produced for a bare `long
    /// double` (never for an aggregate containing one, which the
    /// post-pass always turns into `Memory`).
    pub fn is_x87_pair(&self) -> bool {
        self.qwords == [EightbyteClass::X87, EightbyteClass::X87Up]
    }
}

/// Classify `ty`, per `spec.md` §4.2.
pub fn classify(ty: &IrType, config: &TargetConfig) -> AbiResult<Classification> {
    let table = layout::compute(ty, config)?;
    let size = table.root().size;
    if size == 0 {
        return Ok(Classification {
            size: 0,
            qwords: Vec::new(),
        });
    }

    let mut contributions = Vec::new();
    let mut cursor = 0usize;
    collect(&table, &mut cursor, config, &mut contributions)?;

    let num_qwords = ((size + 7) / 8) as usize;
    let mut qwords = vec![EightbyteClass::NoClass; num_qwords];
    for (offset, csize, class) in contributions {
        if csize == 0 {
            continue;
        }
        let lo = (offset / 8) as usize;
        let hi = (((offset + csize - 1) / 8) as usize).min(qwords.len() - 1);
        for slot in &mut qwords[lo..=hi] {
            *slot = merge(*slot, class);
        }
    }

    let mut memory = size > 64;
    if qwords.iter().any(|c| *c == EightbyteClass::Memory) {
        memory = true;
    }
    for i in 0..qwords.len() {
        if qwords[i] == EightbyteClass::X87Up && (i == 0 || qwords[i - 1] != EightbyteClass::X87) {
            memory = true;
        }
    }
    if size > 16 {
        if qwords[0] != EightbyteClass::Sse {
            memory = true;
        }
        if qwords[1..].iter().any(|c| *c != EightbyteClass::SseUp) {
            memory = true;
        }
    }
    if memory {
        for slot in &mut qwords {
            *slot = EightbyteClass::Memory;
        }
    }

    Ok(Classification { size, qwords })
}

/// Walk the already-computed layout table in traversal order, collecting
/// `(absolute_offset, size, class)` triples for every scalar leaf.
///
/// Arrays are special: `spec.md` §3's flattening only materializes one
/// representative child slot per array (`IrType::flatten`), so its
/// contributions are collected once and then replicated `count - 1` more
/// times at `offset + k * element_size`, rather than re-walked from the
/// (nonexistent) remaining entries.
fn collect(
    table: &TypeLayoutTable,
    cursor: &mut usize,
    config: &TargetConfig,
    out: &mut Vec<(u64, u64, EightbyteClass)>,
) -> AbiResult<()> {
    let slot = Slot::new(*cursor);
    let type_entry = *table.type_entry(slot);
    let layout_entry = *table.entry(slot);
    *cursor += 1;

    match type_entry.typecode {
        TypeCode::Struct | TypeCode::Union => {
            for _ in 0..type_entry.param {
                collect(table, cursor, config, out)?;
            }
        }
        TypeCode::Array => {
            let elem_size = table.entry(Slot::new(*cursor)).size;
            let before = out.len();
            collect(table, cursor, config, out)?;
            let element: Vec<_> = out[before..].to_vec();
            for k in 1..type_entry.param {
                for (offset, csize, class) in &element {
                    out.push((offset + k * elem_size, *csize, *class));
                }
            }
        }
        TypeCode::Padding | TypeCode::Vararg => {}
        TypeCode::Bits => {
            let bf = layout_entry
                .bit_field
                .expect("a `Bits` slot always carries a BitFieldLayout");
            out.push((bf.unit_absolute_offset, u64::from(bf.unit_size), EightbyteClass::Integer));
        }
        TypeCode::LongDouble if !config.disable_long_double => {
            out.push((layout_entry.absolute_offset, 8, EightbyteClass::X87));
            out.push((layout_entry.absolute_offset + 8, 8, EightbyteClass::X87Up));
        }
        TypeCode::ComplexLongDouble if !config.disable_long_double => {
            out.push((layout_entry.absolute_offset, layout_entry.size, EightbyteClass::ComplexX87));
        }
        scalar => {
            if layout_entry.size > 0 {
                out.push((layout_entry.absolute_offset, layout_entry.size, classify_scalar(scalar)));
            }
        }
    }
    Ok(())
}

fn classify_scalar(code: TypeCode) -> EightbyteClass {
    match code {
        TypeCode::Bool
        | TypeCode::Int8
        | TypeCode::Int16
        | TypeCode::Int32
        | TypeCode::Int64
        | TypeCode::Word => EightbyteClass::Integer,
        // Reached only with `disable_long_double`, where long doubles and
        // complex long doubles have already been downgraded to `double`-
        // and `complex double`-sized scalars by `layout::scalar_layout`.
        TypeCode::Float32 | TypeCode::Float64 | TypeCode::LongDouble => EightbyteClass::Sse,
        TypeCode::ComplexFloat32 | TypeCode::ComplexFloat64 | TypeCode::ComplexLongDouble => {
            EightbyteClass::Sse
        }
        other => unreachable!("not a leaf typecode: {:?}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_int_is_single_integer_qword() {
        let ty = IrType::int(32);
        let c = classify(&ty, &TargetConfig::default()).unwrap();
        assert!(c.is_single_integer());
    }

    #[test]
    fn two_floats_are_two_sse_qwords() {
        // struct P { float x, y; } -> 8 bytes, one eightbyte, both halves SSE.
        let ty = IrType::Struct {
            members: vec![IrType::Scalar(TypeCode::Float32), IrType::Scalar(TypeCode::Float32)],
            explicit_alignment: None,
        };
        let c = classify(&ty, &TargetConfig::default()).unwrap();
        assert!(c.is_single_sse());
    }

    #[test]
    fn two_doubles_are_two_sse_eightbytes() {
        // struct V2 { double x, y; } -> 16 bytes, two eightbytes, each SSE.
        let ty = IrType::Struct {
            members: vec![IrType::Scalar(TypeCode::Float64), IrType::Scalar(TypeCode::Float64)],
            explicit_alignment: None,
        };
        let c = classify(&ty, &TargetConfig::default()).unwrap();
        assert_eq!(c.qwords, vec![EightbyteClass::Sse, EightbyteClass::Sse]);
        assert!(!c.is_memory());
    }

    #[test]
    fn large_char_array_is_memory() {
        // struct Big { char x[32]; }
        let ty = IrType::Struct {
            members: vec![IrType::Array {
                element: Box::new(IrType::Scalar(TypeCode::Int8)),
                count: 32,
            }],
            explicit_alignment: None,
        };
        let c = classify(&ty, &TargetConfig::default()).unwrap();
        assert!(c.is_memory());
    }

    #[test]
    fn long_double_is_x87_pair() {
        let ty = IrType::Scalar(TypeCode::LongDouble);
        let c = classify(&ty, &TargetConfig::default()).unwrap();
        assert!(c.is_x87_pair());
    }

    #[test]
    fn long_double_downgrades_to_sse_when_disabled() {
        let ty = IrType::Scalar(TypeCode::LongDouble);
        let mut config = TargetConfig::default();
        config.disable_long_double = true;
        let c = classify(&ty, &config).unwrap();
        assert!(c.is_single_sse());
    }

    #[test]
    fn mixed_int_and_float_eightbyte_is_integer() {
        // struct Mixed { int a; float b; } -> one eightbyte, int+sse merges to Integer.
        let ty = IrType::Struct {
            members: vec![IrType::int(32), IrType::Scalar(TypeCode::Float32)],
            explicit_alignment: None,
        };
        let c = classify(&ty, &TargetConfig::default()).unwrap();
        assert_eq!(c.qwords, vec![EightbyteClass::Integer]);
    }

    #[test]
    fn int_array_of_two_tiles_into_one_integer_eightbyte() {
        let ty = IrType::Array {
            element: Box::new(IrType::int(32)),
            count: 2,
        };
        let c = classify(&ty, &TargetConfig::default()).unwrap();
        assert_eq!(c.qwords, vec![EightbyteClass::Integer]);
    }

    #[test]
    fn zero_sized_type_has_no_qwords() {
        let ty = IrType::Padding { bytes: 0 };
        let c = classify(&ty, &TargetConfig::default()).unwrap();
        assert_eq!(c.size, 0);
        assert!(c.qwords.is_empty());
    }
}
