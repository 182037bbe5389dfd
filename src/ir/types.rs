//! The flat, slot-indexed type representation of `spec.md` §3.
//!
//! `IrType` is the ergonomic, recursive shape a driver (or a test) builds:
//! structs hold a `Vec` of members, arrays hold a boxed element type. Deep
//! inside the classifier and the layout engine, though, we want the flat
//! traversal the design notes call for ("the source IR is a flat
//! slot-indexed tree... an implementation should preserve this flat
//! representation — it permits O(1) sibling iteration and caches well").
//! `IrType::flatten` bridges the two: it walks the tree once and produces
//! the `Vec<TypeEntry>` that `layout` and `classify` actually index by
//! `Slot`.

use crate::entity::Slot;

/// Scalar and structural type codes (`spec.md` §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCode {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
    LongDouble,
    ComplexFloat32,
    ComplexFloat64,
    ComplexLongDouble,
    /// A pointer-sized integer (`word` in the spec's vocabulary).
    Word,
    /// A bit-field of `param` bits, packed into the nearest standard
    /// integer container.
    Bits,
    /// Opens an aggregate whose `param` children (struct/union) or single
    /// repeated child (array) follow immediately.
    Struct,
    Union,
    Array,
    /// Inter-field padding with an explicit byte count in `param`.
    Padding,
    /// The variadic marker (`...`); carries no storage of its own.
    Vararg,
}

impl TypeCode {
    /// Does this typecode open an aggregate (consume child slots)?
    pub fn is_aggregate_opener(self) -> bool {
        matches!(self, TypeCode::Struct | TypeCode::Union | TypeCode::Array)
    }

    pub fn is_complex(self) -> bool {
        matches!(
            self,
            TypeCode::ComplexFloat32 | TypeCode::ComplexFloat64 | TypeCode::ComplexLongDouble
        )
    }

    pub fn is_float(self) -> bool {
        matches!(self, TypeCode::Float32 | TypeCode::Float64 | TypeCode::LongDouble) || self.is_complex()
    }
}

/// A flattened per-slot entry: a typecode plus its parameter (array
/// length, member count, bit-field width, or padding byte count) and an
/// optional explicit alignment override.
#[derive(Debug, Clone, Copy)]
pub struct TypeEntry {
    pub typecode: TypeCode,
    pub param: u64,
    pub explicit_alignment: Option<u32>,
}

/// The recursive, driver-facing type tree.
#[derive(Debug, Clone)]
pub enum IrType {
    Scalar(TypeCode),
    /// A bit-field; `container` names the standard integer type the bits
    /// are packed into (`Int8`..`Int64`), `width` is the bit count. A
    /// `width` of zero is the zero-width bit-field that forces the next
    /// field onto a new storage-unit boundary.
    BitField { container: TypeCode, width: u32 },
    Struct {
        members: Vec<IrType>,
        explicit_alignment: Option<u32>,
    },
    Union {
        members: Vec<IrType>,
        explicit_alignment: Option<u32>,
    },
    Array {
        element: Box<IrType>,
        count: u64,
    },
    Padding {
        bytes: u32,
    },
    Vararg,
}

impl IrType {
    pub fn int(bits: u32) -> Self {
        IrType::Scalar(match bits {
            8 => TypeCode::Int8,
            16 => TypeCode::Int16,
            32 => TypeCode::Int32,
            64 => TypeCode::Int64,
            other => panic!("unsupported integer width {}", other),
        })
    }

    pub fn pointer() -> Self {
        IrType::Scalar(TypeCode::Word)
    }

    /// Flatten the tree into its slot-indexed form, in traversal order:
    /// an aggregate opener slot is immediately followed by its children's
    /// slots (struct/union) or by one child repeated `count` times
    /// (array), exactly as `spec.md` §3 describes.
    pub fn flatten(&self) -> Vec<TypeEntry> {
        let mut out = Vec::new();
        self.flatten_into(&mut out);
        out
    }

    fn flatten_into(&self, out: &mut Vec<TypeEntry>) {
        match self {
            IrType::Scalar(code) => out.push(TypeEntry {
                typecode: *code,
                param: 0,
                explicit_alignment: None,
            }),
            IrType::BitField { container, width } => out.push(TypeEntry {
                typecode: TypeCode::Bits,
                param: u64::from(*width),
                explicit_alignment: Some(scalar_alignment(*container)),
            }),
            IrType::Struct {
                members,
                explicit_alignment,
            } => {
                out.push(TypeEntry {
                    typecode: TypeCode::Struct,
                    param: members.len() as u64,
                    explicit_alignment: *explicit_alignment,
                });
                for m in members {
                    m.flatten_into(out);
                }
            }
            IrType::Union {
                members,
                explicit_alignment,
            } => {
                out.push(TypeEntry {
                    typecode: TypeCode::Union,
                    param: members.len() as u64,
                    explicit_alignment: *explicit_alignment,
                });
                for m in members {
                    m.flatten_into(out);
                }
            }
            IrType::Array { element, count } => {
                out.push(TypeEntry {
                    typecode: TypeCode::Array,
                    param: *count,
                    explicit_alignment: None,
                });
                element.flatten_into(out);
            }
            IrType::Padding { bytes } => out.push(TypeEntry {
                typecode: TypeCode::Padding,
                param: u64::from(*bytes),
                explicit_alignment: None,
            }),
            IrType::Vararg => out.push(TypeEntry {
                typecode: TypeCode::Vararg,
                param: 0,
                explicit_alignment: None,
            }),
        }
    }
}

fn scalar_alignment(code: TypeCode) -> u32 {
    match code {
        TypeCode::Int8 => 1,
        TypeCode::Int16 => 2,
        TypeCode::Int32 => 4,
        TypeCode::Int64 => 8,
        other => panic!("not a bit-field container type: {:?}", other),
    }
}

/// Number of slots a flattened type occupies, i.e. `children` in
/// `spec.md` §6's `ir_type_children`.
pub fn slot_count(entries: &[TypeEntry]) -> usize {
    entries.len()
}

/// Convert a raw index in the flattened traversal into its `Slot` key.
pub fn slot_of(index: usize) -> Slot {
    Slot::new(index)
}
