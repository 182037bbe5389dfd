//! Type Layout (C1): size, alignment, and field offsets for every IR type
//! entry (`spec.md` §4.1).

use crate::entity::{SecondaryMap, Slot};
use crate::error::{AbiError, AbiResult};
use crate::ir::{IrType, TypeCode, TypeEntry};
use crate::isa::TargetConfig;

/// Per-slot layout as described by the data model: byte size, alignment,
/// the field's offset relative to its enclosing container, and whether
/// natural alignment is honored.
///
/// `absolute_offset` additionally carries the offset from the *root*
/// type's start, since that is what the Eightbyte Classifier (C2) needs
/// to partition the whole type into 8-byte qwords — `relative_offset`
/// alone only tells you where a field sits within its immediate parent.
#[derive(Debug, Clone, Copy, Default)]
#[cfg_attr(feature = "enable-serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LayoutEntry {
    pub size: u64,
    pub alignment: u32,
    pub relative_offset: u64,
    pub absolute_offset: u64,
    pub aligned: bool,
    pub bit_field: Option<BitFieldLayout>,
}

/// Placement of a single bit-field within its underlying storage unit.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "enable-serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BitFieldLayout {
    /// Byte offset of the storage unit, relative to the same container
    /// `relative_offset` is measured from.
    pub unit_byte_offset: u64,
    /// Offset of the storage unit from the root type's start.
    pub unit_absolute_offset: u64,
    pub unit_size: u32,
    pub bit_offset: u32,
    pub bit_width: u32,
}

/// The result of laying out a whole type: one `LayoutEntry` per slot.
#[derive(Debug, Clone)]
pub struct TypeLayoutTable {
    entries: Vec<TypeEntry>,
    layouts: SecondaryMap<Slot, LayoutEntry>,
}

impl TypeLayoutTable {
    /// The layout of the whole (root) type: slot 0's entry.
    pub fn root(&self) -> &LayoutEntry {
        &self.layouts[Slot::new(0)]
    }

    pub fn entry(&self, slot: Slot) -> &LayoutEntry {
        &self.layouts[slot]
    }

    pub fn type_entry(&self, slot: Slot) -> &TypeEntry {
        &self.entries[slot.index()]
    }

    pub fn slot_count(&self) -> usize {
        self.entries.len()
    }
}

/// Compute the `TypeLayoutTable` of `ty`.
///
/// Per `spec.md` §9's design note, the `disable_long_double` switch is
/// consulted exactly once here, at table-construction time, rather than
/// at every place `long double` could appear.
pub fn compute(ty: &IrType, config: &TargetConfig) -> AbiResult<TypeLayoutTable> {
    let entries = ty.flatten();
    let mut layouts = SecondaryMap::new();
    let mut cursor = 0usize;
    let mut visiting = Vec::new();
    layout_slot(&entries, &mut cursor, 0, config, &mut layouts, &mut visiting)?;
    if cursor != entries.len() {
        return Err(AbiError::invalid_type(format!(
            "type traversal consumed {} of {} slots",
            cursor,
            entries.len()
        )));
    }
    Ok(TypeLayoutTable { entries, layouts })
}

fn scalar_layout(code: TypeCode, config: &TargetConfig) -> (u64, u32) {
    match code {
        TypeCode::Bool => (1, 1),
        TypeCode::Int8 => (1, 1),
        TypeCode::Int16 => (2, 2),
        TypeCode::Int32 => (4, 4),
        TypeCode::Int64 => (8, 8),
        TypeCode::Float32 => (4, 4),
        TypeCode::Float64 => (8, 8),
        TypeCode::LongDouble => {
            if config.disable_long_double {
                (8, 8)
            } else {
                (16, 16)
            }
        }
        TypeCode::ComplexFloat32 => (8, 4),
        TypeCode::ComplexFloat64 => (16, 8),
        TypeCode::ComplexLongDouble => {
            if config.disable_long_double {
                (16, 8)
            } else {
                (32, 16)
            }
        }
        TypeCode::Word => (8, 8),
        TypeCode::Vararg => (0, 1),
        TypeCode::Padding | TypeCode::Bits | TypeCode::Struct | TypeCode::Union | TypeCode::Array => {
            unreachable!("not a scalar typecode: {:?}", code)
        }
    }
}

fn round_up(value: u64, align: u64) -> u64 {
    debug_assert!(align.is_power_of_two());
    (value + align - 1) & !(align - 1)
}

/// Recursive-descent layout over the flattened traversal, mirroring the
/// stack-of-enclosing-containers algorithm of `spec.md` §4.1. `cursor`
/// indexes the next unvisited slot; on return it has been advanced past
/// the whole subtree rooted at the slot it started on. `base` is the
/// absolute offset, from the root type's start, at which this slot
/// begins. `visiting` rejects a cyclic type reference with `InvalidType`
/// — this flat encoding has no back-references that could loop during a
/// well-formed traversal, so the check exists for malformed input that
/// violates the flattening contract (e.g. a `param` claiming more
/// children than remain, via a re-entrant `cursor`).
fn layout_slot(
    entries: &[TypeEntry],
    cursor: &mut usize,
    base: u64,
    config: &TargetConfig,
    layouts: &mut SecondaryMap<Slot, LayoutEntry>,
    visiting: &mut Vec<usize>,
) -> AbiResult<(u64, u32)> {
    let index = *cursor;
    if index >= entries.len() {
        return Err(AbiError::out_of_bounds(index, entries.len()));
    }
    if visiting.contains(&index) {
        return Err(AbiError::invalid_type("cyclic type reference"));
    }
    visiting.push(index);
    let entry = entries[index];
    let slot = Slot::new(index);
    *cursor += 1;

    let result = match entry.typecode {
        TypeCode::Struct => {
            layout_struct(entries, cursor, base, config, layouts, visiting, entry.param as usize)
        }
        TypeCode::Union => {
            layout_union(entries, cursor, base, config, layouts, visiting, entry.param as usize)
        }
        TypeCode::Array => layout_array(entries, cursor, base, config, layouts, visiting, entry.param),
        TypeCode::Padding => Ok((u64::from(entry.param), 1u32)),
        TypeCode::Vararg => Ok((0, 1)),
        TypeCode::Bits => {
            // A bare bit-field slot visited outside `layout_struct` (e.g.
            // the whole type is just one bit-field): give it the layout
            // of its underlying container, occupying the low bits.
            let container_align = entry.explicit_alignment.unwrap_or(1);
            let container_size = u64::from(container_align);
            layouts.set(
                slot,
                LayoutEntry {
                    size: container_size,
                    alignment: container_align,
                    relative_offset: 0,
                    absolute_offset: base,
                    aligned: true,
                    bit_field: Some(BitFieldLayout {
                        unit_byte_offset: 0,
                        unit_absolute_offset: base,
                        unit_size: container_align,
                        bit_offset: 0,
                        bit_width: entry.param as u32,
                    }),
                },
            );
            visiting.pop();
            return Ok((container_size, container_align));
        }
        other => Ok(scalar_layout(other, config)),
    }?;

    let (size, alignment) = result;
    layouts.set(
        slot,
        LayoutEntry {
            size,
            alignment,
            relative_offset: 0,
            absolute_offset: base,
            aligned: true,
            bit_field: None,
        },
    );
    visiting.pop();
    Ok((size, alignment))
}

fn layout_struct(
    entries: &[TypeEntry],
    cursor: &mut usize,
    base: u64,
    config: &TargetConfig,
    layouts: &mut SecondaryMap<Slot, LayoutEntry>,
    visiting: &mut Vec<usize>,
    member_count: usize,
) -> AbiResult<(u64, u32)> {
    let mut offset: u64 = 0;
    let mut struct_align: u32 = 1;

    // Bit-field packing state: `Some((unit_start, bits_used, unit_size))`
    // while a storage unit is open.
    let mut open_unit: Option<(u64, u32, u32)> = None;

    for _ in 0..member_count {
        let member_index = *cursor;
        let member_entry = entries
            .get(member_index)
            .copied()
            .ok_or_else(|| AbiError::out_of_bounds(member_index, entries.len()))?;

        if member_entry.typecode == TypeCode::Bits {
            let container_align = member_entry
                .explicit_alignment
                .ok_or_else(|| AbiError::invalid_type("bit-field missing container alignment"))?;
            let unit_size_bits = container_align * 8;
            let width = member_entry.param as u32;
            let slot = Slot::new(member_index);
            *cursor += 1;

            if width == 0 {
                // Zero-width: force the next field to a new unit boundary.
                if let Some((unit_start, _, unit_size)) = open_unit.take() {
                    offset = unit_start + u64::from(unit_size);
                }
                layouts.set(
                    slot,
                    LayoutEntry {
                        size: 0,
                        alignment: container_align,
                        relative_offset: offset,
                        absolute_offset: base + offset,
                        aligned: true,
                        bit_field: Some(BitFieldLayout {
                            unit_byte_offset: offset,
                            unit_absolute_offset: base + offset,
                            unit_size: container_align,
                            bit_offset: 0,
                            bit_width: 0,
                        }),
                    },
                );
                struct_align = struct_align.max(container_align);
                continue;
            }

            let (unit_start, bits_used) = match open_unit {
                Some((start, used, unit_size)) if used + width <= unit_size => (start, used),
                _ => {
                    if let Some((start, _, unit_size)) = open_unit {
                        offset = start + u64::from(unit_size);
                    }
                    let start = round_up(offset, u64::from(container_align));
                    (start, 0)
                }
            };

            layouts.set(
                slot,
                LayoutEntry {
                    size: u64::from(container_align),
                    alignment: container_align,
                    relative_offset: unit_start,
                    absolute_offset: base + unit_start,
                    aligned: true,
                    bit_field: Some(BitFieldLayout {
                        unit_byte_offset: unit_start,
                        unit_absolute_offset: base + unit_start,
                        unit_size: container_align,
                        bit_offset: bits_used,
                        bit_width: width,
                    }),
                },
            );
            open_unit = Some((unit_start, bits_used + width, unit_size_bits));
            struct_align = struct_align.max(container_align);
            continue;
        }

        // A non-bit-field member closes any open storage unit.
        if let Some((unit_start, _, unit_size)) = open_unit.take() {
            offset = unit_start + u64::from(unit_size);
        }

        // Lay the member out at offset 0 first to learn its size/align,
        // then patch in its real offset — `layout_slot` needs a `base` up
        // front for *its own* children, so we round up first and pass the
        // final base directly instead of laying out twice.
        let member_align_probe = member_entry.explicit_alignment;
        let prelim_align = member_align_probe.unwrap_or(1);
        let field_offset_guess = round_up(offset, u64::from(prelim_align));
        let (member_size, member_align) = layout_slot(
            entries,
            cursor,
            base + field_offset_guess,
            config,
            layouts,
            visiting,
        )?;
        // The probed alignment may have been coarser than the member's
        // real (computed) alignment for aggregates; re-round with the
        // authoritative value and, in the rare case it changes the
        // offset, shift the subtree's absolute offsets to match.
        let field_offset = round_up(offset, u64::from(member_align));
        if field_offset != field_offset_guess {
            shift_subtree(layouts, Slot::new(member_index), field_offset as i64 - field_offset_guess as i64);
        }
        let mut e = layouts[Slot::new(member_index)];
        e.relative_offset = field_offset;
        e.absolute_offset = base + field_offset;
        layouts.set(Slot::new(member_index), e);
        offset = field_offset + member_size;
        struct_align = struct_align.max(member_align);
    }

    if let Some((unit_start, _, unit_size)) = open_unit.take() {
        offset = offset.max(unit_start + u64::from(unit_size));
    }

    let size = round_up(offset, u64::from(struct_align));
    Ok((size, struct_align))
}

/// Re-base every slot in the subtree rooted at `root` (inclusive) by
/// `delta` bytes. Used only on the rare path where a struct field's
/// alignment could not be known before its subtree was laid out (see
/// `layout_struct`); for scalars and already-aligned aggregates `delta`
/// is always zero and this is a no-op.
fn shift_subtree(layouts: &mut SecondaryMap<Slot, LayoutEntry>, root: Slot, delta: i64) {
    if delta == 0 {
        return;
    }
    let mut e = layouts[root];
    e.absolute_offset = (e.absolute_offset as i64 + delta) as u64;
    if let Some(bf) = e.bit_field.as_mut() {
        bf.unit_absolute_offset = (bf.unit_absolute_offset as i64 + delta) as u64;
    }
    layouts.set(root, e);
}

fn layout_union(
    entries: &[TypeEntry],
    cursor: &mut usize,
    base: u64,
    config: &TargetConfig,
    layouts: &mut SecondaryMap<Slot, LayoutEntry>,
    visiting: &mut Vec<usize>,
    member_count: usize,
) -> AbiResult<(u64, u32)> {
    let mut max_size: u64 = 0;
    let mut union_align: u32 = 1;
    let mut member_slots = Vec::with_capacity(member_count);

    for _ in 0..member_count {
        let member_index = *cursor;
        member_slots.push(member_index);
        let (member_size, member_align) =
            layout_slot(entries, cursor, base, config, layouts, visiting)?;
        max_size = max_size.max(member_size);
        union_align = union_align.max(member_align);
    }

    let size = round_up(max_size, u64::from(union_align));
    for member_index in member_slots {
        let mut e = layouts[Slot::new(member_index)];
        e.relative_offset = 0;
        e.absolute_offset = base;
        layouts.set(Slot::new(member_index), e);
    }
    Ok((size, union_align))
}

fn layout_array(
    entries: &[TypeEntry],
    cursor: &mut usize,
    base: u64,
    config: &TargetConfig,
    layouts: &mut SecondaryMap<Slot, LayoutEntry>,
    visiting: &mut Vec<usize>,
    count: u64,
) -> AbiResult<(u64, u32)> {
    // Only the first element is materialized as a slot (per `spec.md`
    // §3: "a single child repeated N times"), so its absolute offset is
    // simply the array's own base.
    let (elem_size, elem_align) = layout_slot(entries, cursor, base, config, layouts, visiting)?;
    Ok((elem_size * count, elem_align))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::IrType;

    #[test]
    fn scenario_6_struct_with_hole() {
        // struct S { int a; double b; }
        let ty = IrType::Struct {
            members: vec![IrType::int(32), IrType::Scalar(TypeCode::Float64)],
            explicit_alignment: None,
        };
        let table = compute(&ty, &TargetConfig::default()).unwrap();
        assert_eq!(table.root().size, 16);
        assert_eq!(table.root().alignment, 8);
        assert_eq!(table.entry(Slot::new(1)).absolute_offset, 0);
        assert_eq!(table.entry(Slot::new(2)).absolute_offset, 8);
    }

    #[test]
    fn union_size_is_max_member() {
        let ty = IrType::Union {
            members: vec![IrType::int(32), IrType::Scalar(TypeCode::Float64)],
            explicit_alignment: None,
        };
        let table = compute(&ty, &TargetConfig::default()).unwrap();
        assert_eq!(table.root().size, 8);
        assert_eq!(table.root().alignment, 8);
        assert_eq!(table.entry(Slot::new(1)).relative_offset, 0);
        assert_eq!(table.entry(Slot::new(2)).relative_offset, 0);
    }

    #[test]
    fn array_size_is_element_times_count() {
        let ty = IrType::Array {
            element: Box::new(IrType::int(32)),
            count: 8,
        };
        let table = compute(&ty, &TargetConfig::default()).unwrap();
        assert_eq!(table.root().size, 32);
        assert_eq!(table.root().alignment, 4);
    }

    #[test]
    fn long_double_downgrades_to_8_bytes_when_disabled() {
        let ty = IrType::Scalar(TypeCode::LongDouble);
        let mut config = TargetConfig::default();
        config.disable_long_double = true;
        let table = compute(&ty, &config).unwrap();
        assert_eq!(table.root().size, 8);
        assert_eq!(table.root().alignment, 8);
    }

    #[test]
    fn nested_struct_offsets_are_absolute() {
        // struct Outer { char pad; struct Inner { int x; double y; } inner; }
        let inner = IrType::Struct {
            members: vec![IrType::int(32), IrType::Scalar(TypeCode::Float64)],
            explicit_alignment: None,
        };
        let ty = IrType::Struct {
            members: vec![IrType::Scalar(TypeCode::Int8), inner],
            explicit_alignment: None,
        };
        let table = compute(&ty, &TargetConfig::default()).unwrap();
        // slot 0 = outer struct, slot 1 = char, slot 2 = inner struct,
        // slot 3 = inner.x, slot 4 = inner.y
        assert_eq!(table.entry(Slot::new(2)).absolute_offset, 8);
        assert_eq!(table.entry(Slot::new(3)).absolute_offset, 8);
        assert_eq!(table.entry(Slot::new(4)).absolute_offset, 16);
        assert_eq!(table.root().size, 24);
    }

    #[test]
    fn bitfields_pack_into_shared_unit() {
        // struct { unsigned a : 3; unsigned b : 5; unsigned c : 30; }
        let ty = IrType::Struct {
            members: vec![
                IrType::BitField { container: TypeCode::Int32, width: 3 },
                IrType::BitField { container: TypeCode::Int32, width: 5 },
                IrType::BitField { container: TypeCode::Int32, width: 30 },
            ],
            explicit_alignment: None,
        };
        let table = compute(&ty, &TargetConfig::default()).unwrap();
        // a and b share the first unit (3 + 5 = 8 <= 32 bits); c needs a
        // fresh unit since 8 + 30 > 32.
        let a = table.entry(Slot::new(1)).bit_field.unwrap();
        let b = table.entry(Slot::new(2)).bit_field.unwrap();
        let c = table.entry(Slot::new(3)).bit_field.unwrap();
        assert_eq!(a.unit_byte_offset, 0);
        assert_eq!(b.unit_byte_offset, 0);
        assert_eq!(b.bit_offset, 3);
        assert_eq!(c.unit_byte_offset, 4);
        assert_eq!(c.bit_offset, 0);
        assert_eq!(table.root().size, 8);
    }
}
