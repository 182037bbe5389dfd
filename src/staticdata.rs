//! Static Data Serializer (C7): emit section directives for global
//! variables, honoring alignment, interior padding, and relocations
//! (`spec.md` §4.7).

use crate::error::{AbiError, AbiResult};
use crate::ir::{GlobalVariable, IrType, StaticInitializer, StringLiteral, StringLiteralKind, StringId};
use crate::isa::TargetConfig;
use crate::layout::TypeLayoutTable;
use crate::sink::{AssemblerSink, DataWidth, Operand};

/// Layout of an emulated-TLS variable's control structure, per
/// `examples/original_source/headers/kefir/codegen/amd64/tls.h`:
/// `{ size, align, offset (always 0 pre-link), &template }`.
const EMUTLS_CONTROL_STRUCT_SIZE: u64 = 32;

fn symbol_string_literal(id: StringId) -> String {
    format!("__kefir_string_literal_{}", id.as_u32())
}

fn symbol_emutls_var(name: &str) -> String {
    format!("__emutls_v.{}", name)
}

fn symbol_emutls_template(name: &str) -> String {
    format!("__emutls_t.{}", name)
}

/// Emit one global variable's section placement and initializer, per
/// `spec.md` §4.7–§4.8. `locals_layout` (despite the name — this crate's
/// `layout::compute` is type-generic) is the variable's own type layout,
/// computed by the caller once per global so repeated fields don't re-run
/// the layout pass.
pub fn emit_global(
    sink: &mut dyn AssemblerSink,
    global: &GlobalVariable,
    layout: &TypeLayoutTable,
    identifier_scope_is_export: bool,
    config: &TargetConfig,
) -> AbiResult<()> {
    if global.is_thread_local {
        return emit_thread_local(sink, global, layout, identifier_scope_is_export, config);
    }

    match &global.initializer {
        None | Some(StaticInitializer::Uninitialized) => {
            sink.section(".bss");
            if identifier_scope_is_export {
                sink.global(&global.name);
            }
            sink.align_zero(layout.root().alignment);
            sink.label(&global.name);
            sink.uninitdata(layout.root().size);
            Ok(())
        }
        Some(init) => {
            sink.section(".data");
            if identifier_scope_is_export {
                sink.global(&global.name);
            }
            sink.align(layout.root().alignment);
            sink.label(&global.name);
            let mut cursor = 0usize;
            let emitted = emit_initializer(sink, init, layout, &mut cursor)?;
            check_emitted(&global.name, layout.root().size, emitted)
        }
    }
}

fn emit_thread_local(
    sink: &mut dyn AssemblerSink,
    global: &GlobalVariable,
    layout: &TypeLayoutTable,
    identifier_scope_is_export: bool,
    config: &TargetConfig,
) -> AbiResult<()> {
    if !config.emulated_tls {
        let initialized = !matches!(global.initializer, None | Some(StaticInitializer::Uninitialized));
        sink.section(if initialized { ".tdata" } else { ".tbss" });
        if identifier_scope_is_export {
            sink.global(&global.name);
        }
        sink.align_zero(layout.root().alignment);
        sink.label(&global.name);
        match &global.initializer {
            None | Some(StaticInitializer::Uninitialized) => {
                sink.uninitdata(layout.root().size);
                Ok(())
            }
            Some(init) => {
                let mut cursor = 0usize;
                let emitted = emit_initializer(sink, init, layout, &mut cursor)?;
                check_emitted(&global.name, layout.root().size, emitted)
            }
        }
    } else {
        emit_emulated_tls(sink, global, layout, identifier_scope_is_export)
    }
}

/// Emit the emulated-TLS fallback: a `__emutls_v.<name>` control block in
/// `.data` carrying `{size, align, 0, &template}`, plus the variable's
/// template (its initial value, or a null template for zero-initialized
/// storage) in `.rodata` labeled `__emutls_t.<name>`, per
/// `original_source/headers/kefir/codegen/amd64/tls.h`.
pub fn emit_emulated_tls(
    sink: &mut dyn AssemblerSink,
    global: &GlobalVariable,
    layout: &TypeLayoutTable,
    identifier_scope_is_export: bool,
) -> AbiResult<()> {
    let var_symbol = symbol_emutls_var(&global.name);
    let template_symbol = symbol_emutls_template(&global.name);
    let has_initializer = !matches!(global.initializer, None | Some(StaticInitializer::Uninitialized));

    sink.section(".data");
    if identifier_scope_is_export {
        sink.global(&var_symbol);
    }
    sink.align(8);
    sink.label(&var_symbol);
    sink.data(DataWidth::Quad, &[Operand::Immediate(layout.root().size as i64)]);
    sink.data(DataWidth::Quad, &[Operand::Immediate(i64::from(layout.root().alignment))]);
    sink.data(DataWidth::Quad, &[Operand::Immediate(0)]);
    if has_initializer {
        sink.data(
            DataWidth::Quad,
            &[Operand::Symbol {
                name: template_symbol.clone(),
                plt: false,
            }],
        );
    } else {
        sink.data(DataWidth::Quad, &[Operand::Immediate(0)]);
    }
    debug_assert_eq!(EMUTLS_CONTROL_STRUCT_SIZE, 32);

    if has_initializer {
        sink.section(".rodata");
        sink.align(layout.root().alignment);
        sink.label(&template_symbol);
        let mut cursor = 0usize;
        let emitted = emit_initializer(sink, global.initializer.as_ref().unwrap(), layout, &mut cursor)?;
        check_emitted(&template_symbol, layout.root().size, emitted)?;
    }
    Ok(())
}

fn check_emitted(symbol: &str, expected: u64, emitted: u64) -> AbiResult<()> {
    if expected != emitted {
        return Err(AbiError::data_layout_mismatch(symbol, expected, emitted));
    }
    Ok(())
}

/// Recursively emit `init`, dispatching on the layout entry at `cursor`
/// (consumed from `layout`'s flattened traversal the same way `classify`
/// walks it), returning the number of bytes actually written.
fn emit_initializer(
    sink: &mut dyn AssemblerSink,
    init: &StaticInitializer,
    layout: &TypeLayoutTable,
    cursor: &mut usize,
) -> AbiResult<u64> {
    use crate::entity::Slot;
    let slot = Slot::new(*cursor);
    let type_entry = *layout.type_entry(slot);
    let layout_entry = *layout.entry(slot);

    match init {
        StaticInitializer::Aggregate(members) => {
            *cursor += 1;
            let mut offset = 0u64;
            for member in members {
                let member_slot = Slot::new(*cursor);
                let member_layout = *layout.entry(member_slot);
                if member_layout.relative_offset > offset {
                    sink.zerodata(member_layout.relative_offset - offset);
                    offset = member_layout.relative_offset;
                }
                offset += emit_initializer(sink, member, layout, cursor)?;
            }
            if layout_entry.size > offset {
                sink.zerodata(layout_entry.size - offset);
                offset = layout_entry.size;
            }
            Ok(offset)
        }
        StaticInitializer::Repeated { value, count } => {
            // `init` corresponds to the array's own opener slot; only one
            // child (element) slot follows it in the flattened traversal
            // (`spec.md` §3: "a single child repeated N times"), so every
            // repeat after the first replays that same slot rather than
            // advancing past slots that were never materialized.
            *cursor += 1;
            let element_start = *cursor;
            let mut final_cursor = element_start;
            let first_bytes = emit_initializer(sink, value, layout, &mut final_cursor)?;
            for _ in 1..*count {
                let mut replay_cursor = element_start;
                emit_initializer(sink, value, layout, &mut replay_cursor)?;
            }
            *cursor = final_cursor;
            Ok(first_bytes * count)
        }
        StaticInitializer::Integer(value) => {
            *cursor += 1;
            emit_integer(sink, type_entry.param, layout_entry.size, *value)
        }
        StaticInitializer::Float32(value) => {
            *cursor += 1;
            sink.data(DataWidth::Double, &[Operand::Immediate(i64::from(value.to_bits()))]);
            Ok(4)
        }
        StaticInitializer::Float64(value) => {
            *cursor += 1;
            sink.data(DataWidth::Quad, &[Operand::Immediate(value.to_bits() as i64)]);
            Ok(8)
        }
        StaticInitializer::LongDouble { low64, high16 } => {
            *cursor += 1;
            sink.data(DataWidth::Quad, &[Operand::Immediate(*low64 as i64)]);
            sink.data(DataWidth::Quad, &[Operand::Immediate(i64::from(*high16))]);
            Ok(16)
        }
        StaticInitializer::PointerTo { symbol, offset } => {
            *cursor += 1;
            sink.data(
                DataWidth::Quad,
                &[Operand::Symbol {
                    name: if *offset == 0 {
                        symbol.clone()
                    } else {
                        format!("{} + {}", symbol, offset)
                    },
                    plt: false,
                }],
            );
            Ok(8)
        }
        StaticInitializer::StringRef(id) => {
            *cursor += 1;
            sink.data(
                DataWidth::Quad,
                &[Operand::Symbol {
                    name: symbol_string_literal(*id),
                    plt: false,
                }],
            );
            Ok(8)
        }
        StaticInitializer::Uninitialized => {
            *cursor += 1;
            sink.zerodata(layout_entry.size);
            Ok(layout_entry.size)
        }
    }
}

fn emit_integer(sink: &mut dyn AssemblerSink, _param: u64, size: u64, value: i64) -> AbiResult<u64> {
    match size {
        1 => sink.data(DataWidth::Byte, &[Operand::Immediate(value & 0xff)]),
        2 => sink.data(DataWidth::Word, &[Operand::Immediate(value & 0xffff)]),
        4 => sink.data(DataWidth::Double, &[Operand::Immediate(value & 0xffff_ffff)]),
        8 => sink.data(DataWidth::Quad, &[Operand::Immediate(value)]),
        other => return Err(AbiError::invalid_type(format!("unsupported integer initializer width {}", other))),
    }
    Ok(size)
}

/// Emit every string literal in a module's table, per `spec.md` §4.8 step
/// 6: into `.rodata`, labeled with the bit-exact `__kefir_string_literal_N`
/// symbol of `spec.md` §6, with the element width implied by its kind.
pub fn emit_string_literals(sink: &mut dyn AssemblerSink, literals: &[StringLiteral]) {
    for literal in literals {
        sink.section(".rodata");
        if literal.public {
            sink.global(&symbol_string_literal(literal.id));
        }
        let align = match literal.kind {
            StringLiteralKind::Multibyte => 1,
            StringLiteralKind::Utf16 => 2,
            StringLiteralKind::Utf32 => 4,
        };
        sink.align(align);
        sink.label(&symbol_string_literal(literal.id));
        sink.bindata(&literal.bytes);
    }
}

/// Compute the `TypeLayoutTable` for a global's declared type; a thin
/// wrapper kept here so callers (the module orchestrator) don't need to
/// import `layout` directly just to serialize globals.
pub fn layout_of(ty: &IrType, config: &TargetConfig) -> AbiResult<TypeLayoutTable> {
    crate::layout::compute(ty, config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::StringId;
    use crate::ir::TypeCode;
    use crate::sink::TextSink;

    #[test]
    fn scenario_6_struct_initializer_pads_the_hole() {
        // struct S { int a; double b; } s = { 0x11223344, 3.14 };
        let ty = IrType::Struct {
            members: vec![IrType::int(32), IrType::Scalar(TypeCode::Float64)],
            explicit_alignment: None,
        };
        let config = TargetConfig::default();
        let layout = layout_of(&ty, &config).unwrap();
        let global = GlobalVariable {
            name: "s".to_string(),
            ty,
            is_thread_local: false,
            initializer: Some(StaticInitializer::Aggregate(vec![
                StaticInitializer::Integer(0x11223344),
                StaticInitializer::Float64(3.14),
            ])),
        };
        let mut sink = TextSink::new();
        emit_global(&mut sink, &global, &layout, false, &config).unwrap();
        assert!(sink.lines.contains(&"align 8".to_string()));
        assert!(sink.lines.contains(&"s:".to_string()));
        assert!(sink.lines.contains(&".long 287454020".to_string()));
        assert!(sink.lines.contains(&".zero 4".to_string()));
        assert!(sink.lines.iter().any(|l| l.starts_with(".quad 4614253070214989087")));
    }

    #[test]
    fn uninitialized_global_goes_to_bss() {
        let ty = IrType::int(32);
        let config = TargetConfig::default();
        let layout = layout_of(&ty, &config).unwrap();
        let global = GlobalVariable {
            name: "counter".to_string(),
            ty,
            is_thread_local: false,
            initializer: None,
        };
        let mut sink = TextSink::new();
        emit_global(&mut sink, &global, &layout, true, &config).unwrap();
        assert_eq!(sink.lines[0], "section .bss");
        assert!(sink.lines.contains(&"global counter".to_string()));
        assert!(sink.lines.contains(&".zero 4".to_string()));
    }

    #[test]
    fn string_literal_label_is_bit_exact() {
        let literal = StringLiteral {
            id: StringId::new(7),
            kind: StringLiteralKind::Multibyte,
            public: false,
            bytes: b"hi\0".to_vec(),
            length: 3,
        };
        let mut sink = TextSink::new();
        emit_string_literals(&mut sink, std::slice::from_ref(&literal));
        assert!(sink.lines.contains(&"__kefir_string_literal_7:".to_string()));
    }

    #[test]
    fn pointer_initializer_emits_symbol_relocation() {
        let ty = IrType::pointer();
        let config = TargetConfig::default();
        let layout = layout_of(&ty, &config).unwrap();
        let global = GlobalVariable {
            name: "p".to_string(),
            ty,
            is_thread_local: false,
            initializer: Some(StaticInitializer::PointerTo {
                symbol: "target".to_string(),
                offset: 0,
            }),
        };
        let mut sink = TextSink::new();
        emit_global(&mut sink, &global, &layout, false, &config).unwrap();
        assert!(sink.lines.contains(&".quad target".to_string()));
    }

    #[test]
    fn repeated_array_initializer_replicates_element_and_matches_size() {
        // int zeros[4] = { 0, 0, 0, 0 };
        let ty = IrType::Array {
            element: Box::new(IrType::int(32)),
            count: 4,
        };
        let config = TargetConfig::default();
        let layout = layout_of(&ty, &config).unwrap();
        let global = GlobalVariable {
            name: "zeros".to_string(),
            ty,
            is_thread_local: false,
            initializer: Some(StaticInitializer::Repeated {
                value: Box::new(StaticInitializer::Integer(0)),
                count: 4,
            }),
        };
        let mut sink = TextSink::new();
        emit_global(&mut sink, &global, &layout, false, &config).unwrap();
        let long_count = sink.lines.iter().filter(|l| l.starts_with(".long")).count();
        assert_eq!(long_count, 4);
    }

    #[test]
    fn layout_mismatch_is_reported() {
        // A 4-byte slot given an 8-byte initializer must surface
        // `DataLayoutMismatch` rather than silently over-emit.
        let ty = IrType::int(32);
        let config = TargetConfig::default();
        let layout = layout_of(&ty, &config).unwrap();
        let global = GlobalVariable {
            name: "bad".to_string(),
            ty,
            is_thread_local: false,
            initializer: Some(StaticInitializer::Float64(3.14)),
        };
        let result = emit_global(&mut TextSink::new(), &global, &layout, false, &config);
        assert!(matches!(result, Err(AbiError::DataLayoutMismatch { .. })));
    }
}
