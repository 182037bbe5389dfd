//! The read-only IR consumer interface (`spec.md` §6).
//!
//! This module owns none of the IR: the opcode set, the module container,
//! and the instruction blocks are an external collaborator's concern
//! (`spec.md` §1). What lives here is the *shape* of that collaborator as
//! this crate needs to see it — a small set of traits plus the flat,
//! slot-indexed type representation described in `spec.md` §3 — so the
//! rest of the crate can be written and tested against a plain in-memory
//! implementation (see `tests/`) without linking a real front end.

mod types;

pub use types::{IrType, TypeCode, TypeEntry};

use crate::entity::{FunctionId, StringId};

/// A function declaration as the ABI core needs to see it: just enough to
/// classify and allocate its signature. The IR's actual instruction
/// stream is reached through `IrFunction`.
#[derive(Debug, Clone)]
pub struct FunctionSignature {
    pub name: String,
    pub parameters: Vec<IrType>,
    pub return_type: IrType,
    pub is_variadic: bool,
    pub returns_twice: bool,
}

/// The scope an identifier was declared with, per `spec.md` §6
/// (`ir_module_get_identifier`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierScope {
    Local,
    Import,
    Export,
}

/// Resolved identifier information for a symbol reference.
#[derive(Debug, Clone)]
pub struct Identifier {
    pub scope: IdentifierScope,
    pub symbol_name: String,
    pub alias: Option<String>,
}

/// Kind of a string literal, affecting its element width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringLiteralKind {
    Multibyte,
    Utf16,
    Utf32,
}

/// A string literal entry, as enumerated by
/// `ir_module_iter_string_literals`.
#[derive(Debug, Clone)]
pub struct StringLiteral {
    pub id: StringId,
    pub kind: StringLiteralKind,
    pub public: bool,
    pub bytes: Vec<u8>,
    pub length: usize,
}

/// A global variable declaration, driving `staticdata` (C7).
#[derive(Debug, Clone)]
pub struct GlobalVariable {
    pub name: String,
    pub ty: IrType,
    pub is_thread_local: bool,
    pub initializer: Option<StaticInitializer>,
}

/// A (possibly nested) static initializer value for a global, dispatched
/// on the leaf type of each field per `spec.md` §4.7.
#[derive(Debug, Clone)]
pub enum StaticInitializer {
    Integer(i64),
    Float32(f32),
    Float64(f64),
    /// Low 64 bits, then the 16-bit extended exponent/sign; the remaining
    /// bytes up to 16 are zero-padded by the serializer.
    LongDouble { low64: u64, high16: u16 },
    /// A pointer to another symbol, with a byte offset.
    PointerTo { symbol: String, offset: i64 },
    /// A pointer to a string literal.
    StringRef(StringId),
    Aggregate(Vec<StaticInitializer>),
    /// An array given by one value and a repeat count, so the serializer
    /// can emit `.fill` instead of repeating the initializer textually.
    Repeated {
        value: Box<StaticInitializer>,
        count: u64,
    },
    Uninitialized,
}

/// Consumer-facing view of a module's type table and slot layout
/// (`ir_type_entry`, `ir_type_slot_of`, `ir_type_children`,
/// `ir_module_get_named_type`).
pub trait IrTypeSystem {
    /// Look up a named type by id.
    fn named_type(&self, id: crate::entity::TypeId) -> Option<&IrType>;
}

/// One instruction in a function body, as far as the ABI core needs to
/// see it: only call sites and `returns_twice`-marked calls affect
/// codegen decisions here: everything else is opaque and simply forwarded
/// to the assembler sink by the (out of scope) per-instruction emitter.
#[derive(Debug, Clone)]
pub enum Instruction {
    Call {
        callee: CallTarget,
        is_tail_position: bool,
    },
    Other,
}

/// The callee of a call instruction.
#[derive(Debug, Clone)]
pub enum CallTarget {
    Direct(FunctionId),
    Indirect,
}

/// A function body: an ordered instruction stream, consulted by the Call
/// Materializer (C6) and the Frame Planner (C4, for outgoing-argument
/// sizing).
pub trait IrFunction {
    fn signature(&self) -> &FunctionSignature;
    fn locals_type(&self) -> &IrType;
    fn instruction_count(&self) -> usize;
    fn instruction(&self, index: usize) -> &Instruction;
}

/// The whole translation unit, iterated by the Module Orchestrator (C8).
pub trait IrModule: IrTypeSystem {
    fn functions(&self) -> Vec<FunctionId>;
    fn declaration(&self, id: FunctionId) -> &FunctionSignature;
    fn function_body(&self, id: FunctionId) -> Option<&dyn IrFunction>;
    fn identifier(&self, symbol: &str) -> Option<Identifier>;
    fn string_literals(&self) -> &[StringLiteral];
    fn globals(&self) -> &[GlobalVariable];
}
