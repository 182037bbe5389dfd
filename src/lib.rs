//! AMD64 System V ABI code generation core.
//!
//! This crate is the ABI-conformant half of a C compiler backend: given a
//! read-only view of an IR module (`ir`), it classifies types, lays out
//! aggregates, allocates parameters and return values to registers or
//! memory, plans stack frames, and emits prologues, epilogues, call
//! sequences, static data, and inline-assembly substitutions as calls
//! against a write-only assembler sink (`sink`). It does not parse,
//! optimize, or assemble anything itself — see the module docs below for
//! where each of those concerns is expected to live instead.
//!
//! The crate is a pure function of `(module, TargetConfig)`: it holds no
//! global state, and a single `Module` context can be dropped and rebuilt
//! per translation unit without consulting any other instance.
//!
//! Component-to-module map (see `SPEC_FULL.md` §2 for the full table):
//!
//! | Component | Module |
//! |---|---|
//! | Type Layout | [`layout`] |
//! | Eightbyte Classifier | [`classify`] |
//! | Parameter Allocator | [`abi::params`] |
//! | Frame Planner | [`abi::frame`] |
//! | Prologue/Epilogue Emitter | [`codegen::prologue`], [`codegen::epilogue`] |
//! | Call Materializer | [`codegen::call`] |
//! | Static Data Serializer | [`staticdata`] |
//! | Module Orchestrator | [`module`] |
//! | Inline-Asm Formatter | [`inline_asm`] |

pub mod abi;
pub mod classify;
pub mod codegen;
pub mod entity;
pub mod error;
pub mod inline_asm;
pub mod ir;
pub mod isa;
pub mod layout;
pub mod module;
pub mod sink;
pub mod staticdata;

pub use error::{AbiError, AbiResult};
pub use isa::TargetConfig;
