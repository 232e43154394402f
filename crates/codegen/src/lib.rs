//! Code generation for the Covenant contract language.
//!
//! This crate lowers fully resolved, type-checked contract ASTs
//! ([`covenant_ast`]) to EVM bytecode via evm-glue assembly. Compiling a
//! contract yields two images:
//!
//! - the *creation* image, executed once at deployment: it runs the base
//!   constructors in base-to-derived order, then the contract's own
//!   constructor, and returns the runtime image as its output;
//! - the *runtime* image installed on-chain: a 4-byte signature-hash
//!   dispatcher in front of every function body in the contract's
//!   linearization.
//!
//! Design approach:
//! - Stack-resident locals: parameters arrive on the stack, return values
//!   and locals get zero-initialized slots, and a compile-time stack model
//!   supplies every `DUP`/`SWAP` distance.
//! - Absolute jump marks for all control flow and calls; the runtime image
//!   is attached to the creation image as a separately assembled
//!   sub-assembly and copied out with `CODECOPY`.

mod call_graph;
mod compiler;
mod context;
mod conversion;
mod error;
mod utils;

pub use crate::{
    call_graph::CallGraph,
    compiler::{compile_contract, Compiler},
    context::{CompilerContext, MarkId, SubAssemblyId},
    conversion::append_type_conversion,
    error::{CompilerError, Result},
    utils::{padded_size, size_on_stack, CompilerUtils},
};

#[cfg(test)]
mod tests;
