//! Contract compiler driver.
//!
//! [`Compiler::compile_contract`] produces two bytecode images from one
//! contract: the runtime image installed on-chain, and the creation image
//! that runs the constructor chain at deployment and returns the runtime
//! image as its output.
//!
//! The driver owns a pair of contexts. The runtime image is emitted first
//! into the current context (selector dispatch, then every function body in
//! the linearization). The contexts are then swapped once, and the creation
//! image is emitted into the fresh context with the finished runtime
//! attached as a sub-assembly.

mod creation;
mod expression;
mod selector;
mod statements;

pub(crate) use expression::ExpressionCompiler;

use crate::context::{CompilerContext, MarkId};
use crate::error::Result;
use covenant_ast::{Ast, ContractId, VariableId};
use std::collections::HashMap;
use std::fmt;
use std::mem;

/// Compiles a single contract. Not reusable: one instance per
/// `compile_contract` call.
pub struct Compiler<'ast> {
    ast: &'ast Ast,
    optimize: bool,

    /// The context being filled; creation context once the runtime is done.
    context: CompilerContext,
    runtime_context: CompilerContext,

    // per-function lowering state
    return_mark: MarkId,
    return_parameters: Vec<VariableId>,
    break_marks: Vec<MarkId>,
    continue_marks: Vec<MarkId>,
}

impl<'ast> Compiler<'ast> {
    pub fn new(ast: &'ast Ast, optimize: bool) -> Self {
        Self {
            ast,
            optimize,
            context: CompilerContext::new(),
            runtime_context: CompilerContext::new(),
            return_mark: 0,
            return_parameters: Vec::new(),
            break_marks: Vec::new(),
            continue_marks: Vec::new(),
        }
    }

    /// Compile `contract` into creation and runtime bytecode.
    ///
    /// `compiled_contracts` maps every contract this one instantiates with
    /// `new` to its already-compiled creation bytecode.
    pub fn compile_contract(
        &mut self,
        contract: ContractId,
        compiled_contracts: &HashMap<ContractId, Vec<u8>>,
    ) -> Result<()> {
        let ast = self.ast;
        self.context = CompilerContext::new();
        self.runtime_context = CompilerContext::new();
        self.initialize_context(contract, compiled_contracts);

        // Entry marks are allocated for every function up front so forward
        // jumps resolve.
        let linearization = &ast.contract(contract).linearization;
        for &c in linearization {
            for &f in &ast.contract(c).functions {
                if !ast.function(f).is_constructor {
                    self.context.add_function(f);
                }
            }
        }

        self.append_function_selector(contract)?;
        for &c in linearization {
            for &f in &ast.contract(c).functions {
                if !ast.function(f).is_constructor {
                    self.compile_function(f)?;
                }
            }
        }

        // Swap the runtime context with the creation-time context.
        mem::swap(&mut self.context, &mut self.runtime_context);
        self.initialize_context(contract, compiled_contracts);
        self.pack_into_contract_creator(contract)?;
        Ok(())
    }

    fn initialize_context(
        &mut self,
        contract: ContractId,
        compiled_contracts: &HashMap<ContractId, Vec<u8>>,
    ) {
        self.context.set_compiled_contracts(compiled_contracts.clone());
        self.context.set_inheritance_hierarchy(self.ast.contract(contract).linearization.clone());
        self.register_state_variables(contract);
    }

    /// Storage slots are handed out base-to-derived, so inherited state
    /// comes first.
    fn register_state_variables(&mut self, contract: ContractId) {
        let ast = self.ast;
        for &c in ast.contract(contract).linearization.iter().rev() {
            for &var in &ast.contract(c).state_variables {
                self.context.add_state_variable(var);
            }
        }
    }

    /// The creation image.
    pub fn assembled_bytecode(&self) -> Result<Vec<u8>> {
        self.context.assembled_bytecode(self.optimize)
    }

    /// The installed image.
    pub fn runtime_bytecode(&self) -> Result<Vec<u8>> {
        self.runtime_context.assembled_bytecode(self.optimize)
    }

    /// Human-readable listing of the creation assembly.
    pub fn write_assembly(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        self.context.write_assembly(out)
    }
}

/// Compile `contract`, returning `(creation, runtime)` bytecode.
pub fn compile_contract(
    ast: &Ast,
    contract: ContractId,
    compiled_contracts: &HashMap<ContractId, Vec<u8>>,
    optimize: bool,
) -> Result<(Vec<u8>, Vec<u8>)> {
    let mut compiler = Compiler::new(ast, optimize);
    compiler.compile_contract(contract, compiled_contracts)?;
    Ok((compiler.assembled_bytecode()?, compiler.runtime_bytecode()?))
}
