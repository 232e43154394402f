//! Creation-image emission: constructor chain and deploy tail.

use super::{Compiler, ExpressionCompiler};
use crate::call_graph::CallGraph;
use crate::conversion::append_type_conversion;
use crate::error::Result;
use crate::utils::{padded_size, size_on_stack};
use alloy_primitives::U256;
use covenant_ast::{ContractId, ExpressionId, FunctionId, SELECTOR_SIZE};
use evm_glue::opcodes::Opcode;
use std::collections::HashMap;

impl Compiler<'_> {
    /// Fill the creation context: run every base constructor deepest-first,
    /// then the contract's own constructor, then copy the attached runtime
    /// image to memory and return it.
    ///
    /// Only functions transitively referenced from constructors are carried
    /// into the creation image. Jump targets are absolute, so those bodies
    /// must live in this assembly.
    pub(super) fn pack_into_contract_creator(&mut self, contract: ContractId) -> Result<()> {
        let ast = self.ast;
        let bases = &ast.contract(contract).linearization;

        // Determine the arguments used for the base constructors and which
        // functions the creation code needs. A base re-specified further
        // down the hierarchy keeps the most derived arguments.
        let mut base_arguments: HashMap<ContractId, &[ExpressionId]> = HashMap::new();
        let mut constructor_nodes: Vec<FunctionId> = Vec::new();
        let mut argument_nodes: Vec<ExpressionId> = Vec::new();
        for &c in bases {
            if let Some(constructor) = ast.constructor_of(c) {
                constructor_nodes.push(constructor);
            }
            for specifier in &ast.contract(c).base_contracts {
                if !base_arguments.contains_key(&specifier.base) {
                    base_arguments.insert(specifier.base, &specifier.arguments);
                    argument_nodes.extend(specifier.arguments.iter().copied());
                }
            }
        }

        let resolve_override = |name: &str| -> Option<FunctionId> {
            for &c in bases {
                for &f in &ast.contract(c).functions {
                    let function = ast.function(f);
                    if !function.is_constructor && function.name == name {
                        return Some(f);
                    }
                }
            }
            None
        };

        let mut graph = CallGraph::new(ast, &resolve_override);
        for &constructor in &constructor_nodes {
            graph.add_function(constructor);
        }
        for &argument in &argument_nodes {
            graph.add_expression(argument);
        }
        let needed_functions = graph.calls();

        // First add all overrides (or the functions themselves if there is
        // no override), so the override owns the canonical entry mark when
        // both are reachable.
        for &function in &needed_functions {
            if ast.function(function).is_constructor {
                continue;
            }
            if let Some(override_fn) = resolve_override(&ast.function(function).name) {
                if needed_functions.contains(&override_fn) {
                    self.context.add_function(override_fn);
                }
            }
        }
        // now add the rest
        for &function in &needed_functions {
            if ast.function(function).is_constructor
                || resolve_override(&ast.function(function).name) != Some(function)
            {
                self.context.add_function(function);
            }
        }

        // Call constructors in base-to-derived order. The constructor for
        // the most derived contract is called later.
        for i in 1..bases.len() {
            let base = bases[bases.len() - i];
            if let Some(base_constructor) = ast.constructor_of(base) {
                let arguments = base_arguments
                    .get(&base)
                    .copied()
                    .unwrap_or_else(|| panic!("no constructor arguments captured for base {base}"));
                self.append_base_constructor_call(base_constructor, arguments)?;
            }
        }
        if let Some(constructor) = ast.constructor_of(contract) {
            self.append_constructor_call(constructor)?;
        }

        let runtime_code = self.runtime_context.assembled_bytecode(self.optimize)?;
        let sub = self.context.add_subroutine(runtime_code);
        // stack contains the sub size
        self.context.append_op(Opcode::DUP1);
        self.context.append_push_subroutine_offset(sub);
        self.context.append_push(U256::ZERO);
        self.context.append_op(Opcode::CODECOPY);
        self.context.append_push(U256::ZERO);
        self.context.append_op(Opcode::RETURN);

        for &function in &needed_functions {
            self.compile_function(function)?;
        }
        Ok(())
    }

    fn append_base_constructor_call(
        &mut self,
        constructor: FunctionId,
        arguments: &[ExpressionId],
    ) -> Result<()> {
        let ast = self.ast;
        let parameters = &ast.function(constructor).parameters;
        let return_mark = self.context.push_new_mark();
        for (&argument, &parameter) in arguments.iter().zip(parameters) {
            ExpressionCompiler::compile_expression(&mut self.context, ast, argument)?;
            append_type_conversion(
                &mut self.context,
                &ast.expression(argument).ty,
                &ast.variable(parameter).ty,
                false,
            );
        }
        let entry = self.context.function_entry_mark(constructor);
        self.context.append_jump_to(entry);
        self.context.append_mark(return_mark);
        // the constructor consumed the return mark and arguments
        let arguments_size = size_on_stack(ast, parameters) as isize;
        self.context.adjust_stack(-(arguments_size + 1));
        Ok(())
    }

    /// The most derived constructor receives its arguments appended behind
    /// the deployed image: copy them to memory at the calldata data offset
    /// and unpack from there.
    fn append_constructor_call(&mut self, constructor: FunctionId) -> Result<()> {
        let ast = self.ast;
        let parameters = &ast.function(constructor).parameters;
        let return_mark = self.context.push_new_mark();

        let argument_size: usize = parameters
            .iter()
            .map(|&v| padded_size(ast.variable(v).ty.calldata_encoded_size()))
            .sum();
        if argument_size > 0 {
            self.context.append_push(U256::from(argument_size));
            self.context.append_program_size();
            self.context.append_push(U256::from(SELECTOR_SIZE));
            self.context.append_op(Opcode::CODECOPY);
            self.append_calldata_unpacker(constructor, true)?;
        }

        let entry = self.context.function_entry_mark(constructor);
        self.context.append_jump_to(entry);
        self.context.append_mark(return_mark);
        let arguments_size = size_on_stack(ast, parameters) as isize;
        self.context.adjust_stack(-(arguments_size + 1));
        Ok(())
    }
}
