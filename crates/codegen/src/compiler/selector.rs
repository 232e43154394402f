//! Function selector: 4-byte dispatch, calldata unpacking, return packing.

use super::Compiler;
use crate::conversion::append_type_conversion;
use crate::error::{CompilerError, Result};
use crate::utils::{size_on_stack, CompilerUtils};
use alloy_primitives::U256;
use covenant_ast::{ContractId, FunctionId, SELECTOR_SIZE, WORD_SIZE};
use evm_glue::opcodes::Opcode;

impl Compiler<'_> {
    /// Emit the runtime prologue: load the signature hash from calldata and
    /// dispatch to the matching interface function. Unknown hashes fall
    /// through to `STOP`.
    pub(super) fn append_function_selector(&mut self, contract: ContractId) -> Result<()> {
        let ast = self.ast;
        let interface = ast.interface_functions(contract);

        // retrieve the function signature hash from the calldata
        self.context.append_push(U256::from(1));
        self.context.append_push(U256::ZERO);
        CompilerUtils::new(&mut self.context).load_from_memory(0, SELECTOR_SIZE, false, true, false);

        // stack now is: 1 0 <funhash>
        let mut unpacker_entry_points = Vec::with_capacity(interface.len());
        for &(selector, _) in &interface {
            let entry = self.context.new_mark();
            unpacker_entry_points.push(entry);
            self.context.append_op(Opcode::DUP1);
            self.context.append_push(U256::from_be_slice(&selector));
            self.context.append_op(Opcode::EQ);
            self.context.append_conditional_jump_to(entry);
        }
        self.context.append_op(Opcode::STOP); // function not found

        for (&(_, function), &entry) in interface.iter().zip(&unpacker_entry_points) {
            self.context.append_mark(entry);
            let return_mark = self.context.push_new_mark();
            self.append_calldata_unpacker(function, false)?;
            let function_entry = self.context.function_entry_mark(function);
            self.context.append_jump_to(function_entry);
            self.context.append_mark(return_mark);

            let f = ast.function(function);
            let arguments = size_on_stack(ast, &f.parameters) as isize;
            let returns = size_on_stack(ast, &f.return_parameters) as isize;
            self.context.adjust_stack(returns - arguments - 1);

            self.append_return_value_packer(function)?;
        }
        Ok(())
    }

    /// Load every parameter from its calldata slot onto the stack.
    ///
    /// Calldata is not length-checked; missing bytes read as zero. With
    /// `from_memory`, the values were copied to memory first (constructor
    /// arguments) and are loaded from there.
    pub(super) fn append_calldata_unpacker(
        &mut self,
        function: FunctionId,
        from_memory: bool,
    ) -> Result<usize> {
        let ast = self.ast;
        // the signature hash occupies the first four bytes
        let mut data_offset = SELECTOR_SIZE;
        for &param in &ast.function(function).parameters {
            let var = ast.variable(param);
            let num_bytes = var.ty.calldata_encoded_size();
            if num_bytes > WORD_SIZE {
                return Err(CompilerError::UnsupportedType {
                    location: var.location,
                    type_name: var.ty.canonical_name(),
                });
            }
            data_offset += CompilerUtils::new(&mut self.context).load_from_memory(
                data_offset,
                num_bytes,
                var.ty.is_left_aligned(),
                !from_memory,
                true,
            );
        }
        Ok(data_offset)
    }

    /// Store the return values to memory in declaration order and `RETURN`
    /// them. The stack is not cleaned up; `RETURN` ends execution.
    pub(super) fn append_return_value_packer(&mut self, function: FunctionId) -> Result<()> {
        let ast = self.ast;
        let return_parameters = &ast.function(function).return_parameters;
        let mut data_offset = 0;
        let mut stack_depth = size_on_stack(ast, return_parameters);
        for &param in return_parameters {
            let var = ast.variable(param);
            let num_bytes = var.ty.calldata_encoded_size();
            if num_bytes > WORD_SIZE {
                return Err(CompilerError::UnsupportedType {
                    location: var.location,
                    type_name: var.ty.canonical_name(),
                });
            }
            let size = var.ty.size_on_stack();
            CompilerUtils::new(&mut self.context).copy_to_stack_top(stack_depth, size)?;
            append_type_conversion(&mut self.context, &var.ty, &var.ty, true);
            data_offset += CompilerUtils::new(&mut self.context).store_in_memory(
                data_offset,
                num_bytes,
                var.ty.is_left_aligned(),
                true,
            );
            stack_depth -= size;
        }
        self.context.append_push(U256::from(data_offset));
        self.context.append_push(U256::ZERO);
        self.context.append_op(Opcode::RETURN);
        Ok(())
    }
}
