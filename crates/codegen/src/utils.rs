//! Primitive code generation helpers shared by the compiler stages.

use crate::context::CompilerContext;
use crate::error::Result;
use alloy_primitives::U256;
use covenant_ast::{Ast, VariableId, WORD_SIZE};
use evm_glue::opcodes::Opcode;

/// Round `n` up to the next word boundary.
pub fn padded_size(n: usize) -> usize {
    n.div_ceil(WORD_SIZE) * WORD_SIZE
}

/// Combined stack footprint of a declaration list.
pub fn size_on_stack(ast: &Ast, vars: &[VariableId]) -> usize {
    vars.iter().map(|&v| ast.variable(v).ty.size_on_stack()).sum()
}

/// Code generation primitives parameterized by a context.
pub struct CompilerUtils<'a> {
    ctx: &'a mut CompilerContext,
}

impl<'a> CompilerUtils<'a> {
    pub fn new(ctx: &'a mut CompilerContext) -> Self {
        Self { ctx }
    }

    /// Load `bytes` bytes at `offset` from calldata or memory onto the
    /// stack; returns the number of bytes consumed at the source.
    ///
    /// Padded loads read the full word and rely on the source being
    /// zero-padded. Unpadded loads shift out the trailing bytes so the value
    /// lands in canonical position for its alignment.
    pub fn load_from_memory(
        &mut self,
        offset: usize,
        bytes: usize,
        left_aligned: bool,
        from_calldata: bool,
        pad_to_words: bool,
    ) -> usize {
        if bytes == 0 {
            self.ctx.append_push(U256::ZERO);
            return 0;
        }
        assert!(bytes <= WORD_SIZE, "load of more than one word requested");
        let load = if from_calldata { Opcode::CALLDATALOAD } else { Opcode::MLOAD };

        if bytes == WORD_SIZE || pad_to_words {
            self.ctx.append_push(U256::from(offset));
            self.ctx.append_op(load);
            WORD_SIZE
        } else {
            // Divide out the trailing bytes; left-aligned values are
            // multiplied back into position, which also zeroes the tail.
            let shift_factor = U256::from(1) << ((WORD_SIZE - bytes) * 8);
            self.ctx.append_push(shift_factor);
            if left_aligned {
                self.ctx.append_op(Opcode::DUP1);
            }
            self.ctx.append_push(U256::from(offset));
            self.ctx.append_op(load);
            self.ctx.append_op(Opcode::DIV);
            if left_aligned {
                self.ctx.append_op(Opcode::MUL);
            }
            bytes
        }
    }

    /// Store the value on top of the stack to memory at `offset`; returns
    /// the number of bytes written.
    ///
    /// Padded stores write the full word as-is. Unpadded partial stores
    /// left-align the value first, so the remainder of the word is
    /// overwritten with zeros.
    pub fn store_in_memory(
        &mut self,
        offset: usize,
        bytes: usize,
        left_aligned: bool,
        pad_to_words: bool,
    ) -> usize {
        if bytes == 0 {
            return 0;
        }
        assert!(bytes <= WORD_SIZE, "store of more than one word requested");
        let num_bytes = if pad_to_words { padded_size(bytes) } else { bytes };
        if num_bytes != WORD_SIZE && !left_aligned {
            let shift_factor = U256::from(1) << ((WORD_SIZE - bytes) * 8);
            self.ctx.append_push(shift_factor);
            self.ctx.append_op(Opcode::MUL);
        }
        self.ctx.append_push(U256::from(offset));
        self.ctx.append_op(Opcode::MSTORE);
        num_bytes
    }

    /// Overwrite the slots bound to `var` with the value on top of the
    /// stack.
    pub fn move_to_stack_variable(&mut self, var: VariableId) -> Result<()> {
        let (base, size) = self.ctx.variable_binding(var);
        let height = self.ctx.stack_height();
        // depth (0 = top) of the variable's deepest slot
        let stack_position = height - 1 - base;
        for _ in 0..size {
            self.ctx.append_swap(stack_position - size + 1)?;
            self.ctx.append_op(Opcode::POP);
        }
        Ok(())
    }

    /// Copy the value bound to `var` to the top of the stack.
    pub fn copy_variable_to_top(&mut self, var: VariableId) -> Result<()> {
        let (base, size) = self.ctx.variable_binding(var);
        let depth = self.ctx.stack_height() - base;
        self.copy_to_stack_top(depth, size)
    }

    /// Duplicate the `size`-slot value whose deepest slot is `depth` slots
    /// below the top (1 = top).
    pub fn copy_to_stack_top(&mut self, depth: usize, size: usize) -> Result<()> {
        for _ in 0..size {
            self.ctx.append_dup(depth)?;
        }
        Ok(())
    }

    /// Pop a value of `size` stack slots.
    pub fn pop_stack_element(&mut self, size: usize) {
        for _ in 0..size {
            self.ctx.append_op(Opcode::POP);
        }
    }
}
