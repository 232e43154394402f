//! Expression code generation.
//!
//! Every entry point leaves exactly `expr.ty.size_on_stack()` slots on the
//! modeled stack.

use crate::context::CompilerContext;
use crate::conversion::append_type_conversion;
use crate::error::{CompilerError, Result};
use crate::utils::CompilerUtils;
use alloy_primitives::U256;
use covenant_ast::{
    Ast, BinaryOp, ContractId, ExpressionId, ExpressionKind, FunctionId, Reference, Type, UnaryOp,
    WORD_SIZE,
};
use evm_glue::opcodes::Opcode;

pub(crate) struct ExpressionCompiler<'a, 'ast> {
    ctx: &'a mut CompilerContext,
    ast: &'ast Ast,
}

impl<'a, 'ast> ExpressionCompiler<'a, 'ast> {
    pub(crate) fn compile_expression(
        ctx: &'a mut CompilerContext,
        ast: &'ast Ast,
        expression: ExpressionId,
    ) -> Result<()> {
        ExpressionCompiler { ctx, ast }.compile(expression)
    }

    fn compile(&mut self, id: ExpressionId) -> Result<()> {
        let ast = self.ast;
        match &ast.expression(id).kind {
            ExpressionKind::Literal(value) => self.ctx.append_push(*value),
            ExpressionKind::Identifier(reference) => self.compile_read(*reference)?,
            ExpressionKind::Assignment { lhs, op, rhs } => {
                self.compile_assignment(*lhs, *op, *rhs)?
            }
            ExpressionKind::UnaryOperation { op, operand } => {
                self.compile(*operand)?;
                match op {
                    UnaryOp::Not => self.ctx.append_op(Opcode::ISZERO),
                    UnaryOp::BitNot => self.ctx.append_op(Opcode::NOT),
                    UnaryOp::Negate => {
                        // 0 - x
                        self.ctx.append_push(U256::ZERO);
                        self.ctx.append_op(Opcode::SUB);
                    }
                }
            }
            ExpressionKind::BinaryOperation { op, lhs, rhs } => {
                self.compile_binary_operation(*op, *lhs, *rhs)?
            }
            ExpressionKind::FunctionCall { function, arguments } => {
                self.compile_function_call(*function, arguments)?
            }
            ExpressionKind::NewContract { contract, arguments } => {
                self.compile_contract_creation(*contract, arguments)?
            }
        }
        Ok(())
    }

    fn compile_read(&mut self, reference: Reference) -> Result<()> {
        match reference {
            Reference::LocalVariable(var) => {
                CompilerUtils::new(self.ctx).copy_variable_to_top(var)?;
            }
            Reference::StateVariable(var) => {
                let slot = self.ctx.storage_slot(var);
                self.ctx.append_push(slot);
                self.ctx.append_op(Opcode::SLOAD);
            }
        }
        Ok(())
    }

    /// Assignments evaluate to the stored value, which the statement layer
    /// pops when it is not used.
    fn compile_assignment(
        &mut self,
        lhs: ExpressionId,
        op: Option<BinaryOp>,
        rhs: ExpressionId,
    ) -> Result<()> {
        let ast = self.ast;
        let lhs_expr = ast.expression(lhs);
        let &ExpressionKind::Identifier(reference) = &lhs_expr.kind else {
            panic!("assignment target is not an identifier");
        };

        self.compile(rhs)?;
        append_type_conversion(self.ctx, &ast.expression(rhs).ty, &lhs_expr.ty, false);
        if let Some(op) = op {
            // fetch the current value; [rhs, lhs] computes lhs `op` rhs
            self.compile_read(reference)?;
            self.append_binary_operator(op, &lhs_expr.ty);
        }

        self.ctx.append_op(Opcode::DUP1);
        match reference {
            Reference::LocalVariable(var) => {
                CompilerUtils::new(self.ctx).move_to_stack_variable(var)?;
            }
            Reference::StateVariable(var) => {
                let slot = self.ctx.storage_slot(var);
                self.ctx.append_push(slot);
                self.ctx.append_op(Opcode::SSTORE);
            }
        }
        Ok(())
    }

    fn compile_binary_operation(
        &mut self,
        op: BinaryOp,
        lhs: ExpressionId,
        rhs: ExpressionId,
    ) -> Result<()> {
        if matches!(op, BinaryOp::And | BinaryOp::Or) {
            return self.compile_short_circuit(op, lhs, rhs);
        }
        let ast = self.ast;
        // operands are brought to the left-hand type before the operation
        let common_type = ast.expression(lhs).ty;
        self.compile(lhs)?;
        append_type_conversion(self.ctx, &ast.expression(lhs).ty, &common_type, false);
        self.compile(rhs)?;
        append_type_conversion(self.ctx, &ast.expression(rhs).ty, &common_type, false);
        // non-commutative operators expect the left operand on top
        if !op.is_commutative() {
            self.ctx.append_swap(1)?;
        }
        self.append_binary_operator(op, &common_type);
        Ok(())
    }

    /// Apply `op` to a stack of `[rhs, lhs]` (left operand on top).
    fn append_binary_operator(&mut self, op: BinaryOp, operand_type: &Type) {
        use Opcode::*;
        let signed = operand_type.is_signed();
        match op {
            BinaryOp::Add => self.ctx.append_op(ADD),
            BinaryOp::Sub => self.ctx.append_op(SUB),
            BinaryOp::Mul => self.ctx.append_op(MUL),
            BinaryOp::Div => self.ctx.append_op(if signed { SDIV } else { DIV }),
            BinaryOp::Mod => self.ctx.append_op(if signed { SMOD } else { MOD }),
            BinaryOp::BitAnd => self.ctx.append_op(AND),
            BinaryOp::BitOr => self.ctx.append_op(OR),
            BinaryOp::BitXor => self.ctx.append_op(XOR),
            BinaryOp::Equal => self.ctx.append_op(EQ),
            BinaryOp::NotEqual => {
                self.ctx.append_op(EQ);
                self.ctx.append_op(ISZERO);
            }
            BinaryOp::LessThan => self.ctx.append_op(if signed { SLT } else { LT }),
            BinaryOp::GreaterThan => self.ctx.append_op(if signed { SGT } else { GT }),
            BinaryOp::LessOrEqual => {
                self.ctx.append_op(if signed { SGT } else { GT });
                self.ctx.append_op(ISZERO);
            }
            BinaryOp::GreaterOrEqual => {
                self.ctx.append_op(if signed { SLT } else { LT });
                self.ctx.append_op(ISZERO);
            }
            BinaryOp::And | BinaryOp::Or => {
                unreachable!("short-circuit operators have their own lowering")
            }
        }
    }

    /// `&&`/`||`: the right operand only runs when the left one does not
    /// decide the result.
    fn compile_short_circuit(
        &mut self,
        op: BinaryOp,
        lhs: ExpressionId,
        rhs: ExpressionId,
    ) -> Result<()> {
        self.compile(lhs)?;
        self.ctx.append_op(Opcode::DUP1);
        if op == BinaryOp::And {
            self.ctx.append_op(Opcode::ISZERO);
        }
        let end_mark = self.ctx.append_conditional_jump();
        self.ctx.append_op(Opcode::POP);
        self.compile(rhs)?;
        self.ctx.append_mark(end_mark);
        Ok(())
    }

    /// Internal call: push the return mark, push the arguments, jump to the
    /// final override of the named function, land, and re-align the model
    /// (the callee consumed mark and arguments and left its return values).
    fn compile_function_call(
        &mut self,
        function: FunctionId,
        arguments: &[ExpressionId],
    ) -> Result<()> {
        let ast = self.ast;
        let f = ast.function(function);

        let return_mark = self.ctx.push_new_mark();
        for (&argument, &parameter) in arguments.iter().zip(&f.parameters) {
            self.compile(argument)?;
            append_type_conversion(
                self.ctx,
                &ast.expression(argument).ty,
                &ast.variable(parameter).ty,
                false,
            );
        }
        let entry = self.ctx.virtual_function_entry_mark(ast, &f.name);
        self.ctx.append_jump_to(entry);
        self.ctx.append_mark(return_mark);

        let arguments_size = crate::utils::size_on_stack(ast, &f.parameters) as isize;
        let returns_size = crate::utils::size_on_stack(ast, &f.return_parameters) as isize;
        self.ctx.adjust_stack(returns_size - arguments_size - 1);
        Ok(())
    }

    /// `new Contract(args)`: copy the callee's creation image to memory,
    /// store the encoded constructor arguments behind it, and `CREATE`.
    fn compile_contract_creation(
        &mut self,
        contract: ContractId,
        arguments: &[ExpressionId],
    ) -> Result<()> {
        let ast = self.ast;
        let bytecode = self.ctx.compiled_contract(contract).to_vec();
        let code_size = bytecode.len();
        let parameters = match ast.constructor_of(contract) {
            Some(constructor) => ast.function(constructor).parameters.clone(),
            None => Vec::new(),
        };

        // copy the creation code to memory offset 0
        let sub = self.ctx.add_subroutine(bytecode);
        self.ctx.append_op(Opcode::DUP1);
        self.ctx.append_push_subroutine_offset(sub);
        self.ctx.append_push(U256::ZERO);
        self.ctx.append_op(Opcode::CODECOPY);

        // constructor arguments follow the code in memory, ABI-encoded
        let mut data_offset = code_size;
        for (&argument, &parameter) in arguments.iter().zip(&parameters) {
            let var = ast.variable(parameter);
            let num_bytes = var.ty.calldata_encoded_size();
            if num_bytes > WORD_SIZE {
                return Err(CompilerError::UnsupportedType {
                    location: var.location,
                    type_name: var.ty.canonical_name(),
                });
            }
            self.compile(argument)?;
            append_type_conversion(self.ctx, &ast.expression(argument).ty, &var.ty, false);
            data_offset += CompilerUtils::new(self.ctx).store_in_memory(
                data_offset,
                num_bytes,
                var.ty.is_left_aligned(),
                true,
            );
        }

        // stack still holds the code size; extend it to the full input size
        if data_offset > code_size {
            self.ctx.append_push(U256::from(data_offset - code_size));
            self.ctx.append_op(Opcode::ADD);
        }
        self.ctx.append_push(U256::ZERO); // input offset
        self.ctx.append_push(U256::ZERO); // endowment
        self.ctx.append_op(Opcode::CREATE);
        Ok(())
    }
}
