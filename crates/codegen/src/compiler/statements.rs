//! Statement lowering: function bodies, control flow, and the stack
//! restoration epilogue.

use super::{Compiler, ExpressionCompiler};
use crate::conversion::append_type_conversion;
use crate::error::Result;
use crate::utils::{size_on_stack, CompilerUtils};
use covenant_ast::{ExpressionId, FunctionId, Statement, StatementId};
use evm_glue::opcodes::Opcode;

impl Compiler<'_> {
    /// Lower one function body into the current context.
    ///
    /// Stack upon entry: `[return address] [arg0] … [argn]`. The body runs
    /// with zero-initialized slots reserved for return parameters and every
    /// local; the epilogue drops arguments and locals, moves the return
    /// values below the return address, and jumps back to the caller.
    pub(super) fn compile_function(&mut self, function: FunctionId) -> Result<()> {
        let ast = self.ast;
        let f = ast.function(function);

        self.context.start_new_function();
        self.return_mark = self.context.new_mark();
        self.return_parameters = f.return_parameters.clone();
        self.break_marks.clear();
        self.continue_marks.clear();

        let entry = self.context.function_entry_mark(function);
        self.context.append_mark(entry);

        for &var in &f.parameters {
            self.context.add_variable(var, ast.variable(var).ty.size_on_stack());
        }
        for &var in &f.return_parameters {
            self.context.add_and_initialize_variable(var, ast.variable(var).ty.size_on_stack());
        }
        for &var in &f.local_variables {
            self.context.add_and_initialize_variable(var, ast.variable(var).ty.size_on_stack());
        }

        for &statement in &f.body {
            self.compile_statement(statement)?;
        }

        self.context.append_mark(self.return_mark);

        let arguments_size = size_on_stack(ast, &f.parameters);
        let return_values_size = size_on_stack(ast, &f.return_parameters);
        let local_variables_size = size_on_stack(ast, &f.local_variables);

        assert_eq!(
            self.context.stack_height(),
            1 + arguments_size + return_values_size + local_variables_size,
            "stack height diverged while lowering {}",
            f.name
        );

        // Re-shuffle the stack. `stack_layout[i]` is the target position of
        // the element currently at position i; -1 marks elements to drop.
        // The return arguments having increasing indices is what makes this
        // terminate.
        let mut stack_layout: Vec<isize> = Vec::new();
        stack_layout.push(return_values_size as isize); // target of the return address
        stack_layout.extend(std::iter::repeat(-1).take(arguments_size));
        stack_layout.extend(0..return_values_size as isize);
        stack_layout.extend(std::iter::repeat(-1).take(local_variables_size));

        while stack_layout[stack_layout.len() - 1] != stack_layout.len() as isize - 1 {
            let top = stack_layout[stack_layout.len() - 1];
            if top < 0 {
                self.context.append_op(Opcode::POP);
                stack_layout.pop();
            } else {
                self.context.append_swap(stack_layout.len() - 1 - top as usize)?;
                let last = stack_layout.len() - 1;
                stack_layout.swap(top as usize, last);
            }
        }

        self.context.append_op(Opcode::JUMP);
        Ok(())
    }

    fn compile_statement(&mut self, statement: StatementId) -> Result<()> {
        let ast = self.ast;
        match ast.statement(statement) {
            Statement::If { condition, true_branch, false_branch } => {
                self.compile_expression(*condition)?;
                let true_mark = self.context.append_conditional_jump();
                if let Some(branch) = false_branch {
                    self.compile_statements(branch)?;
                }
                let end_mark = self.context.append_jump_to_new();
                self.context.append_mark(true_mark);
                self.compile_statements(true_branch)?;
                self.context.append_mark(end_mark);
            }
            Statement::While { condition, body } => {
                let loop_start = self.context.new_mark();
                let loop_end = self.context.new_mark();
                self.continue_marks.push(loop_start);
                self.break_marks.push(loop_end);

                self.context.append_mark(loop_start);
                self.compile_expression(*condition)?;
                self.context.append_op(Opcode::ISZERO);
                self.context.append_conditional_jump_to(loop_end);

                self.compile_statements(body)?;

                self.context.append_jump_to(loop_start);
                self.context.append_mark(loop_end);

                self.continue_marks.pop();
                self.break_marks.pop();
            }
            Statement::For { init, condition, step, body } => {
                let loop_start = self.context.new_mark();
                let loop_end = self.context.new_mark();
                self.continue_marks.push(loop_start);
                self.break_marks.push(loop_end);

                if let Some(init) = init {
                    self.compile_statement(*init)?;
                }

                self.context.append_mark(loop_start);

                // without a terminating condition the loop runs until break
                if let Some(condition) = condition {
                    self.compile_expression(*condition)?;
                    self.context.append_op(Opcode::ISZERO);
                    self.context.append_conditional_jump_to(loop_end);
                }

                self.compile_statements(body)?;

                // loop expression; `continue` lands on the condition check
                // and skips this
                if let Some(step) = step {
                    self.compile_expression(*step)?;
                    let size = ast.expression(*step).ty.size_on_stack();
                    CompilerUtils::new(&mut self.context).pop_stack_element(size);
                }

                self.context.append_jump_to(loop_start);
                self.context.append_mark(loop_end);

                self.continue_marks.pop();
                self.break_marks.pop();
            }
            Statement::Continue => {
                if let Some(&mark) = self.continue_marks.last() {
                    self.context.append_jump_to(mark);
                }
            }
            Statement::Break => {
                if let Some(&mark) = self.break_marks.last() {
                    self.context.append_jump_to(mark);
                }
            }
            Statement::Return { expression } => {
                if let Some(expression) = expression {
                    // single-value return: the value lands in the first
                    // return parameter
                    let Some(&target) = self.return_parameters.first() else {
                        panic!("return value in a function without return parameters");
                    };
                    self.compile_expression(*expression)?;
                    append_type_conversion(
                        &mut self.context,
                        &ast.expression(*expression).ty,
                        &ast.variable(target).ty,
                        false,
                    );
                    CompilerUtils::new(&mut self.context).move_to_stack_variable(target)?;
                }
                self.context.append_jump_to(self.return_mark);
            }
            Statement::VariableDefinition { declaration, initializer } => {
                // the slot was zero-initialized in the prologue; only an
                // initializer emits code
                if let Some(initializer) = initializer {
                    self.compile_expression(*initializer)?;
                    append_type_conversion(
                        &mut self.context,
                        &ast.expression(*initializer).ty,
                        &ast.variable(*declaration).ty,
                        false,
                    );
                    CompilerUtils::new(&mut self.context).move_to_stack_variable(*declaration)?;
                }
            }
            Statement::Expression(expression) => {
                self.compile_expression(*expression)?;
                let size = ast.expression(*expression).ty.size_on_stack();
                CompilerUtils::new(&mut self.context).pop_stack_element(size);
            }
        }
        Ok(())
    }

    fn compile_statements(&mut self, statements: &[StatementId]) -> Result<()> {
        for &statement in statements {
            self.compile_statement(statement)?;
        }
        Ok(())
    }

    pub(super) fn compile_expression(&mut self, expression: ExpressionId) -> Result<()> {
        ExpressionCompiler::compile_expression(&mut self.context, self.ast, expression)
    }
}
