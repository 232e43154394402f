//! Transitive closure over "functions referenced from a set of AST nodes".

use covenant_ast::{Ast, ExpressionId, ExpressionKind, FunctionId, Statement, StatementId};
use std::collections::BTreeSet;

/// Worklist closure collecting every function transitively reachable by
/// reference from the seeded nodes.
///
/// Each function reference is first passed through the override resolver;
/// when the resolver names a different definition, that override is
/// collected (and its body scanned) instead of the statically referenced
/// target. The result is an ordered id set, so iteration — and therefore
/// emission — is deterministic.
pub struct CallGraph<'ast, R>
where
    R: Fn(&str) -> Option<FunctionId>,
{
    ast: &'ast Ast,
    resolve_override: R,
    calls: BTreeSet<FunctionId>,
    work_queue: Vec<FunctionId>,
}

impl<'ast, R> CallGraph<'ast, R>
where
    R: Fn(&str) -> Option<FunctionId>,
{
    pub fn new(ast: &'ast Ast, resolve_override: R) -> Self {
        Self { ast, resolve_override, calls: BTreeSet::new(), work_queue: Vec::new() }
    }

    /// Seed the closure with a function definition itself.
    pub fn add_function(&mut self, function: FunctionId) {
        if self.calls.insert(function) {
            self.work_queue.push(function);
        }
    }

    /// Seed the closure with an expression; functions it references are
    /// collected.
    pub fn add_expression(&mut self, expression: ExpressionId) {
        self.scan_expression(expression);
    }

    /// Drain the worklist and return the collected set.
    pub fn calls(mut self) -> BTreeSet<FunctionId> {
        let ast = self.ast;
        while let Some(function) = self.work_queue.pop() {
            self.scan_statements(&ast.function(function).body);
        }
        self.calls
    }

    fn reference(&mut self, function: FunctionId) {
        let name = &self.ast.function(function).name;
        let target = (self.resolve_override)(name).unwrap_or(function);
        if self.calls.insert(target) {
            self.work_queue.push(target);
        }
    }

    fn scan_statements(&mut self, statements: &[StatementId]) {
        let ast = self.ast;
        for &id in statements {
            match ast.statement(id) {
                Statement::If { condition, true_branch, false_branch } => {
                    self.scan_expression(*condition);
                    self.scan_statements(true_branch);
                    if let Some(branch) = false_branch {
                        self.scan_statements(branch);
                    }
                }
                Statement::While { condition, body } => {
                    self.scan_expression(*condition);
                    self.scan_statements(body);
                }
                Statement::For { init, condition, step, body } => {
                    if let Some(init) = init {
                        self.scan_statements(std::slice::from_ref(init));
                    }
                    if let Some(condition) = condition {
                        self.scan_expression(*condition);
                    }
                    if let Some(step) = step {
                        self.scan_expression(*step);
                    }
                    self.scan_statements(body);
                }
                Statement::Return { expression } => {
                    if let Some(expression) = expression {
                        self.scan_expression(*expression);
                    }
                }
                Statement::VariableDefinition { initializer, .. } => {
                    if let Some(initializer) = initializer {
                        self.scan_expression(*initializer);
                    }
                }
                Statement::Expression(expression) => self.scan_expression(*expression),
                Statement::Continue | Statement::Break => {}
            }
        }
    }

    fn scan_expression(&mut self, id: ExpressionId) {
        let ast = self.ast;
        match &ast.expression(id).kind {
            ExpressionKind::Literal(_) | ExpressionKind::Identifier(_) => {}
            ExpressionKind::Assignment { lhs, rhs, .. } => {
                self.scan_expression(*lhs);
                self.scan_expression(*rhs);
            }
            ExpressionKind::UnaryOperation { operand, .. } => self.scan_expression(*operand),
            ExpressionKind::BinaryOperation { lhs, rhs, .. } => {
                self.scan_expression(*lhs);
                self.scan_expression(*rhs);
            }
            ExpressionKind::FunctionCall { function, arguments } => {
                self.reference(*function);
                for &arg in arguments {
                    self.scan_expression(arg);
                }
            }
            ExpressionKind::NewContract { arguments, .. } => {
                // the created contract's code is separate bytecode, only the
                // argument expressions run here
                for &arg in arguments {
                    self.scan_expression(arg);
                }
            }
        }
    }
}
