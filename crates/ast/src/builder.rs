//! Construction API for [`Ast`] arenas.
//!
//! [`AstBuilder`] exposes push-style constructors for expressions and
//! statements; [`ContractBuilder`] and [`FunctionBuilder`] scope additions to
//! a particular definition and deref back to the arena builder so bodies can
//! be assembled in one place. The builder also performs the two jobs the
//! resolve phase owes the code generator: computing the C3 linearization of
//! every contract and pre-scanning function bodies for local declarations.

use crate::{
    Ast, BinaryOp, ContractDefinition, ContractId, Expression, ExpressionId, ExpressionKind,
    FunctionDefinition, FunctionId, InheritanceSpecifier, Reference, SourceLocation, Statement,
    StatementId, Type, UnaryOp, VariableDeclaration, VariableId,
};
use alloy_primitives::U256;
use std::collections::HashSet;
use std::ops::{Deref, DerefMut};

#[derive(Debug, PartialEq, Eq)]
pub enum BuildError {
    /// No consistent most-derived-first order exists for the contract's
    /// bases.
    LinearizationFailure { contract: ContractId },
    /// A base contract was used before its own `finish` ran.
    BaseNotSealed { base: ContractId },
}

impl std::fmt::Display for BuildError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuildError::LinearizationFailure { contract } => {
                write!(f, "no valid linearization for contract {contract}")
            }
            BuildError::BaseNotSealed { base } => {
                write!(f, "base contract {base} has no linearization yet")
            }
        }
    }
}

impl std::error::Error for BuildError {}

#[derive(Default)]
pub struct AstBuilder {
    ast: Ast,
    /// Declarations created as state variables; identifiers resolve against
    /// this to pick their reference kind.
    state_variables: HashSet<VariableId>,
}

impl AstBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn finish(self) -> Ast {
        self.ast
    }

    // ---- declarations ----

    pub fn declare(&mut self, name: &str, ty: Type) -> VariableId {
        self.ast.variables.push(VariableDeclaration {
            name: name.to_owned(),
            ty,
            location: SourceLocation::default(),
        })
    }

    pub fn declare_at(&mut self, name: &str, ty: Type, location: SourceLocation) -> VariableId {
        let var = self.declare(name, ty);
        self.ast.variables[var].location = location;
        var
    }

    // ---- expressions ----

    fn expression(&mut self, kind: ExpressionKind, ty: Type) -> ExpressionId {
        self.ast.expressions.push(Expression { kind, ty, location: SourceLocation::default() })
    }

    pub fn literal(&mut self, value: U256, ty: Type) -> ExpressionId {
        self.expression(ExpressionKind::Literal(value), ty)
    }

    /// `uint256` literal.
    pub fn number(&mut self, value: u64) -> ExpressionId {
        self.literal(U256::from(value), Type::UINT256)
    }

    pub fn bool_literal(&mut self, value: bool) -> ExpressionId {
        self.literal(U256::from(value as u64), Type::Bool)
    }

    pub fn identifier(&mut self, var: VariableId) -> ExpressionId {
        let ty = self.ast.variables[var].ty;
        let reference = if self.state_variables.contains(&var) {
            Reference::StateVariable(var)
        } else {
            Reference::LocalVariable(var)
        };
        self.expression(ExpressionKind::Identifier(reference), ty)
    }

    pub fn assign(&mut self, lhs: ExpressionId, rhs: ExpressionId) -> ExpressionId {
        let ty = self.ast.expressions[lhs].ty;
        self.expression(ExpressionKind::Assignment { lhs, op: None, rhs }, ty)
    }

    /// `lhs op= rhs`.
    pub fn compound_assign(
        &mut self,
        lhs: ExpressionId,
        op: BinaryOp,
        rhs: ExpressionId,
    ) -> ExpressionId {
        let ty = self.ast.expressions[lhs].ty;
        self.expression(ExpressionKind::Assignment { lhs, op: Some(op), rhs }, ty)
    }

    pub fn unary(&mut self, op: UnaryOp, operand: ExpressionId) -> ExpressionId {
        let ty = match op {
            UnaryOp::Not => Type::Bool,
            _ => self.ast.expressions[operand].ty,
        };
        self.expression(ExpressionKind::UnaryOperation { op, operand }, ty)
    }

    pub fn binary(&mut self, op: BinaryOp, lhs: ExpressionId, rhs: ExpressionId) -> ExpressionId {
        let ty = if op.is_comparison() || matches!(op, BinaryOp::And | BinaryOp::Or) {
            Type::Bool
        } else {
            self.ast.expressions[lhs].ty
        };
        self.expression(ExpressionKind::BinaryOperation { op, lhs, rhs }, ty)
    }

    pub fn call(&mut self, function: FunctionId, arguments: Vec<ExpressionId>) -> ExpressionId {
        let ty = self.ast.return_type_of(function);
        self.expression(ExpressionKind::FunctionCall { function, arguments }, ty)
    }

    pub fn new_contract(
        &mut self,
        contract: ContractId,
        arguments: Vec<ExpressionId>,
    ) -> ExpressionId {
        self.expression(ExpressionKind::NewContract { contract, arguments }, Type::Address)
    }

    // ---- statements ----

    fn statement(&mut self, statement: Statement) -> StatementId {
        self.ast.statements.push(statement)
    }

    pub fn expr_stmt(&mut self, expression: ExpressionId) -> StatementId {
        self.statement(Statement::Expression(expression))
    }

    pub fn if_stmt(
        &mut self,
        condition: ExpressionId,
        true_branch: Vec<StatementId>,
        false_branch: Option<Vec<StatementId>>,
    ) -> StatementId {
        self.statement(Statement::If { condition, true_branch, false_branch })
    }

    pub fn while_stmt(&mut self, condition: ExpressionId, body: Vec<StatementId>) -> StatementId {
        self.statement(Statement::While { condition, body })
    }

    pub fn for_stmt(
        &mut self,
        init: Option<StatementId>,
        condition: Option<ExpressionId>,
        step: Option<ExpressionId>,
        body: Vec<StatementId>,
    ) -> StatementId {
        self.statement(Statement::For { init, condition, step, body })
    }

    pub fn break_stmt(&mut self) -> StatementId {
        self.statement(Statement::Break)
    }

    pub fn continue_stmt(&mut self) -> StatementId {
        self.statement(Statement::Continue)
    }

    pub fn return_stmt(&mut self, expression: Option<ExpressionId>) -> StatementId {
        self.statement(Statement::Return { expression })
    }

    pub fn var_def(
        &mut self,
        declaration: VariableId,
        initializer: Option<ExpressionId>,
    ) -> StatementId {
        self.statement(Statement::VariableDefinition { declaration, initializer })
    }

    // ---- contracts ----

    pub fn contract(&mut self, name: &str) -> ContractBuilder<'_> {
        let contract = self.ast.contracts.push(ContractDefinition {
            name: name.to_owned(),
            functions: Vec::new(),
            base_contracts: Vec::new(),
            state_variables: Vec::new(),
            linearization: Vec::new(),
            location: SourceLocation::default(),
        });
        ContractBuilder { builder: self, contract }
    }

    /// Every variable declared by `VariableDefinition` statements anywhere
    /// under `body`, in declaration order.
    fn collect_locals(&self, body: &[StatementId], out: &mut Vec<VariableId>) {
        for &id in body {
            match &self.ast.statements[id] {
                Statement::VariableDefinition { declaration, .. } => out.push(*declaration),
                Statement::If { true_branch, false_branch, .. } => {
                    self.collect_locals(true_branch, out);
                    if let Some(branch) = false_branch {
                        self.collect_locals(branch, out);
                    }
                }
                Statement::While { body, .. } => self.collect_locals(body, out),
                Statement::For { init, body, .. } => {
                    if let Some(init) = init {
                        self.collect_locals(std::slice::from_ref(init), out);
                    }
                    self.collect_locals(body, out);
                }
                _ => {}
            }
        }
    }

    /// C3 merge over the already-sealed base linearizations. Bases are taken
    /// in reversed source order, so the right-most base is the most derived.
    fn linearize(&self, contract: ContractId) -> Result<Vec<ContractId>, BuildError> {
        let direct: Vec<ContractId> =
            self.ast.contracts[contract].base_contracts.iter().map(|s| s.base).collect();

        let mut sequences: Vec<Vec<ContractId>> = Vec::new();
        for &base in direct.iter().rev() {
            let linearization = &self.ast.contracts[base].linearization;
            if linearization.is_empty() {
                return Err(BuildError::BaseNotSealed { base });
            }
            sequences.push(linearization.clone());
        }
        if !direct.is_empty() {
            sequences.push(direct.iter().rev().copied().collect());
        }

        let mut result = vec![contract];
        loop {
            sequences.retain(|s| !s.is_empty());
            if sequences.is_empty() {
                return Ok(result);
            }
            // A head is a valid next element iff it appears in no tail.
            let next = sequences
                .iter()
                .map(|s| s[0])
                .find(|&candidate| sequences.iter().all(|s| !s[1..].contains(&candidate)));
            let Some(next) = next else {
                return Err(BuildError::LinearizationFailure { contract });
            };
            result.push(next);
            for s in &mut sequences {
                s.retain(|&c| c != next);
            }
        }
    }
}

#[must_use]
pub struct ContractBuilder<'a> {
    builder: &'a mut AstBuilder,
    contract: ContractId,
}

impl<'a> ContractBuilder<'a> {
    pub fn id(&self) -> ContractId {
        self.contract
    }

    pub fn inherits(&mut self, base: ContractId, arguments: Vec<ExpressionId>) -> &mut Self {
        let contract = self.contract;
        self.builder.ast.contracts[contract]
            .base_contracts
            .push(InheritanceSpecifier { base, arguments });
        self
    }

    pub fn state_variable(&mut self, name: &str, ty: Type) -> VariableId {
        let var = self.builder.declare(name, ty);
        self.builder.state_variables.insert(var);
        let contract = self.contract;
        self.builder.ast.contracts[contract].state_variables.push(var);
        var
    }

    pub fn function(&mut self, name: &str) -> FunctionBuilder<'_, 'a> {
        self.add_function(name, false)
    }

    pub fn constructor(&mut self) -> FunctionBuilder<'_, 'a> {
        let name = self.builder.ast.contracts[self.contract].name.clone();
        self.add_function(&name, true)
    }

    fn add_function(&mut self, name: &str, is_constructor: bool) -> FunctionBuilder<'_, 'a> {
        let function = self.builder.ast.functions.push(FunctionDefinition {
            name: name.to_owned(),
            is_constructor,
            is_public: !is_constructor,
            parameters: Vec::new(),
            return_parameters: Vec::new(),
            local_variables: Vec::new(),
            body: Vec::new(),
            location: SourceLocation::default(),
        });
        let contract = self.contract;
        self.builder.ast.contracts[contract].functions.push(function);
        FunctionBuilder { contract_builder: self, function }
    }

    /// Seals the contract: computes and stores its linearization.
    pub fn finish(self) -> Result<ContractId, BuildError> {
        let linearization = self.builder.linearize(self.contract)?;
        self.builder.ast.contracts[self.contract].linearization = linearization;
        Ok(self.contract)
    }
}

impl Deref for ContractBuilder<'_> {
    type Target = AstBuilder;

    fn deref(&self) -> &AstBuilder {
        self.builder
    }
}

impl DerefMut for ContractBuilder<'_> {
    fn deref_mut(&mut self) -> &mut AstBuilder {
        self.builder
    }
}

#[must_use]
pub struct FunctionBuilder<'c, 'a> {
    contract_builder: &'c mut ContractBuilder<'a>,
    function: FunctionId,
}

impl FunctionBuilder<'_, '_> {
    pub fn id(&self) -> FunctionId {
        self.function
    }

    /// Removes the function from the external interface.
    pub fn internal(&mut self) -> &mut Self {
        let function = self.function;
        self.contract_builder.builder.ast.functions[function].is_public = false;
        self
    }

    pub fn parameter(&mut self, name: &str, ty: Type) -> VariableId {
        let var = self.contract_builder.builder.declare(name, ty);
        self.parameter_var(var);
        var
    }

    /// Attaches an already-declared variable as the next parameter.
    pub fn parameter_var(&mut self, var: VariableId) {
        let function = self.function;
        self.contract_builder.builder.ast.functions[function].parameters.push(var);
    }

    pub fn returns(&mut self, name: &str, ty: Type) -> VariableId {
        let var = self.contract_builder.builder.declare(name, ty);
        let function = self.function;
        self.contract_builder.builder.ast.functions[function].return_parameters.push(var);
        var
    }

    /// Attaches the body and pre-scans it for local declarations.
    pub fn body(&mut self, body: Vec<StatementId>) {
        let mut locals = Vec::new();
        self.contract_builder.builder.collect_locals(&body, &mut locals);
        let function = self.function;
        let def = &mut self.contract_builder.builder.ast.functions[function];
        def.local_variables = locals;
        def.body = body;
    }
}

impl<'a> Deref for FunctionBuilder<'_, 'a> {
    type Target = ContractBuilder<'a>;

    fn deref(&self) -> &ContractBuilder<'a> {
        self.contract_builder
    }
}

impl<'a> DerefMut for FunctionBuilder<'_, 'a> {
    fn deref_mut(&mut self) -> &mut ContractBuilder<'a> {
        self.contract_builder
    }
}
