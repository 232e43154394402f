//! Arena-backed AST for the Covenant contract language.
//!
//! The tree is stored in a data-oriented way: every node kind lives in one
//! contiguous arena on [`Ast`] and nodes reference each other through typed
//! copyable ids. The parse/resolve phases own the arena; the code generator
//! only ever borrows it, and keys its per-node tables (entry labels, stack
//! bindings) by node id.
//!
//! Everything here is assumed fully resolved and type-checked: identifiers
//! carry the declaration they refer to, expressions carry their type, and
//! every contract carries its complete base linearization.

pub mod builder;
pub mod index;
pub mod types;

pub use crate::{
    builder::{AstBuilder, BuildError},
    index::{Idx, IndexVec},
    types::{Type, WORD_SIZE},
};
use alloy_primitives::{keccak256, U256};

newtype_index! {
    pub struct ContractId;
    pub struct FunctionId;
    pub struct VariableId;
    pub struct StatementId;
    pub struct ExpressionId;
}

/// Width of the function-signature hash prepended to calldata.
pub const SELECTOR_SIZE: usize = 4;

/// Byte range of a node in the original source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SourceLocation {
    pub start: usize,
    pub end: usize,
}

impl SourceLocation {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }
}

/// A whole source unit: every contract with all of its parts.
#[derive(Debug, Default)]
pub struct Ast {
    pub contracts: IndexVec<ContractId, ContractDefinition>,
    pub functions: IndexVec<FunctionId, FunctionDefinition>,
    pub variables: IndexVec<VariableId, VariableDeclaration>,
    pub statements: IndexVec<StatementId, Statement>,
    pub expressions: IndexVec<ExpressionId, Expression>,
}

#[derive(Debug)]
pub struct ContractDefinition {
    pub name: String,
    /// Functions defined directly on this contract, constructor included.
    pub functions: Vec<FunctionId>,
    pub base_contracts: Vec<InheritanceSpecifier>,
    pub state_variables: Vec<VariableId>,
    /// This contract and all transitive bases, most-derived first.
    pub linearization: Vec<ContractId>,
    pub location: SourceLocation,
}

/// A `is Base(arg, …)` clause on a contract definition.
#[derive(Debug)]
pub struct InheritanceSpecifier {
    pub base: ContractId,
    pub arguments: Vec<ExpressionId>,
}

#[derive(Debug)]
pub struct FunctionDefinition {
    pub name: String,
    pub is_constructor: bool,
    /// Externally callable through the selector dispatch.
    pub is_public: bool,
    pub parameters: Vec<VariableId>,
    pub return_parameters: Vec<VariableId>,
    /// Every variable declared anywhere in the body, in declaration order.
    pub local_variables: Vec<VariableId>,
    pub body: Vec<StatementId>,
    pub location: SourceLocation,
}

#[derive(Debug)]
pub struct VariableDeclaration {
    pub name: String,
    pub ty: Type,
    pub location: SourceLocation,
}

#[derive(Debug)]
pub enum Statement {
    If {
        condition: ExpressionId,
        true_branch: Vec<StatementId>,
        false_branch: Option<Vec<StatementId>>,
    },
    While {
        condition: ExpressionId,
        body: Vec<StatementId>,
    },
    For {
        init: Option<StatementId>,
        /// Absent condition means the loop runs until `break`.
        condition: Option<ExpressionId>,
        /// Loop expression, evaluated (and discarded) after the body.
        step: Option<ExpressionId>,
        body: Vec<StatementId>,
    },
    Continue,
    Break,
    Return {
        expression: Option<ExpressionId>,
    },
    VariableDefinition {
        declaration: VariableId,
        initializer: Option<ExpressionId>,
    },
    Expression(ExpressionId),
}

#[derive(Debug)]
pub struct Expression {
    pub kind: ExpressionKind,
    pub ty: Type,
    pub location: SourceLocation,
}

#[derive(Debug)]
pub enum ExpressionKind {
    Literal(U256),
    Identifier(Reference),
    /// `lhs = rhs`, or `lhs op= rhs` when `op` is present. Evaluates to the
    /// stored value.
    Assignment {
        lhs: ExpressionId,
        op: Option<BinaryOp>,
        rhs: ExpressionId,
    },
    UnaryOperation {
        op: UnaryOp,
        operand: ExpressionId,
    },
    BinaryOperation {
        op: BinaryOp,
        lhs: ExpressionId,
        rhs: ExpressionId,
    },
    /// Internal call; `function` is the statically referenced declaration.
    FunctionCall {
        function: FunctionId,
        arguments: Vec<ExpressionId>,
    },
    /// `new Contract(args)`; evaluates to the created contract's address.
    NewContract {
        contract: ContractId,
        arguments: Vec<ExpressionId>,
    },
}

/// A resolved identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reference {
    LocalVariable(VariableId),
    StateVariable(VariableId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// Logical `!`.
    Not,
    /// Bitwise `~`.
    BitNot,
    /// Arithmetic negation.
    Negate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Equal,
    NotEqual,
    LessThan,
    GreaterThan,
    LessOrEqual,
    GreaterOrEqual,
    /// Short-circuiting `&&`.
    And,
    /// Short-circuiting `||`.
    Or,
    BitAnd,
    BitOr,
    BitXor,
}

impl BinaryOp {
    /// Whether operand order is irrelevant to the result.
    pub fn is_commutative(&self) -> bool {
        matches!(
            self,
            BinaryOp::Add
                | BinaryOp::Mul
                | BinaryOp::Equal
                | BinaryOp::NotEqual
                | BinaryOp::BitAnd
                | BinaryOp::BitOr
                | BinaryOp::BitXor
        )
    }

    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOp::Equal
                | BinaryOp::NotEqual
                | BinaryOp::LessThan
                | BinaryOp::GreaterThan
                | BinaryOp::LessOrEqual
                | BinaryOp::GreaterOrEqual
        )
    }
}

impl Ast {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contract(&self, id: ContractId) -> &ContractDefinition {
        &self.contracts[id]
    }

    pub fn function(&self, id: FunctionId) -> &FunctionDefinition {
        &self.functions[id]
    }

    pub fn variable(&self, id: VariableId) -> &VariableDeclaration {
        &self.variables[id]
    }

    pub fn statement(&self, id: StatementId) -> &Statement {
        &self.statements[id]
    }

    pub fn expression(&self, id: ExpressionId) -> &Expression {
        &self.expressions[id]
    }

    /// The constructor defined directly on `contract`, if any.
    pub fn constructor_of(&self, contract: ContractId) -> Option<FunctionId> {
        self.contracts[contract]
            .functions
            .iter()
            .copied()
            .find(|&f| self.functions[f].is_constructor)
    }

    /// The type of a function's (single) return value; `Unit` when the
    /// function returns nothing.
    pub fn return_type_of(&self, function: FunctionId) -> Type {
        self.functions[function]
            .return_parameters
            .first()
            .map(|&v| self.variables[v].ty)
            .unwrap_or(Type::Unit)
    }

    /// Canonical textual signature, `name(type1,type2,…)`.
    pub fn signature(&self, function: FunctionId) -> String {
        let f = &self.functions[function];
        let params = f
            .parameters
            .iter()
            .map(|&v| self.variables[v].ty.canonical_name())
            .collect::<Vec<_>>()
            .join(",");
        format!("{}({})", f.name, params)
    }

    /// First four bytes of the Keccak-256 hash of the canonical signature.
    pub fn selector(&self, function: FunctionId) -> [u8; SELECTOR_SIZE] {
        let hash = keccak256(self.signature(function).as_bytes());
        [hash[0], hash[1], hash[2], hash[3]]
    }

    /// The externally callable interface of `contract`: for every signature,
    /// the most derived public non-constructor definition, sorted by
    /// selector. The sort makes the dispatch chain deterministic.
    pub fn interface_functions(
        &self,
        contract: ContractId,
    ) -> Vec<([u8; SELECTOR_SIZE], FunctionId)> {
        let mut seen = std::collections::HashSet::new();
        let mut interface = Vec::new();
        for &c in &self.contracts[contract].linearization {
            for &f in &self.contracts[c].functions {
                let function = &self.functions[f];
                if function.is_constructor || !function.is_public {
                    continue;
                }
                let selector = self.selector(f);
                if seen.insert(selector) {
                    interface.push((selector, f));
                }
            }
        }
        interface.sort_by_key(|&(selector, _)| selector);
        interface
    }
}
