//! Compilation context: the assembly item buffer and everything the code
//! generator tracks while filling it.
//!
//! A [`CompilerContext`] owns one append-only stream of [`Asm`] items, a mark
//! (jump label) allocator, the entry-mark table for functions, the storage
//! slot map for state variables, and the virtual stack model. The model is
//! the single source of truth for `DUP`/`SWAP` distances: every appended item
//! moves a height counter by its stack delta, and variable accesses are
//! computed against it.
//!
//! Finalization resolves mark references, flattens attached sub-assemblies
//! into trailing data blobs, and hands the stream to the evm-glue assembler.

use crate::error::{CompilerError, Result};
use alloy_primitives::U256;
use covenant_ast::{Ast, ContractId, FunctionId, VariableId};
use evm_glue::{
    assembler::{assemble_maximized, assemble_minimized},
    assembly::{Asm, MarkRef, RefType},
    opcodes::Opcode,
};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Type alias for mark ids used in evm-glue assembly.
pub type MarkId = usize;

/// Handle to an attached sub-assembly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubAssemblyId(usize);

struct SubAssembly {
    mark: MarkId,
    code: Vec<u8>,
}

/// A variable bound to a region of the modeled stack. `base` is the height
/// of the slot directly below the value, measured from the function
/// baseline.
#[derive(Debug, Clone, Copy)]
struct StackBinding {
    base: usize,
    size: usize,
}

pub struct CompilerContext {
    asm: Vec<Asm>,
    next_mark: MarkId,
    placed_marks: HashSet<MarkId>,
    referenced_marks: HashSet<MarkId>,

    /// Modeled operand stack height, relative to the current function's
    /// baseline (slot 0 is the caller's return address).
    stack_height: usize,
    variables: HashMap<VariableId, StackBinding>,

    function_entry_marks: HashMap<FunctionId, MarkId>,

    state_variables: HashMap<VariableId, U256>,
    next_storage_slot: u64,

    /// Linearized contract hierarchy, most derived first; used to resolve
    /// calls to their final override.
    inheritance_hierarchy: Vec<ContractId>,

    /// Creation bytecode of contracts this one can instantiate.
    compiled_contracts: HashMap<ContractId, Vec<u8>>,

    subs: Vec<SubAssembly>,
    /// Mark placed behind everything (code, subs) at finalization; its
    /// offset is the total image size.
    program_size_mark: Option<MarkId>,
}

impl CompilerContext {
    pub fn new() -> Self {
        Self {
            asm: Vec::new(),
            next_mark: 0,
            placed_marks: HashSet::new(),
            referenced_marks: HashSet::new(),
            stack_height: 0,
            variables: HashMap::new(),
            function_entry_marks: HashMap::new(),
            state_variables: HashMap::new(),
            next_storage_slot: 0,
            inheritance_hierarchy: Vec::new(),
            compiled_contracts: HashMap::new(),
            subs: Vec::new(),
            program_size_mark: None,
        }
    }

    // ---- marks ----

    /// Allocate a fresh mark.
    pub fn new_mark(&mut self) -> MarkId {
        let mark = self.next_mark;
        self.next_mark += 1;
        mark
    }

    /// Place `mark` at the current position. Every placed mark is a valid
    /// jump target, so a `JUMPDEST` follows it.
    pub fn append_mark(&mut self, mark: MarkId) {
        assert!(self.placed_marks.insert(mark), "mark {mark} placed twice");
        self.asm.push(Asm::Mark(mark));
        self.asm.push(Asm::Op(Opcode::JUMPDEST));
    }

    /// Push the code offset of `mark` onto the stack.
    pub fn append_push_mark(&mut self, mark: MarkId) {
        self.referenced_marks.insert(mark);
        self.asm.push(Asm::Ref(MarkRef {
            ref_type: RefType::Direct(mark),
            is_pushed: true,
            set_size: None,
        }));
        self.stack_height += 1;
    }

    /// Allocate a fresh mark and push its offset; the caller places it
    /// later.
    pub fn push_new_mark(&mut self) -> MarkId {
        let mark = self.new_mark();
        self.append_push_mark(mark);
        mark
    }

    pub fn append_jump_to(&mut self, mark: MarkId) {
        self.append_push_mark(mark);
        self.append_op(Opcode::JUMP);
    }

    /// Unconditional jump to a fresh mark the caller places later.
    pub fn append_jump_to_new(&mut self) -> MarkId {
        let mark = self.new_mark();
        self.append_jump_to(mark);
        mark
    }

    /// Jump to `mark` if the value on top of the stack is non-zero.
    pub fn append_conditional_jump_to(&mut self, mark: MarkId) {
        self.append_push_mark(mark);
        self.append_op(Opcode::JUMPI);
    }

    /// Conditional jump to a fresh mark the caller places later.
    pub fn append_conditional_jump(&mut self) -> MarkId {
        let mark = self.new_mark();
        self.append_conditional_jump_to(mark);
        mark
    }

    // ---- functions ----

    /// Register `function`, allocating its entry mark on first registration.
    pub fn add_function(&mut self, function: FunctionId) {
        if !self.function_entry_marks.contains_key(&function) {
            let mark = self.new_mark();
            self.function_entry_marks.insert(function, mark);
        }
    }

    pub fn function_entry_mark(&self, function: FunctionId) -> MarkId {
        *self
            .function_entry_marks
            .get(&function)
            .unwrap_or_else(|| panic!("function {function} has no entry mark"))
    }

    pub fn set_inheritance_hierarchy(&mut self, hierarchy: Vec<ContractId>) {
        self.inheritance_hierarchy = hierarchy;
    }

    /// Entry mark of the most derived non-constructor function named `name`
    /// in the inheritance hierarchy. Calls dispatch through this, so an
    /// override wins over the statically named definition.
    pub fn virtual_function_entry_mark(&self, ast: &Ast, name: &str) -> MarkId {
        for &contract in &self.inheritance_hierarchy {
            for &f in &ast.contract(contract).functions {
                let function = ast.function(f);
                if !function.is_constructor && function.name == name {
                    return self.function_entry_mark(f);
                }
            }
        }
        panic!("virtual function {name} not found in hierarchy");
    }

    // ---- virtual stack model & variables ----

    pub fn stack_height(&self) -> usize {
        self.stack_height
    }

    /// Correct the model where the machine stack changed behind a jump (a
    /// callee consumed the arguments and return mark and left its return
    /// values).
    pub fn adjust_stack(&mut self, delta: isize) {
        let height = self.stack_height as isize + delta;
        assert!(height >= 0, "stack model underflow (adjust {delta} at {})", self.stack_height);
        self.stack_height = height as usize;
    }

    /// Reset the per-function state: clears variable bindings and restarts
    /// the model at the function baseline (the caller's return address is
    /// the only slot present).
    pub fn start_new_function(&mut self) {
        self.variables.clear();
        self.stack_height = 1;
    }

    /// Bind `var` to the slots at the current stack top without emitting
    /// code. Used for values the caller already pushed (arguments).
    pub fn add_variable(&mut self, var: VariableId, size: usize) {
        self.variables.insert(var, StackBinding { base: self.stack_height, size });
        self.stack_height += size;
    }

    /// Bind `var` like [`add_variable`](Self::add_variable), but first push
    /// a zero for each of its slots.
    pub fn add_and_initialize_variable(&mut self, var: VariableId, size: usize) {
        let base = self.stack_height;
        for _ in 0..size {
            self.append_push(U256::ZERO);
        }
        self.variables.insert(var, StackBinding { base, size });
    }

    /// Baseline-relative position of `var`: `(base, size)` where `base` is
    /// the height below its first slot.
    pub fn variable_binding(&self, var: VariableId) -> (usize, usize) {
        let binding = self
            .variables
            .get(&var)
            .unwrap_or_else(|| panic!("variable {var} is not bound on the stack"));
        (binding.base, binding.size)
    }

    // ---- state variables ----

    /// Assign the next storage slot to `var`.
    pub fn add_state_variable(&mut self, var: VariableId) {
        let slot = U256::from(self.next_storage_slot);
        self.next_storage_slot += 1;
        self.state_variables.insert(var, slot);
    }

    pub fn storage_slot(&self, var: VariableId) -> U256 {
        *self
            .state_variables
            .get(&var)
            .unwrap_or_else(|| panic!("variable {var} has no storage slot"))
    }

    // ---- compiled contract registry ----

    pub fn set_compiled_contracts(&mut self, contracts: HashMap<ContractId, Vec<u8>>) {
        self.compiled_contracts = contracts;
    }

    pub fn compiled_contract(&self, contract: ContractId) -> &[u8] {
        self.compiled_contracts
            .get(&contract)
            .unwrap_or_else(|| panic!("no compiled bytecode for contract {contract}"))
    }

    // ---- raw emission ----

    /// Append an opcode, applying its stack delta to the model.
    pub fn append_op(&mut self, op: Opcode) {
        let (pops, pushes) = stack_effect(&op);
        assert!(
            self.stack_height >= pops,
            "stack model underflow: {op:?} pops {pops} at height {}",
            self.stack_height
        );
        self.stack_height = self.stack_height - pops + pushes;
        self.asm.push(Asm::Op(op));
    }

    /// Push a constant using the smallest `PUSH` opcode.
    pub fn append_push(&mut self, value: U256) {
        if value.is_zero() {
            self.append_op(Opcode::PUSH0);
            return;
        }

        let trimmed = value.to_be_bytes_trimmed_vec();

        macro_rules! push_n {
            ($n:expr, $opcode:ident) => {{
                let mut arr = [0u8; $n];
                arr.copy_from_slice(&trimmed[..]);
                self.append_op(Opcode::$opcode(arr));
            }};
        }

        match trimmed.len() {
            1 => self.append_op(Opcode::PUSH1([trimmed[0]])),
            2 => push_n!(2, PUSH2),
            3 => push_n!(3, PUSH3),
            4 => push_n!(4, PUSH4),
            5 => push_n!(5, PUSH5),
            6 => push_n!(6, PUSH6),
            7 => push_n!(7, PUSH7),
            8 => push_n!(8, PUSH8),
            9..=32 => self.append_op(Opcode::PUSH32(value.to_be_bytes())),
            _ => unreachable!("U256 is max 32 bytes by definition"),
        }
    }

    /// Duplicate the `depth`-th stack slot (1 = top). Depths beyond
    /// `DUP16`'s reach are a [`CompilerError::StackTooDeep`].
    pub fn append_dup(&mut self, depth: usize) -> Result<()> {
        let op = dup_opcode(depth).ok_or(CompilerError::StackTooDeep)?;
        self.append_op(op);
        Ok(())
    }

    /// Exchange the top slot with the one `depth` slots below it.
    pub fn append_swap(&mut self, depth: usize) -> Result<()> {
        let op = swap_opcode(depth).ok_or(CompilerError::StackTooDeep)?;
        self.append_op(op);
        Ok(())
    }

    // ---- sub-assemblies ----

    /// Attach separately finalized code; pushes its byte size. The code is
    /// flattened behind everything else at finalization, and
    /// [`append_push_subroutine_offset`](Self::append_push_subroutine_offset)
    /// resolves to the offset it lands at.
    pub fn add_subroutine(&mut self, code: Vec<u8>) -> SubAssemblyId {
        let mark = self.new_mark();
        self.append_push(U256::from(code.len()));
        self.subs.push(SubAssembly { mark, code });
        SubAssemblyId(self.subs.len() - 1)
    }

    pub fn append_push_subroutine_offset(&mut self, sub: SubAssemblyId) {
        let mark = self.subs[sub.0].mark;
        self.append_push_mark(mark);
    }

    /// Push the total byte size of the finalized image (code plus attached
    /// subs). Deployment-time data is appended after this point.
    pub fn append_program_size(&mut self) {
        let mark = match self.program_size_mark {
            Some(mark) => mark,
            None => {
                let mark = self.new_mark();
                self.program_size_mark = Some(mark);
                mark
            }
        };
        self.append_push_mark(mark);
    }

    // ---- finalization ----

    /// Resolve marks, flatten sub-assemblies, and assemble to bytes.
    ///
    /// `optimize` selects push-width-minimizing assembly; otherwise all mark
    /// references use full-width pushes.
    pub fn assembled_bytecode(&self, optimize: bool) -> Result<Vec<u8>> {
        let mut items = self.asm.clone();
        for sub in &self.subs {
            items.push(Asm::Mark(sub.mark));
            items.push(Asm::Data(sub.code.clone()));
        }
        if let Some(mark) = self.program_size_mark {
            items.push(Asm::Mark(mark));
        }

        for &mark in &self.referenced_marks {
            let attached_here = self.subs.iter().any(|s| s.mark == mark)
                || self.program_size_mark == Some(mark);
            assert!(
                self.placed_marks.contains(&mark) || attached_here,
                "mark {mark} is referenced but never placed"
            );
        }

        let assembled = if optimize {
            assemble_minimized(&items, true)
        } else {
            assemble_maximized(&items, true)
        };
        let (_, bytecode) =
            assembled.map_err(|e| CompilerError::Assembly { message: format!("{e:?}") })?;
        Ok(bytecode)
    }

    /// The raw item stream, for inspection.
    pub fn items(&self) -> &[Asm] {
        &self.asm
    }

    /// Human-readable listing of the item stream.
    pub fn write_assembly(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        for (i, item) in self.asm.iter().enumerate() {
            match item {
                Asm::Mark(mark) => writeln!(out, "{i:4}: mark_{mark}:")?,
                Asm::Ref(MarkRef { ref_type: RefType::Direct(mark), .. }) => {
                    writeln!(out, "{i:4}:   push mark_{mark}")?
                }
                Asm::Data(data) => writeln!(out, "{i:4}:   data[{} bytes]", data.len())?,
                other => writeln!(out, "{i:4}:   {other:?}")?,
            }
        }
        for sub in &self.subs {
            writeln!(out, "  sub mark_{}: {} bytes", sub.mark, sub.code.len())?;
        }
        Ok(())
    }
}

impl Default for CompilerContext {
    fn default() -> Self {
        Self::new()
    }
}

/// `(pops, pushes)` of the opcodes the code generator emits.
fn stack_effect(op: &Opcode) -> (usize, usize) {
    use Opcode::*;
    match op {
        STOP | JUMPDEST | INVALID => (0, 0),
        ADD | MUL | SUB | DIV | SDIV | MOD | SMOD | SIGNEXTEND | EXP | LT | GT | SLT | SGT
        | EQ | AND | OR | XOR | BYTE => (2, 1),
        ISZERO | NOT | CALLDATALOAD | MLOAD | SLOAD => (1, 1),
        POP | JUMP => (1, 0),
        MSTORE | SSTORE | JUMPI | RETURN | REVERT => (2, 0),
        CALLDATACOPY | CODECOPY => (3, 0),
        CREATE => (3, 1),
        PUSH0 => (0, 1),
        PUSH1(_) | PUSH2(_) | PUSH3(_) | PUSH4(_) | PUSH5(_) | PUSH6(_) | PUSH7(_) | PUSH8(_)
        | PUSH9(_) | PUSH10(_) | PUSH11(_) | PUSH12(_) | PUSH13(_) | PUSH14(_) | PUSH15(_)
        | PUSH16(_) | PUSH17(_) | PUSH18(_) | PUSH19(_) | PUSH20(_) | PUSH21(_) | PUSH22(_)
        | PUSH23(_) | PUSH24(_) | PUSH25(_) | PUSH26(_) | PUSH27(_) | PUSH28(_) | PUSH29(_)
        | PUSH30(_) | PUSH31(_) | PUSH32(_) => (0, 1),
        DUP1 => (1, 2),
        DUP2 => (2, 3),
        DUP3 => (3, 4),
        DUP4 => (4, 5),
        DUP5 => (5, 6),
        DUP6 => (6, 7),
        DUP7 => (7, 8),
        DUP8 => (8, 9),
        DUP9 => (9, 10),
        DUP10 => (10, 11),
        DUP11 => (11, 12),
        DUP12 => (12, 13),
        DUP13 => (13, 14),
        DUP14 => (14, 15),
        DUP15 => (15, 16),
        DUP16 => (16, 17),
        SWAP1 => (2, 2),
        SWAP2 => (3, 3),
        SWAP3 => (4, 4),
        SWAP4 => (5, 5),
        SWAP5 => (6, 6),
        SWAP6 => (7, 7),
        SWAP7 => (8, 8),
        SWAP8 => (9, 9),
        SWAP9 => (10, 10),
        SWAP10 => (11, 11),
        SWAP11 => (12, 12),
        SWAP12 => (13, 13),
        SWAP13 => (14, 14),
        SWAP14 => (15, 15),
        SWAP15 => (16, 16),
        SWAP16 => (17, 17),
        other => panic!("no stack effect recorded for {other:?}"),
    }
}

fn dup_opcode(depth: usize) -> Option<Opcode> {
    use Opcode::*;
    Some(match depth {
        1 => DUP1,
        2 => DUP2,
        3 => DUP3,
        4 => DUP4,
        5 => DUP5,
        6 => DUP6,
        7 => DUP7,
        8 => DUP8,
        9 => DUP9,
        10 => DUP10,
        11 => DUP11,
        12 => DUP12,
        13 => DUP13,
        14 => DUP14,
        15 => DUP15,
        16 => DUP16,
        _ => return None,
    })
}

fn swap_opcode(depth: usize) -> Option<Opcode> {
    use Opcode::*;
    Some(match depth {
        1 => SWAP1,
        2 => SWAP2,
        3 => SWAP3,
        4 => SWAP4,
        5 => SWAP5,
        6 => SWAP6,
        7 => SWAP7,
        8 => SWAP8,
        9 => SWAP9,
        10 => SWAP10,
        11 => SWAP11,
        12 => SWAP12,
        13 => SWAP13,
        14 => SWAP14,
        15 => SWAP15,
        16 => SWAP16,
        _ => return None,
    })
}
