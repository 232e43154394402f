//! Property tests: compiled arithmetic agrees with U256 semantics.

use crate::tests::helpers::{calldata_for, compile, execute_runtime, selector};
use alloy_primitives::U256;
use covenant_ast::{Ast, AstBuilder, BinaryOp, ContractId, Type};
use proptest::prelude::*;

fn arb_u256() -> impl Strategy<Value = U256> {
    prop_oneof![
        Just(U256::ZERO),
        Just(U256::MAX),
        any::<u64>().prop_map(U256::from),
        any::<[u64; 4]>().prop_map(U256::from_limbs),
    ]
}

/// `function f(uint256 a, uint256 b) returns (uint256 r) { return a op b; }`
fn binary_op_contract(op: BinaryOp) -> (Ast, ContractId) {
    let mut b = AstBuilder::new();
    let mut c = b.contract("C");
    let mut f = c.function("f");
    let a = f.parameter("a", Type::UINT256);
    let bp = f.parameter("b", Type::UINT256);
    f.returns("r", Type::UINT256);
    let a_ref = f.identifier(a);
    let b_ref = f.identifier(bp);
    let result = f.binary(op, a_ref, b_ref);
    let ret = f.return_stmt(Some(result));
    f.body(vec![ret]);
    let contract = c.finish().expect("linearization");
    (b.finish(), contract)
}

fn run_binary_op(op: BinaryOp, a: U256, b: U256) -> U256 {
    let (ast, contract) = binary_op_contract(op);
    let (_, runtime) = compile(&ast, contract);
    let data = calldata_for(selector(&ast, contract, "f"), &[a, b]);
    execute_runtime(runtime, data).expect("execution")
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn addition_wraps(a in arb_u256(), b in arb_u256()) {
        prop_assert_eq!(run_binary_op(BinaryOp::Add, a, b), a.wrapping_add(b));
    }

    #[test]
    fn subtraction_wraps(a in arb_u256(), b in arb_u256()) {
        prop_assert_eq!(run_binary_op(BinaryOp::Sub, a, b), a.wrapping_sub(b));
    }

    #[test]
    fn multiplication_wraps(a in arb_u256(), b in arb_u256()) {
        prop_assert_eq!(run_binary_op(BinaryOp::Mul, a, b), a.wrapping_mul(b));
    }

    #[test]
    fn division_by_zero_yields_zero(a in arb_u256(), b in arb_u256()) {
        let expected = if b.is_zero() { U256::ZERO } else { a / b };
        prop_assert_eq!(run_binary_op(BinaryOp::Div, a, b), expected);
    }

    #[test]
    fn comparisons_are_boolean(a in arb_u256(), b in arb_u256()) {
        prop_assert_eq!(run_binary_op(BinaryOp::LessThan, a, b), U256::from(u8::from(a < b)));
        prop_assert_eq!(
            run_binary_op(BinaryOp::GreaterOrEqual, a, b),
            U256::from(u8::from(a >= b))
        );
    }

    #[test]
    fn bitwise_ops_match(a in arb_u256(), b in arb_u256()) {
        prop_assert_eq!(run_binary_op(BinaryOp::BitXor, a, b), a ^ b);
        prop_assert_eq!(run_binary_op(BinaryOp::BitAnd, a, b), a & b);
    }
}

/// `function sum(uint256 n) returns (uint256 s) { while (n > 0) { n = n - 1;
/// s = s + n; } }` — sums 0..n.
fn loop_contract() -> (Ast, ContractId) {
    let mut b = AstBuilder::new();
    let mut c = b.contract("C");
    let mut f = c.function("sum");
    let n = f.parameter("n", Type::UINT256);
    let s = f.returns("s", Type::UINT256);

    let n_ref = f.identifier(n);
    let zero = f.number(0);
    let cond = f.binary(BinaryOp::GreaterThan, n_ref, zero);

    let n_ref = f.identifier(n);
    let one = f.number(1);
    let less = f.binary(BinaryOp::Sub, n_ref, one);
    let n_target = f.identifier(n);
    let decrement = f.assign(n_target, less);
    let decrement = f.expr_stmt(decrement);

    let s_ref = f.identifier(s);
    let n_ref = f.identifier(n);
    let more = f.binary(BinaryOp::Add, s_ref, n_ref);
    let s_target = f.identifier(s);
    let accumulate = f.assign(s_target, more);
    let accumulate = f.expr_stmt(accumulate);

    let while_loop = f.while_stmt(cond, vec![decrement, accumulate]);
    f.body(vec![while_loop]);
    let contract = c.finish().expect("linearization");
    (b.finish(), contract)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn loop_sums_match_the_closed_form(n in 0u64..48) {
        let (ast, contract) = loop_contract();
        let (_, runtime) = compile(&ast, contract);
        let data = calldata_for(selector(&ast, contract, "sum"), &[U256::from(n)]);
        let expected = U256::from(n * n.saturating_sub(1) / 2);
        prop_assert_eq!(execute_runtime(runtime, data).expect("sum"), expected);
    }
}
