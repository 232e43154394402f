//! Inheritance: override dispatch and linearization order.

use crate::tests::helpers::{calldata_for, compile, execute_runtime, selector};
use alloy_primitives::U256;
use covenant_ast::{AstBuilder, ContractId, Type};

/// A contract whose function returns a constant.
fn constant_function(b: &mut AstBuilder, contract_name: &str, value: u64) -> ContractId {
    let mut c = b.contract(contract_name);
    let mut f = c.function("x");
    f.returns("r", Type::UINT256);
    let value = f.number(value);
    let ret = f.return_stmt(Some(value));
    f.body(vec![ret]);
    c.finish().expect("linearization")
}

#[test]
fn derived_contract_overrides_base_function() {
    let mut b = AstBuilder::new();
    let base = constant_function(&mut b, "A", 1);
    let derived = {
        let mut c = b.contract("B");
        c.inherits(base, vec![]);
        let mut f = c.function("x");
        f.returns("r", Type::UINT256);
        let two = f.number(2);
        let ret = f.return_stmt(Some(two));
        f.body(vec![ret]);
        c.finish().expect("linearization")
    };
    let ast = b.finish();

    let (_, runtime) = compile(&ast, derived);
    let data = calldata_for(selector(&ast, derived, "x"), &[]);
    assert_eq!(execute_runtime(runtime, data).expect("call"), U256::from(2));
}

#[test]
fn inherited_functions_stay_callable() {
    let mut b = AstBuilder::new();
    let base = constant_function(&mut b, "A", 7);
    let derived = {
        let mut c = b.contract("B");
        c.inherits(base, vec![]);
        c.finish().expect("linearization")
    };
    let ast = b.finish();

    let (_, runtime) = compile(&ast, derived);
    let data = calldata_for(selector(&ast, derived, "x"), &[]);
    assert_eq!(execute_runtime(runtime, data).expect("call"), U256::from(7));
}

/// Diamond: `A`, `B is A`, `C is A`, `D is B, C`. The right-most base is
/// the most derived, so `C.x` wins.
#[test]
fn diamond_resolves_to_the_most_derived_override() {
    let mut b = AstBuilder::new();
    let a = constant_function(&mut b, "A", 1);
    let bb = {
        let mut c = b.contract("B");
        c.inherits(a, vec![]);
        let mut f = c.function("x");
        f.returns("r", Type::UINT256);
        let two = f.number(2);
        let ret = f.return_stmt(Some(two));
        f.body(vec![ret]);
        c.finish().expect("linearization")
    };
    let cc = {
        let mut c = b.contract("C");
        c.inherits(a, vec![]);
        let mut f = c.function("x");
        f.returns("r", Type::UINT256);
        let three = f.number(3);
        let ret = f.return_stmt(Some(three));
        f.body(vec![ret]);
        c.finish().expect("linearization")
    };
    let d = {
        let mut c = b.contract("D");
        c.inherits(bb, vec![]).inherits(cc, vec![]);
        c.finish().expect("linearization")
    };
    let ast = b.finish();

    assert_eq!(ast.contract(d).linearization, vec![d, cc, bb, a]);
    let (_, runtime) = compile(&ast, d);
    let data = calldata_for(selector(&ast, d, "x"), &[]);
    assert_eq!(execute_runtime(runtime, data).expect("call"), U256::from(3));
}

/// An internal call inside a base function dispatches to the final
/// override, not the statically named definition.
#[test]
fn internal_calls_dispatch_virtually() {
    let mut b = AstBuilder::new();
    let base = {
        let mut c = b.contract("A");
        let g = {
            let mut g = c.function("g");
            g.returns("r", Type::UINT256);
            let one = g.number(1);
            let ret = g.return_stmt(Some(one));
            g.body(vec![ret]);
            g.id()
        };
        let mut f = c.function("f");
        f.returns("r", Type::UINT256);
        let call = f.call(g, vec![]);
        let ret = f.return_stmt(Some(call));
        f.body(vec![ret]);
        c.finish().expect("linearization")
    };
    let derived = {
        let mut c = b.contract("B");
        c.inherits(base, vec![]);
        let mut g = c.function("g");
        g.returns("r", Type::UINT256);
        let two = g.number(2);
        let ret = g.return_stmt(Some(two));
        g.body(vec![ret]);
        c.finish().expect("linearization")
    };
    let ast = b.finish();

    // calling A.f through B runs B.g
    let (_, runtime) = compile(&ast, derived);
    let data = calldata_for(selector(&ast, derived, "f"), &[]);
    assert_eq!(execute_runtime(runtime, data).expect("call"), U256::from(2));

    // the same call compiled standalone runs A.g
    let (_, runtime) = compile(&ast, base);
    let data = calldata_for(selector(&ast, base, "f"), &[]);
    assert_eq!(execute_runtime(runtime, data).expect("call"), U256::from(1));
}
