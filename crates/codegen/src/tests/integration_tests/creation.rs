//! `new Contract(…)` through the compiled-contract registry.

use crate::tests::helpers::{
    calldata_for, compile, compile_with_subcontracts, execute_runtime, selector,
};
use alloy_primitives::U256;
use covenant_ast::{AstBuilder, ContractId, Type};
use std::collections::HashMap;

#[test]
fn factories_create_contracts() {
    let mut b = AstBuilder::new();

    let child = {
        let mut c = b.contract("Child");
        let mut f = c.function("val");
        f.returns("r", Type::UINT256);
        let seven = f.number(7);
        let ret = f.return_stmt(Some(seven));
        f.body(vec![ret]);
        c.finish().expect("linearization")
    };

    let factory = {
        let mut c = b.contract("Factory");
        let mut f = c.function("make");
        f.returns("a", Type::Address);
        let created = f.new_contract(child, vec![]);
        let ret = f.return_stmt(Some(created));
        f.body(vec![ret]);
        c.finish().expect("linearization")
    };
    let ast = b.finish();

    let (child_creation, _) = compile(&ast, child);
    let mut registry: HashMap<ContractId, Vec<u8>> = HashMap::new();
    registry.insert(child, child_creation);
    let (_, runtime) = compile_with_subcontracts(&ast, factory, &registry);

    let data = calldata_for(selector(&ast, factory, "make"), &[]);
    let created_at = execute_runtime(runtime, data).expect("make");
    assert_ne!(created_at, U256::ZERO, "CREATE must return a non-zero address");
}

#[test]
fn constructor_arguments_flow_into_created_contracts() {
    let mut b = AstBuilder::new();

    let child = {
        let mut c = b.contract("Child");
        let v = c.state_variable("v", Type::UINT256);
        let mut ctor = c.constructor();
        let x = ctor.parameter("x", Type::UINT256);
        let x_ref = ctor.identifier(x);
        let v_ref = ctor.identifier(v);
        let store = ctor.assign(v_ref, x_ref);
        let store = ctor.expr_stmt(store);
        ctor.body(vec![store]);
        c.finish().expect("linearization")
    };

    let factory = {
        let mut c = b.contract("Factory");
        let mut f = c.function("make");
        f.returns("a", Type::Address);
        let nine = f.number(9);
        let created = f.new_contract(child, vec![nine]);
        let ret = f.return_stmt(Some(created));
        f.body(vec![ret]);
        c.finish().expect("linearization")
    };
    let ast = b.finish();

    let (child_creation, _) = compile(&ast, child);
    let mut registry: HashMap<ContractId, Vec<u8>> = HashMap::new();
    registry.insert(child, child_creation);
    let (_, runtime) = compile_with_subcontracts(&ast, factory, &registry);

    let data = calldata_for(selector(&ast, factory, "make"), &[]);
    let created_at = execute_runtime(runtime, data).expect("make");
    assert_ne!(created_at, U256::ZERO, "creation with arguments must succeed");
}
