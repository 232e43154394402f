//! Compilation and execution harness for codegen tests.
//!
//! Contracts are compiled to bytecode and executed on an in-memory EVM.
//! Deployment is simulated by installing the creation image (with any
//! constructor arguments appended) as account code and calling it: the call
//! output is the runtime image, which is then installed over the same
//! account so constructor storage effects stay visible to later calls.

use crate::compile_contract;
use alloy_primitives::U256;
use covenant_ast::{Ast, ContractId};
use revm::{
    primitives::{
        address, AccountInfo, Bytecode, ExecutionResult, Output, SuccessReason, TransactTo,
    },
    Evm, InMemoryDB,
};
use std::collections::HashMap;

const CONTRACT_ADDRESS: revm::primitives::Address =
    address!("1000000000000000000000000000000000000000");
const CALLER_ADDRESS: revm::primitives::Address =
    address!("9000000000000000000000000000000000000000");

/// Compile `contract`, returning `(creation, runtime)` bytecode.
pub fn compile(ast: &Ast, contract: ContractId) -> (Vec<u8>, Vec<u8>) {
    compile_with_subcontracts(ast, contract, &HashMap::new())
}

pub fn compile_with_subcontracts(
    ast: &Ast,
    contract: ContractId,
    compiled: &HashMap<ContractId, Vec<u8>>,
) -> (Vec<u8>, Vec<u8>) {
    compile_contract(ast, contract, compiled, true).expect("compilation failed")
}

/// Selector of the interface function named `name`.
pub fn selector(ast: &Ast, contract: ContractId, name: &str) -> [u8; 4] {
    ast.interface_functions(contract)
        .into_iter()
        .find(|&(_, f)| ast.function(f).name == name)
        .map(|(selector, _)| selector)
        .expect("function not in interface")
}

/// Word-encode arguments back to back.
pub fn encode_words(args: &[U256]) -> Vec<u8> {
    let mut data = Vec::with_capacity(args.len() * 32);
    for arg in args {
        data.extend_from_slice(&arg.to_be_bytes::<32>());
    }
    data
}

/// ABI-encode a call: 4-byte selector followed by word-encoded arguments.
pub fn calldata_for(selector: [u8; 4], args: &[U256]) -> Vec<u8> {
    let mut data = selector.to_vec();
    data.extend(encode_words(args));
    data
}

pub struct EvmBuilder {
    db: InMemoryDB,
    bytecode: Vec<u8>,
    calldata: Vec<u8>,
    gas_limit: u64,
}

impl EvmBuilder {
    pub fn new() -> Self {
        Self { db: InMemoryDB::default(), bytecode: Vec::new(), calldata: Vec::new(), gas_limit: 10_000_000 }
    }

    pub fn with_bytecode(mut self, bytecode: Vec<u8>) -> Self {
        self.bytecode = bytecode;
        self
    }

    pub fn with_calldata(mut self, calldata: Vec<u8>) -> Self {
        self.calldata = calldata;
        self
    }

    pub fn build(mut self) -> Evm<'static, (), InMemoryDB> {
        self.db.insert_account_info(CONTRACT_ADDRESS, account_with_code(self.bytecode.clone()));

        self.db.insert_account_info(
            CALLER_ADDRESS,
            AccountInfo {
                balance: U256::from(1_000_000_000_000_000_000u64),
                nonce: 0,
                code_hash: revm::primitives::KECCAK_EMPTY,
                code: None,
            },
        );

        Evm::builder()
            .with_db(self.db)
            .modify_tx_env(|tx| {
                tx.caller = CALLER_ADDRESS;
                tx.transact_to = TransactTo::Call(CONTRACT_ADDRESS);
                tx.data = self.calldata.into();
                tx.gas_limit = self.gas_limit;
                tx.gas_price = U256::from(1);
                tx.value = U256::ZERO;
            })
            .build()
    }
}

fn account_with_code(code: Vec<u8>) -> AccountInfo {
    AccountInfo {
        balance: U256::ZERO,
        nonce: 0,
        code_hash: revm::primitives::keccak256(&code),
        code: Some(Bytecode::new_raw(code.into())),
    }
}

/// Install `runtime` as account code and call it.
pub fn execute_runtime_raw(runtime: Vec<u8>, calldata: Vec<u8>) -> ExecutionResult {
    let mut evm = EvmBuilder::new().with_bytecode(runtime).with_calldata(calldata).build();
    evm.transact_commit().expect("EVM transaction failed to commit")
}

/// Install `runtime` as account code, call it, and decode the first output
/// word.
pub fn execute_runtime(runtime: Vec<u8>, calldata: Vec<u8>) -> Result<U256, String> {
    result_word(execute_runtime_raw(runtime, calldata))
}

/// Assert the call halts via `STOP` without output (the selector's
/// no-match path).
pub fn expect_stop(runtime: Vec<u8>, calldata: Vec<u8>) {
    match execute_runtime_raw(runtime, calldata) {
        ExecutionResult::Success { reason: SuccessReason::Stop, output, .. } => {
            assert!(
                matches!(&output, Output::Call(bytes) if bytes.is_empty()),
                "expected empty output, got {output:?}"
            );
        }
        other => panic!("expected STOP, got {other:?}"),
    }
}

/// Simulate deployment of `creation` (with word-encoded constructor
/// arguments appended); returns the runtime image the creation code handed
/// back.
pub fn deploy(creation: &[u8], constructor_args: &[U256]) -> Vec<u8> {
    let mut image = creation.to_vec();
    image.extend(encode_words(constructor_args));
    let mut evm = EvmBuilder::new().with_bytecode(image).build();
    let result = evm.transact_commit().expect("deployment failed to commit");
    match result {
        ExecutionResult::Success { output: Output::Call(bytes), .. } => bytes.to_vec(),
        other => panic!("deployment did not return code: {other:?}"),
    }
}

/// Simulate deployment, install the returned runtime image over the same
/// account (constructor storage persists), and execute one call.
pub fn deploy_and_call(
    creation: &[u8],
    constructor_args: &[U256],
    calldata: Vec<u8>,
) -> Result<U256, String> {
    let mut image = creation.to_vec();
    image.extend(encode_words(constructor_args));
    let mut evm = EvmBuilder::new().with_bytecode(image).build();
    let result = evm.transact_commit().map_err(|e| format!("deployment error: {e:?}"))?;
    let runtime = match result {
        ExecutionResult::Success { output: Output::Call(bytes), .. } => bytes.to_vec(),
        other => return Err(format!("deployment did not return code: {other:?}")),
    };

    evm.context.evm.db.insert_account_info(CONTRACT_ADDRESS, account_with_code(runtime));
    let mut evm = evm
        .modify()
        .modify_tx_env(|tx| {
            tx.data = calldata.into();
        })
        .build();
    let result = evm.transact_commit().map_err(|e| format!("call error: {e:?}"))?;
    result_word(result)
}

fn result_word(result: ExecutionResult) -> Result<U256, String> {
    match result {
        ExecutionResult::Success { output, .. } => match output {
            Output::Call(bytes) => {
                if bytes.len() >= 32 {
                    Ok(U256::from_be_bytes::<32>(
                        bytes[0..32].try_into().expect("failed to convert bytes to array"),
                    ))
                } else {
                    Err("return data too small".to_string())
                }
            }
            _ => Err("unexpected output type".to_string()),
        },
        ExecutionResult::Revert { output, .. } => Err(format!("reverted: {output:?}")),
        ExecutionResult::Halt { reason, .. } => Err(format!("halted: {reason:?}")),
    }
}
