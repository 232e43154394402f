pub mod builders;

pub use builders::{
    calldata_for, compile, compile_with_subcontracts, deploy, deploy_and_call, encode_words,
    execute_runtime, execute_runtime_raw, expect_stop, selector, EvmBuilder,
};
