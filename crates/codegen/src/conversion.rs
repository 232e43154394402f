//! Type conversions on the top-of-stack value.

use crate::context::CompilerContext;
use alloy_primitives::U256;
use covenant_ast::{Type, WORD_SIZE};
use evm_glue::opcodes::Opcode;

/// Emit code transforming the top-of-stack value from `from` to `to`.
///
/// Identical types convert for free unless `cleanup` is set, which forces
/// the canonical representation (higher-order bits that previous operations
/// were allowed to leave dirty are scrubbed).
pub fn append_type_conversion(ctx: &mut CompilerContext, from: &Type, to: &Type, cleanup: bool) {
    if from == to && !cleanup {
        return;
    }
    match (from, to) {
        (Type::Bool, Type::Bool) => {
            // canonicalize to 0 or 1
            ctx.append_op(Opcode::ISZERO);
            ctx.append_op(Opcode::ISZERO);
        }
        (Type::UInt(_) | Type::Int(_) | Type::Address | Type::Bool, Type::UInt(bits)) => {
            append_high_bits_cleanup(ctx, *bits);
        }
        (Type::UInt(_) | Type::Int(_) | Type::Bool, Type::Int(bits)) => {
            if *bits < 256 {
                // sign-extend from the target width's highest byte
                ctx.append_push(U256::from(*bits as usize / 8 - 1));
                ctx.append_op(Opcode::SIGNEXTEND);
            }
        }
        (Type::UInt(_) | Type::Address, Type::Address) => {
            append_high_bits_cleanup(ctx, 160);
        }
        (Type::String(from_len), Type::String(to_len)) => {
            if to_len < from_len || cleanup {
                // keep only the leading `to_len` bytes
                let mask = U256::MAX << ((WORD_SIZE - *to_len as usize) * 8);
                ctx.append_push(mask);
                ctx.append_op(Opcode::AND);
            }
        }
        _ => panic!("invalid type conversion from {from} to {to}"),
    }
}

/// Zero everything above the low `bits` bits.
fn append_high_bits_cleanup(ctx: &mut CompilerContext, bits: u16) {
    if bits == 256 {
        return;
    }
    let mask = (U256::from(1) << bits as usize) - U256::from(1);
    ctx.append_push(mask);
    ctx.append_op(Opcode::AND);
}
