//! Structural verifiers for parsed classfiles
//!
//! Checks that every constant pool reference reachable from the class
//! structure is in bounds and has the expected tag, before the patcher
//! starts resolving names through it.

mod verifier;
pub mod constant_pool;

pub use verifier::verify;
