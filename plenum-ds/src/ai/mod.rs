//! Model-facing clients and response handling.

pub mod analysis;
pub mod extract;
pub mod facilitator;
