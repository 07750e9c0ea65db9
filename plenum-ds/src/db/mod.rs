//! Service-side database queries.

pub mod ideas;
pub mod participants;
pub mod topics;
