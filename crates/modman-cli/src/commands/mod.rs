//! CLI command implementations

pub mod hash;
pub mod inspect;
pub mod order;
pub mod run;
