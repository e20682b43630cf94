//! Subcommand implementations.

pub mod catalog;
pub mod convert;
pub mod inspect;
pub mod status;
pub mod validate;
pub mod worker;
