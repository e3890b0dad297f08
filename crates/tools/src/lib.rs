//! Session script replay for the `framesync` binary.

pub mod script;

pub use script::*;
