//! This crate provides the small, mechanical transformations that the other crates in the
//! workspace share: turning tool parameters into command line arguments and sanitizing the output
//! of spawned processes.

pub mod arguments;
pub mod text;
