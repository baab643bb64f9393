// Library crate for integration tests.
// main.rs drives these modules from the terminal.

pub mod backend;
pub mod config;
pub mod conversation;
pub mod diagnostics;
pub mod error;
pub mod link_info;
pub mod probe;
pub mod settings;
