//! The interpreter engine: machine state, decoder, executor and cycle driver.
mod config;
mod execute;
mod font;
mod machine;
mod opcode;
mod runner;
mod types;

pub use config::*;
pub use font::*;
pub use machine::*;
pub use opcode::*;
pub use runner::*;
pub use types::*;
