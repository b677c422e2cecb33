//! A CHIP-8 virtual machine.
//!
//! [`chip8`] holds the interpreter engine, [`debugger`] a small command
//! language for inspecting a running machine. Windowing, key mapping and
//! file loading live in the binaries.
pub mod chip8;
pub mod debugger;
mod nibble;

pub use nibble::u4;
