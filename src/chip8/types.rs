use crate::u4;

/// Outcome of executing a single instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Chip8Result {
    /// Continue executing instructions in the current frame.
    Continue,
    /// A sprite was drawn. With the display-wait quirk enabled the runner
    /// ends the current batch here.
    Drew,
    /// Fx0A armed the key wait, nothing more is fetched until a key press.
    WaitForKey,
}

/// Error types that can occur during CHIP-8 emulation.
///
/// None of these are fatal: the runner records them and carries on with the
/// next instruction.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Chip8Error {
    #[error("Program is too large ({size} bytes), max size is {max_size} bytes")]
    ProgramTooLarge { size: usize, max_size: usize },

    #[error("Unknown opcode: {opcode:#06X}")]
    UnknownOpcode { opcode: u16 },

    #[error("Stack overflow: call stack already holds {depth} return addresses")]
    StackOverflow { depth: usize },

    #[error("Stack underflow: attempted to return from a subroutine with empty call stack")]
    StackUnderflow,

    #[error("Memory access out of bounds at address {address:#06X}")]
    MemoryOutOfBounds { address: u16 },

    #[error("Write to reserved font memory at address {address:#06X}")]
    ReservedWrite { address: u16 },
}

/// Whether the machine is fetching instructions or parked on Fx0A.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running,
    /// The pressed key will be written to `register`.
    WaitingForKey { register: u4 },
}

/// A discrete key transition reported by the input front-end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyEvent {
    Down(u4),
    Up(u4),
}

pub const DISPLAY_X: usize = 64;
pub const DISPLAY_Y: usize = 32;
/// A type alias for the CHIP-8 display buffer representation (row-major).
pub type Display<T> = [[T; DISPLAY_X]; DISPLAY_Y];
