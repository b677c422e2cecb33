use clap::{Parser, Subcommand};
use clap_num::maybe_hex;

use crate::{
    chip8::{Chip8Error, ErrorCounts, Opcode},
    u4,
};

#[derive(Parser)]
#[command(multicall = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Command {
    #[command(visible_alias = "r")]
    Run,

    #[command(visible_alias = "p")]
    Pause,

    #[command(visible_alias = "s")]
    Step,

    #[command(visible_alias = "b")]
    Breakpoint {
        #[command(subcommand)]
        action: BreakpointAction,
    },

    Set {
        #[arg(value_parser = parse_set_target)]
        target: SetTarget,
        #[arg(value_parser = maybe_hex::<u16>)]
        value: u16,
    },

    #[command(visible_alias = "m")]
    Mem {
        #[arg(default_value = "0x200", value_parser = maybe_hex::<u16>)]
        start: u16,
        #[arg(default_value = "64", value_parser = maybe_hex::<u16>)]
        len: u16,
    },

    /// Disassemble from the given address, PC by default
    #[command(visible_alias = "d")]
    Disasm {
        #[arg(value_parser = maybe_hex::<u16>)]
        start: Option<u16>,
        #[arg(default_value = "16", value_parser = maybe_hex::<u16>)]
        count: u16,
    },

    /// Show how many guest errors occurred so far
    #[command(visible_alias = "e")]
    Errors,

    #[command(visible_alias = "q")]
    Quit,
}

#[derive(Debug)]
pub enum CommandResult {
    Ok,
    BreakpointList {
        breakpoints: Vec<u16>,
    },
    MemDump {
        data: Vec<u8>,
        offset: u16,
    },
    /// Address, raw word and decoded form of each instruction.
    Disasm {
        instructions: Vec<(u16, u16, Opcode)>,
    },
    Errors {
        counts: ErrorCounts,
        last: Option<Chip8Error>,
    },
    Quit,
}

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("Error while executing cpu instruction: {0}")]
    Chip8Error(#[from] Chip8Error),
    #[error("Value {value:#X} out of range, max is {max:#X}")]
    ValueOutOfRange { value: u16, max: u16 },
}

#[derive(Subcommand, Clone, Debug)]
pub enum BreakpointAction {
    #[command(visible_alias = "s")]
    Set {
        #[arg(value_parser = maybe_hex::<u16>)]
        addr: u16,
    },

    #[command(visible_alias = "c")]
    Clear {
        #[arg(value_parser = maybe_hex::<u16>)]
        addr: u16,
    },

    #[command(visible_alias = "l")]
    List,

    #[command(visible_alias = "ca")]
    ClearAll,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SetTarget {
    V(u4),
    I,
    Pc,
}

fn parse_set_target(s: &str) -> Result<SetTarget, String> {
    let lower = s.to_lowercase();

    match lower.as_str() {
        "index" | "i" => Ok(SetTarget::I),
        "pc" => Ok(SetTarget::Pc),

        _ if lower.starts_with('v') => {
            let hex_str = &lower[1..];
            match u8::from_str_radix(hex_str, 16).ok().and_then(u4::try_new) {
                Some(reg) => Ok(SetTarget::V(reg)),
                None => Err(format!("Invalid register: '{}'", s)),
            }
        }

        _ => Err(format!("Unknown set target: '{}'", s)),
    }
}
