use std::collections::HashSet;

use super::commands::{BreakpointAction, Command, CommandError, CommandResult, SetTarget};
use crate::chip8::{Chip8Runner, Chip8RunnerResult, Display, MEMORY_SIZE, Opcode};

/// Largest address a 12-bit operand can name.
const ADDRESS_MAX: u16 = 0xFFF;

/// Drives a runner on behalf of the interactive debugger.
pub struct Executor {
    is_running: bool,
    runner: Chip8Runner,
    breakpoints: HashSet<u16>,
}

impl Executor {
    pub fn new(runner: Chip8Runner) -> Self {
        Self {
            is_running: false,
            runner,
            breakpoints: HashSet::new(),
        }
    }

    /// Advances the runner by `dt` while in running mode.
    ///
    /// Hitting a breakpoint or a guest error pauses execution.
    pub fn poll(&mut self, dt: f32) -> Chip8RunnerResult {
        if !self.is_running {
            return Chip8RunnerResult::Ok;
        }

        let result = self
            .runner
            .update_with_breakpoints(dt, Some(&self.breakpoints));

        if !matches!(result, Chip8RunnerResult::Ok) {
            self.is_running = false;
        }

        result
    }

    pub fn execute(&mut self, command: Command) -> Result<CommandResult, CommandError> {
        match command {
            Command::Run => {
                self.execute_run();
                Ok(CommandResult::Ok)
            }
            Command::Pause => {
                self.execute_pause();
                Ok(CommandResult::Ok)
            }
            Command::Step => self.execute_step(),
            Command::Breakpoint { action } => self.handle_breakpoint(action),
            Command::Set { target, value } => self.handle_set(target, value),
            Command::Mem { start, len } => self.handle_mem(start, len),
            Command::Disasm { start, count } => self.handle_disasm(start, count),
            Command::Errors => Ok(CommandResult::Errors {
                counts: *self.runner.error_counts(),
                last: self.runner.last_error().cloned(),
            }),
            Command::Quit => Ok(CommandResult::Quit),
        }
    }

    pub fn execute_run(&mut self) {
        self.is_running = true;
    }

    pub fn execute_pause(&mut self) {
        self.is_running = false;
    }

    pub fn execute_step(&mut self) -> Result<CommandResult, CommandError> {
        self.runner.step()?;
        Ok(CommandResult::Ok)
    }

    pub fn is_running(&self) -> bool {
        self.is_running
    }

    pub fn runner(&self) -> &Chip8Runner {
        &self.runner
    }

    pub fn get_display(&self) -> &Display<bool> {
        self.runner.display()
    }

    pub fn get_pc(&self) -> u16 {
        self.runner.chip8_ref().pc()
    }

    pub fn get_i(&self) -> u16 {
        self.runner.chip8_ref().index()
    }

    pub fn get_v(&self) -> &[u8; 16] {
        self.runner.chip8_ref().v()
    }

    pub fn get_stack(&self) -> &[u16] {
        self.runner.chip8_ref().stack()
    }

    pub fn get_delay_timer(&self) -> u8 {
        self.runner.chip8_ref().delay_timer()
    }

    pub fn get_sound_timer(&self) -> u8 {
        self.runner.chip8_ref().sound_timer()
    }

    pub fn get_keypad(&self) -> &[bool; 16] {
        self.runner.chip8_ref().keypad()
    }

    pub fn runner_mut(&mut self) -> &mut Chip8Runner {
        &mut self.runner
    }

    fn handle_breakpoint(
        &mut self,
        action: BreakpointAction,
    ) -> Result<CommandResult, CommandError> {
        match action {
            BreakpointAction::Set { addr } => {
                check_range(addr, ADDRESS_MAX)?;
                self.breakpoints.insert(addr);
            }
            BreakpointAction::Clear { addr } => {
                self.breakpoints.remove(&addr);
            }
            BreakpointAction::ClearAll => {
                self.breakpoints.clear();
            }
            BreakpointAction::List => {
                let mut breakpoints: Vec<u16> = self.breakpoints.iter().copied().collect();
                breakpoints.sort_unstable();
                return Ok(CommandResult::BreakpointList { breakpoints });
            }
        };

        Ok(CommandResult::Ok)
    }

    fn handle_set(&mut self, target: SetTarget, value: u16) -> Result<CommandResult, CommandError> {
        let chip8 = self.runner.chip8_mut();

        match target {
            SetTarget::V(reg) => {
                check_range(value, u8::MAX.into())?;
                chip8.v[reg] = value as u8;
            }
            SetTarget::I => {
                chip8.i = value;
            }
            SetTarget::Pc => {
                check_range(value, ADDRESS_MAX)?;
                chip8.pc = value;
            }
        }

        Ok(CommandResult::Ok)
    }

    fn handle_mem(&self, start: u16, len: u16) -> Result<CommandResult, CommandError> {
        check_range(start, ADDRESS_MAX)?;

        let start_idx = usize::from(start);
        let end = (start_idx + usize::from(len)).min(MEMORY_SIZE);

        Ok(CommandResult::MemDump {
            data: self.runner.chip8_ref().memory()[start_idx..end].to_vec(),
            offset: start,
        })
    }

    fn handle_disasm(&self, start: Option<u16>, count: u16) -> Result<CommandResult, CommandError> {
        let start = start.unwrap_or_else(|| self.get_pc());
        check_range(start, ADDRESS_MAX)?;

        let memory = self.runner.chip8_ref().memory();
        let instructions = (usize::from(start)..MEMORY_SIZE - 1)
            .step_by(2)
            .take(usize::from(count))
            .map(|addr| {
                let word = u16::from_be_bytes([memory[addr], memory[addr + 1]]);
                (addr as u16, word, Opcode::decode(word))
            })
            .collect();

        Ok(CommandResult::Disasm { instructions })
    }
}

fn check_range(value: u16, max: u16) -> Result<(), CommandError> {
    if value > max {
        return Err(CommandError::ValueOutOfRange { value, max });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        chip8::{Chip8Config, Chip8Error, ErrorCounts},
        u4,
    };

    fn executor_with(program: &[u8]) -> Executor {
        let runner = Chip8Runner::with_program(program, Chip8Config::default()).unwrap();
        Executor::new(runner)
    }

    #[test]
    fn test_step_and_set() {
        let mut executor = executor_with(&[0x6A, 0x05, 0x7A, 0x03]);

        executor.execute(Command::Step).unwrap();
        assert_eq!(executor.get_v()[0xA], 5);
        assert_eq!(executor.get_pc(), 0x202);

        executor
            .execute(Command::Set {
                target: SetTarget::V(u4::new(0xA)),
                value: 0x10,
            })
            .unwrap();
        executor.execute(Command::Step).unwrap();
        assert_eq!(executor.get_v()[0xA], 0x13);
    }

    #[test]
    fn test_set_out_of_range() {
        let mut executor = executor_with(&[]);

        assert!(matches!(
            executor.execute(Command::Set {
                target: SetTarget::V(u4::new(0)),
                value: 0x100,
            }),
            Err(CommandError::ValueOutOfRange { value: 0x100, .. })
        ));
        assert!(matches!(
            executor.execute(Command::Set {
                target: SetTarget::Pc,
                value: 0x1000,
            }),
            Err(CommandError::ValueOutOfRange { .. })
        ));
    }

    #[test]
    fn test_step_reports_guest_error() {
        let mut executor = executor_with(&[0x00, 0xEE]);

        assert!(matches!(
            executor.execute(Command::Step),
            Err(CommandError::Chip8Error(Chip8Error::StackUnderflow))
        ));
        assert!(matches!(
            executor.execute(Command::Errors),
            Ok(CommandResult::Errors {
                counts: ErrorCounts {
                    stack_underflow: 1,
                    ..
                },
                last: Some(Chip8Error::StackUnderflow),
            })
        ));
    }

    #[test]
    fn test_breakpoints() {
        // ADD V0, 1 three times, then loop
        let mut executor = executor_with(&[0x70, 0x01, 0x70, 0x01, 0x70, 0x01, 0x12, 0x06]);
        executor
            .execute(Command::Breakpoint {
                action: BreakpointAction::Set { addr: 0x204 },
            })
            .unwrap();
        executor
            .execute(Command::Breakpoint {
                action: BreakpointAction::Set { addr: 0x202 },
            })
            .unwrap();

        assert!(matches!(
            executor.execute(Command::Breakpoint {
                action: BreakpointAction::List
            }),
            Ok(CommandResult::BreakpointList { breakpoints }) if breakpoints == [0x202, 0x204]
        ));

        executor.execute(Command::Run).unwrap();
        assert_eq!(executor.poll(1.0), Chip8RunnerResult::HitBreakpoint);
        assert!(!executor.is_running());
        assert_eq!(executor.get_pc(), 0x202);
    }

    #[test]
    fn test_mem_and_disasm() {
        let mut executor = executor_with(&[0x00, 0xE0, 0xA2, 0xF0]);

        match executor.execute(Command::Mem { start: 0x200, len: 4 }).unwrap() {
            CommandResult::MemDump { data, offset } => {
                assert_eq!(offset, 0x200);
                assert_eq!(data, [0x00, 0xE0, 0xA2, 0xF0]);
            }
            other => panic!("unexpected result {other:?}"),
        }

        match executor
            .execute(Command::Disasm {
                start: None,
                count: 2,
            })
            .unwrap()
        {
            CommandResult::Disasm { instructions } => {
                assert_eq!(
                    instructions,
                    [
                        (0x200, 0x00E0, Opcode::ClearDisplay),
                        (0x202, 0xA2F0, Opcode::SetIndexImm { nnn: 0x2F0 }),
                    ]
                );
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn test_mem_clamps_to_end() {
        let mut executor = executor_with(&[]);

        match executor.execute(Command::Mem { start: 0xFFE, len: 16 }).unwrap() {
            CommandResult::MemDump { data, .. } => assert_eq!(data.len(), 2),
            other => panic!("unexpected result {other:?}"),
        }
    }
}
