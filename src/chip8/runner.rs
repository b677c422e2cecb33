use std::collections::{HashSet, VecDeque};

use super::{
    Chip8, Chip8Config, Chip8Error, Chip8Result, Display, KeyEvent, RunState,
};
use crate::u4;

/// Upper bound on frames replayed by one `update` after a long stall.
const MAX_CATCH_UP_FRAMES: f32 = 4.0;

/// High-level emulator runner that manages timing internally.
///
/// Each tick drains queued key events, runs up to one frame's instruction
/// budget, then decrements the timers once.
pub struct Chip8Runner {
    chip8: Chip8,
    config: Chip8Config,
    frame_dt_accumulator: f32,
    events: VecDeque<KeyEvent>,
    error_counts: ErrorCounts,
    last_error: Option<Chip8Error>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Chip8RunnerResult {
    Ok,
    HitBreakpoint,
    /// At least one instruction failed; execution carried on past it.
    /// Holds the most recent error.
    Faulted(Chip8Error),
}

/// What happened during a single tick.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    /// Instructions fetched and executed, including failed ones.
    pub executed: usize,
    pub errors: Vec<Chip8Error>,
    pub hit_breakpoint: bool,
}

/// Running totals of guest errors, per kind.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ErrorCounts {
    pub unknown_opcode: usize,
    pub stack_overflow: usize,
    pub stack_underflow: usize,
    pub memory_out_of_bounds: usize,
    pub reserved_write: usize,
}

impl ErrorCounts {
    /// Counts an instruction error. Load failures never reach a running
    /// machine and are not counted.
    pub fn record(&mut self, error: &Chip8Error) {
        let counter = match error {
            Chip8Error::ProgramTooLarge { .. } => return,
            Chip8Error::UnknownOpcode { .. } => &mut self.unknown_opcode,
            Chip8Error::StackOverflow { .. } => &mut self.stack_overflow,
            Chip8Error::StackUnderflow => &mut self.stack_underflow,
            Chip8Error::MemoryOutOfBounds { .. } => &mut self.memory_out_of_bounds,
            Chip8Error::ReservedWrite { .. } => &mut self.reserved_write,
        };
        *counter += 1;
    }

    pub fn total(&self) -> usize {
        self.unknown_opcode
            + self.stack_overflow
            + self.stack_underflow
            + self.memory_out_of_bounds
            + self.reserved_write
    }
}

impl Chip8Runner {
    /// Wraps an existing machine. The config's quirks replace whatever the
    /// machine was built with, so `config()` always describes its behavior.
    pub fn new(mut chip8: Chip8, config: Chip8Config) -> Self {
        chip8.quirks = config.quirks;

        log::debug!(
            "runner at {} Hz / {} fps, {} instructions per frame, {:?}",
            config.cpu_hz,
            config.frame_hz,
            config.instructions_per_frame(),
            config.quirks,
        );

        Self {
            chip8,
            config,
            frame_dt_accumulator: 0.0,
            events: VecDeque::new(),
            error_counts: ErrorCounts::default(),
            last_error: None,
        }
    }

    /// Builds a machine with the config's quirks and loads `program` into it.
    pub fn with_program(program: &[u8], config: Chip8Config) -> Result<Self, Chip8Error> {
        let mut chip8 = Chip8::new(config.quirks);
        chip8.load(program)?;
        Ok(Self::new(chip8, config))
    }

    /// Update emulator by delta time.
    ///
    /// Runs one tick per elapsed frame period, replaying at most a few frames
    /// if the caller stalled.
    pub fn update(&mut self, dt: f32) -> Chip8RunnerResult {
        self.update_with_breakpoints(dt, None)
    }

    /// Like `update` but stops as soon as PC lands on a breakpoint.
    pub fn update_with_breakpoints(
        &mut self,
        dt: f32,
        breakpoints: Option<&HashSet<u16>>,
    ) -> Chip8RunnerResult {
        let time_step = self.config.frame_time_step();
        self.frame_dt_accumulator =
            (self.frame_dt_accumulator + dt).min(time_step * MAX_CATCH_UP_FRAMES);

        let mut result = Chip8RunnerResult::Ok;
        while self.frame_dt_accumulator >= time_step {
            self.frame_dt_accumulator -= time_step;

            let report = self.tick_with_breakpoints(breakpoints);

            if report.hit_breakpoint {
                // Don't replay the rest of the backlog once the user resumes
                self.frame_dt_accumulator = 0.0;
                return Chip8RunnerResult::HitBreakpoint;
            }
            if let Some(error) = report.errors.last() {
                result = Chip8RunnerResult::Faulted(error.clone());
            }
        }

        result
    }

    /// Runs exactly one frame tick.
    pub fn tick(&mut self) -> TickReport {
        self.tick_with_breakpoints(None)
    }

    pub fn tick_with_breakpoints(&mut self, breakpoints: Option<&HashSet<u16>>) -> TickReport {
        self.apply_events();

        let mut report = TickReport::default();
        let display_wait = self.config.quirks.display_wait;

        for _ in 0..self.config.instructions_per_frame() {
            // Checked before every fetch, so Fx0A itself runs exactly once
            if self.chip8.run_state() != RunState::Running {
                break;
            }

            let result = self.chip8.cpu_cycle();
            report.executed += 1;

            let drew = match result {
                Ok(result) => result == Chip8Result::Drew,
                Err(error) => {
                    self.record_error(error.clone());
                    report.errors.push(error);
                    false
                }
            };

            if let Some(breakpoints) = breakpoints
                && breakpoints.contains(&self.chip8.pc)
            {
                report.hit_breakpoint = true;
                break;
            }

            if drew && display_wait {
                break;
            }
        }

        self.chip8.timers_cycle();
        report
    }

    /// Executes a single instruction without advancing the timers.
    ///
    /// Does nothing but report `WaitForKey` while a key wait is pending.
    pub fn step(&mut self) -> Result<Chip8Result, Chip8Error> {
        self.apply_events();

        self.chip8.cpu_cycle().inspect_err(|error| {
            self.record_error(error.clone());
        })
    }

    /// Queues a key transition; it takes effect at the start of the next
    /// tick or step.
    pub fn queue_event(&mut self, event: KeyEvent) {
        self.events.push_back(event);
    }

    /// Set the state of a key on the keypad.
    pub fn set_key(&mut self, key: u4, pressed: bool) {
        self.queue_event(if pressed {
            KeyEvent::Down(key)
        } else {
            KeyEvent::Up(key)
        });
    }

    /// Returns true if the sound timer is active, indicating a beep should be played.
    pub fn should_beep(&self) -> bool {
        self.chip8.should_beep()
    }

    /// Framebuffer as of the end of the last tick.
    pub fn display(&self) -> &Display<bool> {
        self.chip8.display()
    }

    pub fn run_state(&self) -> RunState {
        self.chip8.run_state()
    }

    pub fn config(&self) -> &Chip8Config {
        &self.config
    }

    pub fn error_counts(&self) -> &ErrorCounts {
        &self.error_counts
    }

    pub fn last_error(&self) -> Option<&Chip8Error> {
        self.last_error.as_ref()
    }

    pub fn chip8_ref(&self) -> &Chip8 {
        &self.chip8
    }

    pub fn chip8_mut(&mut self) -> &mut Chip8 {
        &mut self.chip8
    }

    fn apply_events(&mut self) {
        while let Some(event) = self.events.pop_front() {
            self.chip8.handle_key_event(event);
        }
    }

    fn record_error(&mut self, error: Chip8Error) {
        log::warn!(
            "{error} (next instruction at {:#05X})",
            self.chip8.pc
        );
        self.error_counts.record(&error);
        self.last_error = Some(error);
    }
}
