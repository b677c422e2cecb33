use std::ops::Range;

use rand::{SeedableRng, rngs::StdRng};

use super::{
    Chip8Error, Chip8Result, DISPLAY_X, DISPLAY_Y, Display, FONT, FONT_END_ADDRESS,
    FONT_START_ADDRESS, KeyEvent, Opcode, Quirks, RunState,
};
use crate::u4;

// Fixed by the CHIP-8 platform
pub const PROGRAM_START_ADDRESS: usize = 0x200;
pub const MEMORY_SIZE: usize = 4096;
pub const STACK_SIZE: usize = 16;

/// CHIP-8 virtual machine state
#[derive(Clone)]
pub struct Chip8 {
    /// 4KB memory array, font glyphs at the bottom
    pub(crate) memory: [u8; MEMORY_SIZE],
    /// Display buffer: 64x32 monochrome pixels
    pub(crate) display: Display<bool>,

    /// Program counter: address of the next instruction to execute
    pub(crate) pc: u16,
    /// Index register: used for memory operations
    pub(crate) i: u16,
    /// General-purpose registers V0-VF (VF is used as a flag register)
    pub(crate) v: [u8; 16],
    /// Call stack for subroutine returns, at most `STACK_SIZE` deep
    pub(crate) stack: Vec<u16>,

    /// Delay timer: decrements at 60Hz until it reaches 0
    pub(crate) delay_timer: u8,
    /// Sound timer: decrements at 60Hz, beeps while non-zero
    pub(crate) sound_timer: u8,

    /// Register that receives the next pressed key, set by Fx0A
    pub(crate) key_wait: Option<u4>,
    /// Keypad state: 16 keys mapped as booleans (true = held)
    pub(crate) keypad: [bool; 16],

    pub(crate) quirks: Quirks,
    pub(crate) rng: StdRng,
    /// Program image, kept so that `reset` can restore it
    program: Vec<u8>,
}

impl Chip8 {
    /// Creates a machine whose random source is seeded once from the OS.
    pub fn new(quirks: Quirks) -> Self {
        Self::with_rng(quirks, StdRng::from_os_rng())
    }

    /// Creates a machine with a deterministic random source.
    pub fn with_seed(quirks: Quirks, seed: u64) -> Self {
        Self::with_rng(quirks, StdRng::seed_from_u64(seed))
    }

    fn with_rng(quirks: Quirks, rng: StdRng) -> Self {
        let mut memory = [0; MEMORY_SIZE];
        memory[FONT_START_ADDRESS..FONT_END_ADDRESS].copy_from_slice(&FONT);

        Chip8 {
            memory,
            display: [[false; DISPLAY_X]; DISPLAY_Y],
            pc: PROGRAM_START_ADDRESS as u16,
            i: 0,
            v: [0; 16],
            stack: Vec::with_capacity(STACK_SIZE),
            delay_timer: 0,
            sound_timer: 0,
            key_wait: None,
            keypad: [false; 16],
            quirks,
            rng,
            program: Vec::new(),
        }
    }

    /// Copies a program image verbatim to 0x200 and points PC at it.
    pub fn load(&mut self, program: &[u8]) -> Result<(), Chip8Error> {
        let max_size = MEMORY_SIZE - PROGRAM_START_ADDRESS;
        if program.len() > max_size {
            return Err(Chip8Error::ProgramTooLarge {
                size: program.len(),
                max_size,
            });
        }

        self.program = program.to_vec();
        self.reset();

        log::debug!(
            "loaded {} byte program at {:#05X}",
            program.len(),
            PROGRAM_START_ADDRESS
        );
        Ok(())
    }

    /// Returns to the freshly constructed state with the last loaded program
    /// back in memory. Quirks and the random source are kept.
    pub fn reset(&mut self) {
        self.memory = [0; MEMORY_SIZE];
        self.memory[FONT_START_ADDRESS..FONT_END_ADDRESS].copy_from_slice(&FONT);
        let program_end = PROGRAM_START_ADDRESS + self.program.len();
        self.memory[PROGRAM_START_ADDRESS..program_end].copy_from_slice(&self.program);

        self.display = [[false; DISPLAY_X]; DISPLAY_Y];
        self.pc = PROGRAM_START_ADDRESS as u16;
        self.i = 0;
        self.v = [0; 16];
        self.stack.clear();
        self.delay_timer = 0;
        self.sound_timer = 0;
        self.key_wait = None;
        self.keypad = [false; 16];
    }

    /// Executes a single CPU cycle (fetch, decode, execute).
    ///
    /// PC moves past the fetched word before the instruction runs, so an
    /// instruction that fails still leaves PC advanced by 2. While waiting
    /// for a key nothing is fetched.
    pub fn cpu_cycle(&mut self) -> Result<Chip8Result, Chip8Error> {
        if self.key_wait.is_some() {
            return Ok(Chip8Result::WaitForKey);
        }

        let address = self.pc;
        let word = self.fetch()?;
        let opcode = Opcode::decode(word);
        log::trace!("{address:03X}: {word:04X} {opcode}");

        self.execute(opcode)
    }

    /// Updates the delay and sound timers. Should be called at 60Hz.
    pub fn timers_cycle(&mut self) {
        self.delay_timer = self.delay_timer.saturating_sub(1);
        self.sound_timer = self.sound_timer.saturating_sub(1);
    }

    /// Returns true if the sound timer is greater than zero, indicating a beep should be played.
    pub fn should_beep(&self) -> bool {
        self.sound_timer > 0
    }

    /// Applies a key transition to the keypad.
    ///
    /// A press of a key that was not already held resolves a pending Fx0A.
    pub fn handle_key_event(&mut self, event: KeyEvent) {
        match event {
            KeyEvent::Down(key) => {
                let was_pressed = std::mem::replace(&mut self.keypad[key], true);

                if !was_pressed && let Some(register) = self.key_wait.take() {
                    self.v[register] = key.get();
                    log::debug!("key {key} resolved wait into V{register}");
                }
            }
            KeyEvent::Up(key) => {
                self.keypad[key] = false;
            }
        }
    }

    /// Set the state of a key on the keypad.
    pub fn set_key(&mut self, key: u4, pressed: bool) {
        self.handle_key_event(if pressed {
            KeyEvent::Down(key)
        } else {
            KeyEvent::Up(key)
        });
    }

    pub fn run_state(&self) -> RunState {
        match self.key_wait {
            Some(register) => RunState::WaitingForKey { register },
            None => RunState::Running,
        }
    }

    pub fn display(&self) -> &Display<bool> {
        &self.display
    }

    pub fn memory(&self) -> &[u8; MEMORY_SIZE] {
        &self.memory
    }

    pub fn pc(&self) -> u16 {
        self.pc
    }

    pub fn index(&self) -> u16 {
        self.i
    }

    pub fn v(&self) -> &[u8; 16] {
        &self.v
    }

    pub fn stack(&self) -> &[u16] {
        &self.stack
    }

    pub fn delay_timer(&self) -> u8 {
        self.delay_timer
    }

    pub fn sound_timer(&self) -> u8 {
        self.sound_timer
    }

    pub fn keypad(&self) -> &[bool; 16] {
        &self.keypad
    }

    pub fn quirks(&self) -> &Quirks {
        &self.quirks
    }

    /// Fetches the next 16-bit opcode from memory and moves PC past it.
    fn fetch(&mut self) -> Result<u16, Chip8Error> {
        let address = self.pc;
        self.pc = self.pc.wrapping_add(2);

        let range = self.mem_range(address, 2)?;
        Ok(u16::from_be_bytes([
            self.memory[range.start],
            self.memory[range.start + 1],
        ]))
    }

    /// Bounds-checked memory range of `len` bytes starting at `start`.
    pub(crate) fn mem_range(&self, start: u16, len: usize) -> Result<Range<usize>, Chip8Error> {
        let start = usize::from(start);
        let end = start + len;

        if end > MEMORY_SIZE {
            return Err(Chip8Error::MemoryOutOfBounds {
                address: start.max(MEMORY_SIZE) as u16,
            });
        }

        Ok(start..end)
    }

    /// Like `mem_range`, but also rejects ranges touching the font region.
    pub(crate) fn writable_range(
        &self,
        start: u16,
        len: usize,
    ) -> Result<Range<usize>, Chip8Error> {
        let range = self.mem_range(start, len)?;

        if len > 0 && range.start < FONT_END_ADDRESS {
            return Err(Chip8Error::ReservedWrite { address: start });
        }

        Ok(range)
    }
}

impl Default for Chip8 {
    fn default() -> Self {
        Self::new(Quirks::default())
    }
}
