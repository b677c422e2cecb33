use rand::Rng;

use super::{
    Chip8, Chip8Error, Chip8Result, DISPLAY_X, DISPLAY_Y, Opcode, OpcodeALU, STACK_SIZE,
    glyph_address,
};
use crate::u4;

impl Chip8 {
    /// Applies one decoded instruction.
    ///
    /// PC already points past the instruction; jumps, calls, returns and
    /// skips overwrite or advance it further. Failed instructions leave the
    /// machine untouched apart from that default advance.
    pub(crate) fn execute(&mut self, opcode: Opcode) -> Result<Chip8Result, Chip8Error> {
        match opcode {
            Opcode::ClearDisplay => {
                self.display.iter_mut().for_each(|row| row.fill(false));
            }
            Opcode::Jump { nnn } => {
                self.pc = nnn;
            }
            Opcode::JumpWithOffset { nnn } => {
                self.pc = nnn.wrapping_add(self.v[0].into());
            }
            Opcode::Call { nnn } => {
                if self.stack.len() >= STACK_SIZE {
                    return Err(Chip8Error::StackOverflow {
                        depth: self.stack.len(),
                    });
                }
                self.stack.push(self.pc);
                self.pc = nnn;
            }
            Opcode::Return => {
                self.pc = self.stack.pop().ok_or(Chip8Error::StackUnderflow)?;
            }
            Opcode::SkipRegEqualImm { x, nn } => {
                self.skip_if(self.v[x] == nn);
            }
            Opcode::SkipRegNotEqualImm { x, nn } => {
                self.skip_if(self.v[x] != nn);
            }
            Opcode::SkipRegEqualReg { x, y } => {
                self.skip_if(self.v[x] == self.v[y]);
            }
            Opcode::SkipRegNotEqualReg { x, y } => {
                self.skip_if(self.v[x] != self.v[y]);
            }
            Opcode::SetRegImm { x, nn } => {
                self.v[x] = nn;
            }
            Opcode::AddRegImm { x, nn } => {
                self.v[x] = self.v[x].wrapping_add(nn);
            }
            Opcode::ALU { x, y, op } => {
                self.execute_alu(x, y, op);
            }
            Opcode::Random { x, nn } => {
                let rand_byte: u8 = self.rng.random();
                self.v[x] = rand_byte & nn;
            }
            Opcode::SetIndexImm { nnn } => {
                self.i = nnn;
            }
            Opcode::AddIndexReg { x } => {
                self.i = self.i.wrapping_add(self.v[x].into());
            }
            Opcode::Draw { x, y, n } => {
                return self.execute_draw(x, y, n);
            }
            Opcode::SkipIfPressed { x } => {
                self.skip_if(self.keypad[u4::from_low_bits(self.v[x])]);
            }
            Opcode::SkipIfNotPressed { x } => {
                self.skip_if(!self.keypad[u4::from_low_bits(self.v[x])]);
            }
            Opcode::WaitForKey { x } => {
                self.key_wait = Some(x);
                return Ok(Chip8Result::WaitForKey);
            }
            Opcode::ReadDelayTimer { x } => {
                self.v[x] = self.delay_timer;
            }
            Opcode::SetDelayTimer { x } => {
                self.delay_timer = self.v[x];
            }
            Opcode::SetSoundTimer { x } => {
                self.sound_timer = self.v[x];
            }
            Opcode::FontChar { x } => {
                self.i = glyph_address(self.v[x]);
            }
            Opcode::BCD { x } => {
                let value = self.v[x];
                let range = self.writable_range(self.i, 3)?;
                self.memory[range].copy_from_slice(&[value / 100, (value / 10) % 10, value % 10]);
            }
            Opcode::StoreRegs { x } => {
                let count = usize::from(x) + 1;
                let range = self.writable_range(self.i, count)?;
                self.memory[range].copy_from_slice(&self.v[..count]);
                self.advance_index_after_transfer(count);
            }
            Opcode::LoadRegs { x } => {
                let count = usize::from(x) + 1;
                let range = self.mem_range(self.i, count)?;
                self.v[..count].copy_from_slice(&self.memory[range]);
                self.advance_index_after_transfer(count);
            }
            Opcode::Unknown(opcode) => {
                return Err(Chip8Error::UnknownOpcode { opcode });
            }
        };

        Ok(Chip8Result::Continue)
    }

    fn skip_if(&mut self, condition: bool) {
        if condition {
            self.pc = self.pc.wrapping_add(2);
        }
    }

    fn advance_index_after_transfer(&mut self, count: usize) {
        if self.quirks.load_store_increments_index {
            self.i = self.i.wrapping_add(count as u16);
        }
    }

    /// VF is always written after the result, so it holds the flag even
    /// when `x` is 0xF.
    fn execute_alu(&mut self, x: u4, y: u4, op: OpcodeALU) {
        match op {
            OpcodeALU::Set => self.v[x] = self.v[y],
            OpcodeALU::Or => {
                self.v[x] |= self.v[y];
                self.reset_flag_after_logic();
            }
            OpcodeALU::And => {
                self.v[x] &= self.v[y];
                self.reset_flag_after_logic();
            }
            OpcodeALU::Xor => {
                self.v[x] ^= self.v[y];
                self.reset_flag_after_logic();
            }
            OpcodeALU::Add => {
                let (res, overflow) = self.v[x].overflowing_add(self.v[y]);
                self.v[x] = res;
                self.v[0xF] = u8::from(overflow);
            }
            OpcodeALU::Sub => {
                let (res, borrow) = self.v[x].overflowing_sub(self.v[y]);
                self.v[x] = res;
                self.v[0xF] = u8::from(!borrow); // Notice that borrow is inverted
            }
            OpcodeALU::SubReverse => {
                let (res, borrow) = self.v[y].overflowing_sub(self.v[x]);
                self.v[x] = res;
                self.v[0xF] = u8::from(!borrow);
            }
            OpcodeALU::ShiftRight => {
                let lsb = self.v[y] & 1;
                self.v[x] = self.v[y] >> 1;
                self.v[0xF] = lsb;
            }
            OpcodeALU::ShiftLeft => {
                let msb = (self.v[y] >> 7) & 1;
                self.v[x] = self.v[y] << 1;
                self.v[0xF] = msb;
            }
        }
    }

    fn reset_flag_after_logic(&mut self) {
        if self.quirks.logic_resets_flag {
            self.v[0xF] = 0;
        }
    }

    /// XORs an `n`-row sprite from `I` onto the display at (Vx, Vy).
    ///
    /// Both axes wrap around the screen edges. VF is set once, to 1 if any
    /// lit pixel was turned off.
    fn execute_draw(&mut self, x: u4, y: u4, n: u4) -> Result<Chip8Result, Chip8Error> {
        let x_pos = self.v[x] as usize % DISPLAY_X;
        let y_pos = self.v[y] as usize % DISPLAY_Y;

        let rows = usize::from(n);
        let mut sprite = [0u8; 15];
        let range = self.mem_range(self.i, rows)?;
        sprite[..rows].copy_from_slice(&self.memory[range]);

        let mut any_erased = false;
        for (row, sprite_byte) in sprite[..rows].iter().enumerate() {
            let py = (y_pos + row) % DISPLAY_Y;

            for col in 0..8 {
                // If current sprite bit is non-zero
                if (sprite_byte & (0x80 >> col)) != 0 {
                    let pixel = &mut self.display[py][(x_pos + col) % DISPLAY_X];

                    // Flip the pixel
                    *pixel ^= true;

                    if !*pixel {
                        any_erased = true;
                    }
                }
            }
        }

        self.v[0xF] = u8::from(any_erased);
        Ok(Chip8Result::Drew)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chip8::{FONT, Quirks, RunState};

    /// Machine with `words` loaded at 0x200.
    fn machine_with(words: &[u16]) -> Chip8 {
        machine_with_quirks(words, Quirks::default())
    }

    fn machine_with_quirks(words: &[u16], quirks: Quirks) -> Chip8 {
        let program: Vec<u8> = words.iter().flat_map(|w| w.to_be_bytes()).collect();
        let mut chip8 = Chip8::with_seed(quirks, 7);
        chip8.load(&program).unwrap();
        chip8
    }

    fn run(chip8: &mut Chip8, cycles: usize) {
        for _ in 0..cycles {
            chip8.cpu_cycle().unwrap();
        }
    }

    #[test]
    fn test_jump() {
        let mut chip8 = machine_with(&[0x1234]);
        run(&mut chip8, 1);
        assert_eq!(chip8.pc(), 0x234);
    }

    #[test]
    fn test_jump_with_offset() {
        let mut chip8 = machine_with(&[0x6004, 0xB300]);
        run(&mut chip8, 2);
        assert_eq!(chip8.pc(), 0x304);
    }

    #[test]
    fn test_call_and_return() {
        // 0x200: CALL 0x206, 0x202: LD V1, 1, 0x206: RET
        let mut chip8 = machine_with(&[0x2206, 0x6101, 0x0000, 0x00EE]);

        run(&mut chip8, 1);
        assert_eq!(chip8.pc(), 0x206);
        assert_eq!(chip8.stack(), &[0x202]);

        run(&mut chip8, 2);
        assert!(chip8.stack().is_empty());
        assert_eq!(chip8.v()[1], 1);
        assert_eq!(chip8.pc(), 0x204);
    }

    #[test]
    fn test_stack_overflow() {
        // Calls itself forever
        let mut chip8 = machine_with(&[0x2200]);
        run(&mut chip8, STACK_SIZE);
        assert_eq!(chip8.stack().len(), STACK_SIZE);

        assert_eq!(
            chip8.cpu_cycle(),
            Err(Chip8Error::StackOverflow { depth: STACK_SIZE })
        );
        assert_eq!(chip8.stack().len(), STACK_SIZE);
        assert_eq!(chip8.pc(), 0x202);
    }

    #[test]
    fn test_stack_underflow() {
        let mut chip8 = machine_with(&[0x00EE]);
        assert_eq!(chip8.cpu_cycle(), Err(Chip8Error::StackUnderflow));
        assert_eq!(chip8.pc(), 0x202);
    }

    #[test]
    fn test_skips() {
        let cases: [(&[u16], u16); 8] = [
            (&[0x6142, 0x3142], 0x206),
            (&[0x6142, 0x3143], 0x204),
            (&[0x6142, 0x4143], 0x206),
            (&[0x6142, 0x4142], 0x204),
            (&[0x6142, 0x6242, 0x5120], 0x208),
            (&[0x6142, 0x6243, 0x5120], 0x206),
            (&[0x6142, 0x6243, 0x9120], 0x208),
            (&[0x6142, 0x6242, 0x9120], 0x206),
        ];

        for (program, expected_pc) in cases {
            let mut chip8 = machine_with(program);
            run(&mut chip8, program.len());
            assert_eq!(chip8.pc(), expected_pc, "program {program:04X?}");
        }
    }

    #[test]
    fn test_add_immediate_wraps_without_flag() {
        let mut chip8 = machine_with(&[0x61FF, 0x7102]);
        run(&mut chip8, 2);
        assert_eq!(chip8.v()[1], 0x01);
        assert_eq!(chip8.v()[0xF], 0);
    }

    #[test]
    fn test_logic_ops() {
        let mut chip8 = machine_with(&[0x6F05, 0x610C, 0x620A, 0x8121]);
        run(&mut chip8, 4);
        assert_eq!(chip8.v()[1], 0x0E);
        assert_eq!(chip8.v()[0xF], 5);

        let mut chip8 = machine_with(&[0x610C, 0x620A, 0x8122]);
        run(&mut chip8, 3);
        assert_eq!(chip8.v()[1], 0x08);

        let mut chip8 = machine_with(&[0x610C, 0x620A, 0x8123]);
        run(&mut chip8, 3);
        assert_eq!(chip8.v()[1], 0x06);
    }

    #[test]
    fn test_logic_resets_flag_quirk() {
        let quirks = Quirks {
            logic_resets_flag: true,
            ..Quirks::default()
        };
        let mut chip8 = machine_with_quirks(&[0x6F05, 0x610C, 0x620A, 0x8121], quirks);
        run(&mut chip8, 4);
        assert_eq!(chip8.v()[0xF], 0);
    }

    #[test]
    fn test_add_with_carry() {
        let mut chip8 = machine_with(&[0x61F0, 0x6220, 0x8124]);
        run(&mut chip8, 3);
        assert_eq!(chip8.v()[1], 0x10);
        assert_eq!(chip8.v()[0xF], 1);
    }

    #[test]
    fn test_flag_written_after_result() {
        // ADD VF, V1 with carry: VF ends up holding the flag, not the sum
        let mut chip8 = machine_with(&[0x6FF0, 0x6120, 0x8F14]);
        run(&mut chip8, 3);
        assert_eq!(chip8.v()[0xF], 1);
    }

    #[test]
    fn test_sub_and_sub_reverse() {
        let mut chip8 = machine_with(&[0x6105, 0x6205, 0x8125]);
        run(&mut chip8, 3);
        assert_eq!(chip8.v()[1], 0);
        assert_eq!(chip8.v()[0xF], 1);

        let mut chip8 = machine_with(&[0x6105, 0x6206, 0x8125]);
        run(&mut chip8, 3);
        assert_eq!(chip8.v()[1], 0xFF);
        assert_eq!(chip8.v()[0xF], 0);

        let mut chip8 = machine_with(&[0x6105, 0x6206, 0x8127]);
        run(&mut chip8, 3);
        assert_eq!(chip8.v()[1], 1);
        assert_eq!(chip8.v()[0xF], 1);
    }

    #[test]
    fn test_shifts_read_vy() {
        let mut chip8 = machine_with(&[0x6100, 0x6281, 0x8126]);
        run(&mut chip8, 3);
        assert_eq!(chip8.v()[1], 0x40);
        assert_eq!(chip8.v()[0xF], 1);

        let mut chip8 = machine_with(&[0x6100, 0x6281, 0x812E]);
        run(&mut chip8, 3);
        assert_eq!(chip8.v()[1], 0x02);
        assert_eq!(chip8.v()[0xF], 1);
    }

    #[test]
    fn test_index_ops() {
        let mut chip8 = machine_with(&[0xA123, 0x6110, 0xF11E]);
        run(&mut chip8, 3);
        assert_eq!(chip8.index(), 0x133);

        let mut chip8 = machine_with(&[0x61AB, 0xF129]);
        run(&mut chip8, 2);
        assert_eq!(chip8.index(), 5 * 0xB);
    }

    #[test]
    fn test_random_is_masked() {
        let mut chip8 = machine_with(&[0xC10F, 0xC200]);
        run(&mut chip8, 2);
        assert_eq!(chip8.v()[1] & 0xF0, 0);
        assert_eq!(chip8.v()[2], 0);
    }

    #[test]
    fn test_random_is_seeded_per_machine() {
        let program = [0xC1FF, 0xC2FF, 0xC3FF, 0xC4FF];
        let mut a = machine_with(&program);
        let mut b = machine_with(&program);
        run(&mut a, 4);
        run(&mut b, 4);
        assert_eq!(a.v(), b.v());
    }

    #[test]
    fn test_bcd() {
        let mut chip8 = machine_with(&[0x619D, 0xA300, 0xF133]);
        run(&mut chip8, 3);
        assert_eq!(&chip8.memory()[0x300..0x303], &[1, 5, 7]);
    }

    #[test]
    fn test_bcd_into_font_is_rejected() {
        let mut chip8 = machine_with(&[0x619D, 0xA010, 0xF133]);
        run(&mut chip8, 2);
        assert_eq!(
            chip8.cpu_cycle(),
            Err(Chip8Error::ReservedWrite { address: 0x010 })
        );
        assert_eq!(&chip8.memory()[..FONT.len()], &FONT);
    }

    #[test]
    fn test_store_and_load_registers() {
        let mut chip8 = machine_with(&[0x6011, 0x6122, 0x6233, 0xA300, 0xF255]);
        run(&mut chip8, 5);
        assert_eq!(&chip8.memory()[0x300..0x304], &[0x11, 0x22, 0x33, 0x00]);
        assert_eq!(chip8.index(), 0x303);

        let mut chip8 = machine_with(&[0xA208, 0xF165, 0x0000, 0x0000, 0xABCD]);
        run(&mut chip8, 2);
        assert_eq!(&chip8.v()[..3], &[0xAB, 0xCD, 0x00]);
        assert_eq!(chip8.index(), 0x20A);
    }

    #[test]
    fn test_store_into_font_is_rejected() {
        // Four registers from 0x04E would end at 0x051, across the font's end
        let mut chip8 = machine_with(&[0x6011, 0xA04E, 0xF355]);
        run(&mut chip8, 2);
        assert_eq!(
            chip8.cpu_cycle(),
            Err(Chip8Error::ReservedWrite { address: 0x04E })
        );
        assert_eq!(&chip8.memory()[..FONT.len()], &FONT);
        assert_eq!(chip8.memory()[0x050], 0);
        assert_eq!(chip8.index(), 0x04E);
    }

    #[test]
    fn test_store_without_index_increment() {
        let quirks = Quirks {
            load_store_increments_index: false,
            ..Quirks::default()
        };
        let mut chip8 = machine_with_quirks(&[0x6011, 0xA300, 0xF055], quirks);
        run(&mut chip8, 3);
        assert_eq!(chip8.memory()[0x300], 0x11);
        assert_eq!(chip8.index(), 0x300);
    }

    #[test]
    fn test_load_past_end_of_memory() {
        let mut chip8 = machine_with(&[0xAFFE, 0xF265]);
        run(&mut chip8, 1);
        assert_eq!(
            chip8.cpu_cycle(),
            Err(Chip8Error::MemoryOutOfBounds { address: 0x1000 })
        );
        assert_eq!(chip8.index(), 0xFFE);
    }

    #[test]
    fn test_draw_font_glyph() {
        // Draw glyph "0" at (0, 0)
        let mut chip8 = machine_with(&[0x6000, 0xF029, 0xD005]);
        run(&mut chip8, 3);

        let rows: Vec<String> = chip8.display()[..5]
            .iter()
            .map(|row| row[..4].iter().map(|&p| if p { '#' } else { '.' }).collect())
            .collect();
        assert_eq!(rows, ["####", "#..#", "#..#", "#..#", "####"]);
        assert_eq!(chip8.v()[0xF], 0);
    }

    #[test]
    fn test_draw_wraps_both_axes() {
        // 0xFF row drawn at (60, 31) spills onto x 0-3 and, with two rows, y 0
        let mut chip8 = machine_with(&[0x603C, 0x611F, 0xA300, 0xD012]);
        chip8.memory[0x300] = 0xFF;
        chip8.memory[0x301] = 0x80;
        run(&mut chip8, 4);

        let display = chip8.display();
        assert!((60..64).all(|x| display[31][x]));
        assert!((0..4).all(|x| display[31][x]));
        assert!(!display[31][4]);
        assert!(display[0][60]);
        assert!(!display[0][61]);
    }

    #[test]
    fn test_draw_collision() {
        let mut chip8 = machine_with(&[0xF029, 0xD005, 0xD005]);
        run(&mut chip8, 2);
        assert_eq!(chip8.v()[0xF], 0);

        run(&mut chip8, 1);
        assert_eq!(chip8.v()[0xF], 1);
        assert!(chip8.display().iter().flatten().all(|pixel| !pixel));
    }

    #[test]
    fn test_draw_past_end_of_memory() {
        // 15 rows from 0xFFC run off the end; nothing is drawn and VF keeps its value
        let mut chip8 = machine_with(&[0x6F07, 0xAFFC, 0xD00F]);
        chip8.memory[0xFFC..].fill(0xFF);
        run(&mut chip8, 2);

        assert_eq!(
            chip8.cpu_cycle(),
            Err(Chip8Error::MemoryOutOfBounds { address: 0x1000 })
        );
        assert!(chip8.display().iter().flatten().all(|pixel| !pixel));
        assert_eq!(chip8.v()[0xF], 7);
        assert_eq!(chip8.pc(), 0x206);
    }

    #[test]
    fn test_clear_display() {
        let mut chip8 = machine_with(&[0xF029, 0xD005, 0x00E0]);
        run(&mut chip8, 2);
        assert!(chip8.display().iter().flatten().any(|&pixel| pixel));

        run(&mut chip8, 1);
        assert!(chip8.display().iter().flatten().all(|pixel| !pixel));
    }

    #[test]
    fn test_key_skips() {
        let mut chip8 = machine_with(&[0x6107, 0xE19E]);
        chip8.set_key(u4::new(7), true);
        run(&mut chip8, 2);
        assert_eq!(chip8.pc(), 0x206);

        let mut chip8 = machine_with(&[0x6107, 0xE1A1]);
        run(&mut chip8, 2);
        assert_eq!(chip8.pc(), 0x206);

        let mut chip8 = machine_with(&[0x6107, 0xE1A1]);
        chip8.set_key(u4::new(7), true);
        run(&mut chip8, 2);
        assert_eq!(chip8.pc(), 0x204);
    }

    #[test]
    fn test_wait_for_key_blocks_fetch() {
        let mut chip8 = machine_with(&[0xF30A, 0x6101]);

        assert_eq!(chip8.cpu_cycle(), Ok(Chip8Result::WaitForKey));
        assert_eq!(
            chip8.run_state(),
            RunState::WaitingForKey {
                register: u4::new(3)
            }
        );
        assert_eq!(chip8.pc(), 0x202);

        // Nothing is fetched while waiting
        assert_eq!(chip8.cpu_cycle(), Ok(Chip8Result::WaitForKey));
        assert_eq!(chip8.pc(), 0x202);

        chip8.set_key(u4::new(0xB), true);
        assert_eq!(chip8.v()[3], 0xB);
        run(&mut chip8, 1);
        assert_eq!(chip8.v()[1], 1);
    }

    #[test]
    fn test_timer_registers() {
        let mut chip8 = machine_with(&[0x6120, 0xF115, 0xF118, 0xF207]);
        run(&mut chip8, 3);
        assert_eq!(chip8.delay_timer(), 0x20);
        assert_eq!(chip8.sound_timer(), 0x20);

        chip8.timers_cycle();
        run(&mut chip8, 1);
        assert_eq!(chip8.v()[2], 0x1F);
    }

    #[test]
    fn test_unknown_opcode() {
        let mut chip8 = machine_with(&[0x812F]);
        assert_eq!(
            chip8.cpu_cycle(),
            Err(Chip8Error::UnknownOpcode { opcode: 0x812F })
        );
        assert_eq!(chip8.pc(), 0x202);
    }
}
