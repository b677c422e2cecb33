use chip8_vm::chip8::{Chip8, Quirks};
use proptest::prelude::*;

/// Runs `words` on a fresh machine with V1 = a and V2 = b.
fn run_with(a: u8, b: u8, words: &[u16]) -> Chip8 {
    let mut program = vec![0x61, a, 0x62, b];
    program.extend(words.iter().flat_map(|w| w.to_be_bytes()));

    let mut chip8 = Chip8::with_seed(Quirks::default(), 0);
    chip8.load(&program).unwrap();
    for _ in 0..words.len() + 2 {
        chip8.cpu_cycle().unwrap();
    }
    chip8
}

proptest! {
    #[test]
    fn add_sets_carry(a in any::<u8>(), b in any::<u8>()) {
        let chip8 = run_with(a, b, &[0x8124]);
        prop_assert_eq!(chip8.v()[1], a.wrapping_add(b));
        prop_assert_eq!(chip8.v()[0xF] == 1, u16::from(a) + u16::from(b) > 255);
    }

    #[test]
    fn sub_sets_not_borrow(a in any::<u8>(), b in any::<u8>()) {
        let chip8 = run_with(a, b, &[0x8125]);
        prop_assert_eq!(chip8.v()[1], a.wrapping_sub(b));
        prop_assert_eq!(chip8.v()[0xF] == 1, a >= b);
    }

    #[test]
    fn sub_reverse_mirrors_flag(a in any::<u8>(), b in any::<u8>()) {
        let chip8 = run_with(a, b, &[0x8127]);
        prop_assert_eq!(chip8.v()[1], b.wrapping_sub(a));
        prop_assert_eq!(chip8.v()[0xF] == 1, b >= a);
    }

    #[test]
    fn shift_right_flag_is_lsb(v in any::<u8>()) {
        // SHR V1, V2: the operand comes from V2
        let chip8 = run_with(0, v, &[0x8126]);
        prop_assert_eq!(chip8.v()[1], v >> 1);
        prop_assert_eq!(chip8.v()[0xF], v & 1);
    }

    #[test]
    fn shift_left_flag_is_msb(v in any::<u8>()) {
        let chip8 = run_with(0, v, &[0x812E]);
        prop_assert_eq!(chip8.v()[1], v << 1);
        prop_assert_eq!(chip8.v()[0xF], (v >> 7) & 1);
    }

    #[test]
    fn double_draw_restores_display(
        sprite in prop::collection::vec(any::<u8>(), 1..=15),
        background in prop::collection::vec(any::<u8>(), 15),
        (x, y) in (any::<u8>(), any::<u8>()),
        (bx, by) in (any::<u8>(), any::<u8>()),
    ) {
        let mut chip8 = double_draw_machine(&sprite, &background, (x, y), (bx, by));

        // Background sprite, then the sprite's position and address
        for _ in 0..7 {
            chip8.cpu_cycle().unwrap();
        }
        let before = *chip8.display();

        chip8.cpu_cycle().unwrap();
        chip8.cpu_cycle().unwrap();
        prop_assert_eq!(chip8.display(), &before);
    }

    #[test]
    fn second_draw_collides(
        sprite in prop::collection::vec(any::<u8>(), 1..=15),
        (x, y) in (any::<u8>(), any::<u8>()),
    ) {
        let mut chip8 = double_draw_machine(&sprite, &[0; 15], (x, y), (0, 0));
        for _ in 0..9 {
            chip8.cpu_cycle().unwrap();
        }

        prop_assert!(chip8.display().iter().flatten().all(|&p| !p));
        prop_assert_eq!(chip8.v()[0xF] == 1, sprite.iter().any(|&row| row != 0));
    }
}

/// Draws 15 `background` rows at `(bx, by)`, then `sprite` twice at `(x, y)`.
fn double_draw_machine(
    sprite: &[u8],
    background: &[u8],
    (x, y): (u8, u8),
    (bx, by): (u8, u8),
) -> Chip8 {
    let draw = (0xD120 | sprite.len() as u16).to_be_bytes();

    let mut program = vec![
        0x63, bx, 0x64, by, 0xA3, 0x10, 0xD3, 0x4F, // background
        0x61, x, 0x62, y, 0xA3, 0x00,
    ];
    program.extend(draw);
    program.extend(draw);
    program.resize(0x100, 0);
    program.extend(sprite);
    program.resize(0x110, 0);
    program.extend(background);

    let mut chip8 = Chip8::with_seed(Quirks::default(), 0);
    chip8.load(&program).unwrap();
    chip8
}
