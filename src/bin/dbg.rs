use std::{
    path::PathBuf,
    time::{Duration, Instant},
};

use anyhow::Context;
use clap::Parser;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use ratatui::{
    DefaultTerminal,
    buffer::Buffer,
    layout::{Alignment, Constraint, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Paragraph, Widget, Wrap},
};

use chip8_vm::{
    chip8::{
        Chip8Config, Chip8Error, Chip8Runner, Chip8RunnerResult, ConfigArgs, DISPLAY_X, DISPLAY_Y,
        ErrorCounts, KeyEvent as KeypadEvent, RunState, STACK_SIZE,
    },
    debugger::{Cli, Command, CommandResult, Executor},
    u4,
};

/// Host keys bound to keypad keys 0x0-0xF.
const KEY_BINDINGS: [char; 16] = [
    'x', '1', '2', '3', 'q', 'w', 'e', 'a', 's', 'd', 'z', 'c', '4', 'r', 'f', 'v',
];

// Most terminals never report releases, so a key is let go once neither a
// press nor an auto-repeat has arrived for this long.
const KEY_RELEASE_TIMEOUT: Duration = Duration::from_millis(100);

const INPUT_POLL: Duration = Duration::from_millis(16);

/// Keypad keys currently held, with the time they were last seen.
#[derive(Default)]
struct HeldKeys([Option<Instant>; 16]);

impl HeldKeys {
    /// Records a press or auto-repeat. Returns true only for a fresh press.
    fn press(&mut self, key: u4, now: Instant) -> bool {
        self.0[key].replace(now).is_none()
    }

    fn release(&mut self, key: u4) -> bool {
        self.0[key].take().is_some()
    }

    /// Lets go of every key not refreshed within the timeout.
    fn expire(&mut self, now: Instant) -> Vec<u4> {
        let expired: Vec<u4> = (0..16)
            .map(u4::new)
            .filter(|&key| {
                self.0[key].is_some_and(|seen| now.duration_since(seen) > KEY_RELEASE_TIMEOUT)
            })
            .collect();

        for &key in &expired {
            self.0[key] = None;
        }
        expired
    }
}

struct App {
    executor: Executor,
    input: String,
    output: String,
    should_quit: bool,
    last_tick: Instant,
    last_command: Option<Command>,
    held: HeldKeys,
}

impl App {
    fn new(program: &[u8], config: Chip8Config) -> anyhow::Result<Self> {
        let runner = Chip8Runner::with_program(program, config)
            .context("Failed to load program into CHIP-8 memory")?;

        Ok(Self {
            executor: Executor::new(runner),
            input: String::new(),
            output: String::new(),
            should_quit: false,
            last_tick: Instant::now(),
            last_command: None,
            held: HeldKeys::default(),
        })
    }

    fn run(&mut self, terminal: &mut DefaultTerminal) -> anyhow::Result<()> {
        while !self.should_quit {
            let now = Instant::now();
            let dt = now.duration_since(self.last_tick).as_secs_f32();
            self.last_tick = now;

            let result = self.executor.poll(dt);
            self.report(result);

            terminal.draw(|frame| frame.render_widget(&*self, frame.area()))?;

            for key in self.held.expire(Instant::now()) {
                self.executor.runner_mut().queue_event(KeypadEvent::Up(key));
            }

            if event::poll(INPUT_POLL)?
                && let Event::Key(key) = event::read()?
            {
                self.handle_key_event(key);
            }
        }

        Ok(())
    }

    fn report(&mut self, result: Chip8RunnerResult) {
        match result {
            Chip8RunnerResult::Ok => {}
            Chip8RunnerResult::HitBreakpoint => {
                self.output = format!("Breakpoint at {:03X}", self.executor.get_pc());
            }
            Chip8RunnerResult::Faulted(e) => {
                self.output = format!("Paused on guest error: {e}");
            }
        }
    }

    fn handle_key_event(&mut self, key: KeyEvent) {
        if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
            self.should_quit = true;
            return;
        }

        if self.executor.is_running() {
            self.handle_keypad(key);
        } else if key.kind == KeyEventKind::Press {
            self.handle_console(key.code);
        }
    }

    /// While running, bound keys drive the keypad and Esc pauses.
    fn handle_keypad(&mut self, key: KeyEvent) {
        if key.code == KeyCode::Esc {
            self.executor.execute_pause();
            self.output = "Paused".to_string();
            return;
        }

        let Some(pad) = keypad_key(key.code) else {
            return;
        };
        let event = match key.kind {
            KeyEventKind::Release => self.held.release(pad).then_some(KeypadEvent::Up(pad)),
            _ => self
                .held
                .press(pad, Instant::now())
                .then_some(KeypadEvent::Down(pad)),
        };

        if let Some(event) = event {
            self.executor.runner_mut().queue_event(event);
        }
    }

    fn handle_console(&mut self, code: KeyCode) {
        match code {
            KeyCode::Esc => self.should_quit = true,
            KeyCode::Enter => self.submit(),
            KeyCode::Char(c) => self.input.push(c),
            KeyCode::Backspace => {
                self.input.pop();
            }
            _ => {}
        }
    }

    fn submit(&mut self) {
        let line = std::mem::take(&mut self.input);

        let command = if line.trim().is_empty() {
            // An empty line repeats the previous command
            let Some(command) = self.last_command.clone() else {
                return;
            };
            command
        } else {
            match Cli::try_parse_from(line.split_whitespace()) {
                Ok(cli) => cli.command,
                Err(e) => {
                    self.output = e.to_string();
                    self.last_command = None;
                    return;
                }
            }
        };

        self.last_command = Some(command.clone());
        self.execute_command(command);
    }

    fn execute_command(&mut self, command: Command) {
        self.output = match self.executor.execute(command) {
            Ok(CommandResult::Quit) => {
                self.should_quit = true;
                return;
            }
            Ok(result) => self.describe(result),
            Err(e) => e.to_string(),
        };
    }

    fn describe(&self, result: CommandResult) -> String {
        match result {
            CommandResult::Ok | CommandResult::Quit => "OK".to_string(),
            CommandResult::BreakpointList { breakpoints } if breakpoints.is_empty() => {
                "No breakpoints".to_string()
            }
            CommandResult::BreakpointList { breakpoints } => {
                format!("Breakpoints: {breakpoints:03X?}")
            }
            CommandResult::MemDump { data, offset } => hex_dump(&data, offset),
            CommandResult::Disasm { instructions } => {
                let pc = self.executor.get_pc();
                instructions
                    .iter()
                    .map(|(addr, word, opcode)| {
                        let marker = if *addr == pc { '>' } else { ' ' };
                        format!("{marker}{addr:03X}: {word:04X}  {opcode}\n")
                    })
                    .collect()
            }
            CommandResult::Errors { counts, last } => format!(
                "{} errors\n{}",
                counts.total(),
                fault_summary(&counts, last.as_ref())
            ),
        }
    }
}

const SCREEN_WIDTH: u16 = DISPLAY_X as u16 + 2;
// Two framebuffer rows share one terminal cell
const SCREEN_HEIGHT: u16 = (DISPLAY_Y / 2) as u16 + 2;
const SIDEBAR_WIDTH: u16 = 24;

const MACHINE_HEIGHT: u16 = 7 + 2;
const FAULTS_HEIGHT: u16 = 5 + 2;
const QUIRKS_HEIGHT: u16 = 4 + 2;
const KEYPAD_HEIGHT: u16 = 4 + 2;
const MIN_STACK_HEIGHT: u16 = 1 + 2;
const MIN_CONSOLE_HEIGHT: u16 = 2 + 2;

/// Hex keypad as laid out on the COSMAC VIP.
const KEYPAD_LAYOUT: [[u8; 4]; 4] = [
    [0x1, 0x2, 0x3, 0xC],
    [0x4, 0x5, 0x6, 0xD],
    [0x7, 0x8, 0x9, 0xE],
    [0xA, 0x0, 0xB, 0xF],
];

impl Widget for &App {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let min_width = SCREEN_WIDTH + SIDEBAR_WIDTH;
        let min_height = (SCREEN_HEIGHT + MIN_CONSOLE_HEIGHT).max(
            MACHINE_HEIGHT + FAULTS_HEIGHT + QUIRKS_HEIGHT + KEYPAD_HEIGHT + MIN_STACK_HEIGHT,
        );
        if area.width < min_width || area.height < min_height {
            Paragraph::new(format!("Terminal is too small, need {min_width}x{min_height}"))
                .style(Style::default().fg(Color::Red))
                .alignment(Alignment::Center)
                .wrap(Wrap { trim: true })
                .block(Block::bordered())
                .render(area, buf);
            return;
        }

        let [main, sidebar] = Layout::horizontal([
            Constraint::Min(SCREEN_WIDTH),
            Constraint::Length(SIDEBAR_WIDTH),
        ])
        .areas(area);

        let [screen, console] = Layout::vertical([
            Constraint::Length(SCREEN_HEIGHT),
            Constraint::Min(MIN_CONSOLE_HEIGHT),
        ])
        .areas(main);

        let [machine, faults, quirks, keypad, stack] = Layout::vertical([
            Constraint::Length(MACHINE_HEIGHT),
            Constraint::Length(FAULTS_HEIGHT),
            Constraint::Length(QUIRKS_HEIGHT),
            Constraint::Length(KEYPAD_HEIGHT),
            Constraint::Min(MIN_STACK_HEIGHT),
        ])
        .areas(sidebar);

        self.render_screen(screen, buf);
        self.render_console(console, buf);
        self.render_machine(machine, buf);
        self.render_faults(faults, buf);
        self.render_quirks(quirks, buf);
        self.render_keypad(keypad, buf);
        self.render_stack(stack, buf);
    }
}

impl App {
    /// Packs pixel rows in pairs into half-block glyphs.
    fn render_screen(&self, area: Rect, buf: &mut Buffer) {
        let lines: Vec<Line> = self
            .executor
            .get_display()
            .chunks_exact(2)
            .map(|pair| {
                let cells: String = pair[0]
                    .iter()
                    .zip(&pair[1])
                    .map(|(&top, &bottom)| match (top, bottom) {
                        (true, true) => '█',
                        (true, false) => '▀',
                        (false, true) => '▄',
                        (false, false) => ' ',
                    })
                    .collect();
                Line::from(cells)
            })
            .collect();

        Paragraph::new(lines)
            .style(Style::default().fg(Color::Green))
            .alignment(Alignment::Center)
            .block(Block::bordered().title(" Screen "))
            .render(area, buf);
    }

    fn render_console(&self, area: Rect, buf: &mut Buffer) {
        let block = Block::bordered().title(" Console ");
        let [output, prompt] =
            Layout::vertical([Constraint::Min(1), Constraint::Length(1)]).areas(block.inner(area));
        block.render(area, buf);

        Paragraph::new(self.output.as_str()).render(output, buf);
        Line::from(vec![
            Span::styled("> ", Style::default().fg(Color::DarkGray)),
            Span::raw(self.input.as_str()),
        ])
        .render(prompt, buf);
    }

    fn render_machine(&self, area: Rect, buf: &mut Buffer) {
        let (status, color) = match self.executor.runner().run_state() {
            RunState::WaitingForKey { register } => (format!("KEY -> V{register}"), Color::Cyan),
            RunState::Running if self.executor.is_running() => ("RUNNING".to_string(), Color::Green),
            RunState::Running => ("PAUSED".to_string(), Color::Yellow),
        };

        let mut lines = vec![
            Line::styled(status, Style::default().fg(color)),
            Line::from(format!(
                "PC {:03X}   I {:04X}",
                self.executor.get_pc(),
                self.executor.get_i()
            )),
            Line::from(format!(
                "DT {:02X}    ST {:02X}",
                self.executor.get_delay_timer(),
                self.executor.get_sound_timer()
            )),
        ];
        lines.extend(
            self.executor
                .get_v()
                .chunks_exact(4)
                .enumerate()
                .map(|(row, regs)| {
                    Line::from(format!(
                        "V{:X}-{:X} {:02X} {:02X} {:02X} {:02X}",
                        row * 4,
                        row * 4 + 3,
                        regs[0],
                        regs[1],
                        regs[2],
                        regs[3]
                    ))
                }),
        );

        Paragraph::new(lines)
            .block(Block::bordered().title(" Machine "))
            .render(area, buf);
    }

    fn render_faults(&self, area: Rect, buf: &mut Buffer) {
        let runner = self.executor.runner();
        let counts = runner.error_counts();
        let border = if counts.total() > 0 {
            Style::default().fg(Color::Red)
        } else {
            Style::default()
        };

        Paragraph::new(fault_summary(counts, runner.last_error()))
            .wrap(Wrap { trim: true })
            .block(
                Block::bordered()
                    .title(format!(" Faults: {} ", counts.total()))
                    .border_style(border),
            )
            .render(area, buf);
    }

    fn render_quirks(&self, area: Rect, buf: &mut Buffer) {
        let config = self.executor.runner().config();
        let flag = |on: bool, label: &str| {
            Line::from(format!("[{}] {label}", if on { 'x' } else { ' ' }))
        };

        let lines = vec![
            Line::from(format!(
                "{} Hz, {}/frame",
                config.cpu_hz,
                config.instructions_per_frame()
            )),
            flag(config.quirks.load_store_increments_index, "Fx55/65 bump I"),
            flag(config.quirks.logic_resets_flag, "logic clears VF"),
            flag(config.quirks.display_wait, "draw ends frame"),
        ];

        Paragraph::new(lines)
            .block(Block::bordered().title(" Quirks "))
            .render(area, buf);
    }

    /// Each keypad key with its host binding; held keys are reversed.
    fn render_keypad(&self, area: Rect, buf: &mut Buffer) {
        let keypad = self.executor.get_keypad();

        let lines: Vec<Line> = KEYPAD_LAYOUT
            .iter()
            .map(|row| {
                let spans: Vec<Span> = row
                    .iter()
                    .flat_map(|&key| {
                        let style = if keypad[usize::from(key)] {
                            Style::default().add_modifier(Modifier::REVERSED)
                        } else {
                            Style::default()
                        };
                        [
                            Span::styled(format!("{key:X}:{}", host_key(key)), style),
                            Span::raw(" "),
                        ]
                    })
                    .collect();
                Line::from(spans)
            })
            .collect();

        Paragraph::new(lines)
            .alignment(Alignment::Center)
            .block(Block::bordered().title(" Keypad "))
            .render(area, buf);
    }

    fn render_stack(&self, area: Rect, buf: &mut Buffer) {
        let stack = self.executor.get_stack();
        let rows = usize::from(area.height.saturating_sub(2));

        // Innermost return address on top
        let lines: Vec<Line> = if stack.is_empty() {
            vec![Line::from("empty")]
        } else {
            stack
                .iter()
                .enumerate()
                .rev()
                .take(rows)
                .map(|(depth, addr)| Line::from(format!("{depth:>2}  ret {addr:03X}")))
                .collect()
        };

        Paragraph::new(lines)
            .block(Block::bordered().title(format!(" Stack {}/{STACK_SIZE} ", stack.len())))
            .render(area, buf);
    }
}

/// One line per error kind, then the most recent error.
fn fault_summary(counts: &ErrorCounts, last: Option<&Chip8Error>) -> String {
    let mut summary: String = [
        ("unknown opcode", counts.unknown_opcode.to_string()),
        (
            "stack over/under",
            format!("{}/{}", counts.stack_overflow, counts.stack_underflow),
        ),
        ("out of bounds", counts.memory_out_of_bounds.to_string()),
        ("font write", counts.reserved_write.to_string()),
    ]
    .iter()
    .map(|(label, count)| format!("{label:<17}{count}\n"))
    .collect();

    summary.push_str("last: ");
    summary.push_str(&last.map_or_else(|| "none".to_string(), |e| e.to_string()));
    summary
}

fn keypad_key(code: KeyCode) -> Option<u4> {
    let KeyCode::Char(c) = code else {
        return None;
    };
    KEY_BINDINGS
        .iter()
        .position(|&bound| bound == c.to_ascii_lowercase())
        .map(|idx| u4::new(idx as u8))
}

fn host_key(key: u8) -> char {
    KEY_BINDINGS[usize::from(key)]
}

/// Sixteen bytes per row, each prefixed with its address.
fn hex_dump(data: &[u8], offset: u16) -> String {
    data.chunks(16)
        .enumerate()
        .map(|(row, bytes)| {
            let hex: Vec<String> = bytes.iter().map(|b| format!("{b:02X}")).collect();
            format!("{:03X}: {}\n", usize::from(offset) + row * 16, hex.join(" "))
        })
        .collect()
}

/// TUI debugger for CHIP-8
#[derive(Parser)]
struct Args {
    /// Path to the program file to load
    rom_path: PathBuf,

    #[command(flatten)]
    config: ConfigArgs,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let program = std::fs::read(&args.rom_path).context("Failed to read program file")?;
    let mut app =
        App::new(&program, args.config.into()).context("Failed to initialize application")?;

    let mut terminal = ratatui::init();
    let app_result = app.run(&mut terminal);
    ratatui::restore();

    app_result
}
