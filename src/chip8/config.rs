use clap::Args;

pub const DEFAULT_CPU_HZ: f32 = 700.0;
pub const DEFAULT_FRAME_HZ: f32 = 60.0;

/// Behaviors that differ between historical interpreters.
///
/// Shifts (8xy6/8xyE) are not listed here: they always read `Vy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quirks {
    /// Fx55/Fx65 leave `I` pointing one past the last register transferred.
    pub load_store_increments_index: bool,
    /// 8xy1/8xy2/8xy3 clear `VF` after the logic operation.
    pub logic_resets_flag: bool,
    /// A sprite draw ends the current frame's instruction batch.
    pub display_wait: bool,
}

impl Default for Quirks {
    fn default() -> Self {
        Self {
            load_store_increments_index: true,
            logic_resets_flag: false,
            display_wait: false,
        }
    }
}

/// Execution rates and quirk selection for one machine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Chip8Config {
    /// Target instruction rate.
    pub cpu_hz: f32,
    /// Frame rate, which is also the timer decrement rate.
    pub frame_hz: f32,
    pub quirks: Quirks,
}

impl Chip8Config {
    /// Number of instructions run per frame tick, never less than one.
    pub fn instructions_per_frame(&self) -> usize {
        let per_frame = (self.cpu_hz / self.frame_hz).round();
        if per_frame.is_finite() && per_frame >= 1.0 {
            per_frame as usize
        } else {
            1
        }
    }

    /// Duration of one frame tick in seconds.
    pub fn frame_time_step(&self) -> f32 {
        1.0 / self.frame_hz
    }
}

impl Default for Chip8Config {
    fn default() -> Self {
        Self {
            cpu_hz: DEFAULT_CPU_HZ,
            frame_hz: DEFAULT_FRAME_HZ,
            quirks: Quirks::default(),
        }
    }
}

/// Command-line flags shared by the front-ends.
#[derive(Args, Debug, Clone)]
pub struct ConfigArgs {
    /// Instructions executed per second
    #[arg(long, default_value_t = DEFAULT_CPU_HZ, value_parser = parse_rate)]
    pub cpu_hz: f32,

    /// Frames (and timer decrements) per second
    #[arg(long, default_value_t = DEFAULT_FRAME_HZ, value_parser = parse_rate)]
    pub frame_hz: f32,

    /// Leave I unchanged after Fx55/Fx65
    #[arg(long)]
    pub no_index_increment: bool,

    /// Clear VF after 8xy1, 8xy2 and 8xy3
    #[arg(long)]
    pub logic_resets_flag: bool,

    /// Stop the frame's instruction batch after every sprite draw
    #[arg(long)]
    pub display_wait: bool,
}

impl From<ConfigArgs> for Chip8Config {
    fn from(args: ConfigArgs) -> Self {
        Self {
            cpu_hz: args.cpu_hz,
            frame_hz: args.frame_hz,
            quirks: Quirks {
                load_store_increments_index: !args.no_index_increment,
                logic_resets_flag: args.logic_resets_flag,
                display_wait: args.display_wait,
            },
        }
    }
}

fn parse_rate(s: &str) -> Result<f32, String> {
    match s.parse::<f32>() {
        Ok(rate) if rate.is_finite() && rate > 0.0 => Ok(rate),
        Ok(_) => Err(format!("rate must be a positive number, got '{s}'")),
        Err(e) => Err(e.to_string()),
    }
}
