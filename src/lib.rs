pub mod analysis;
pub mod board;
pub mod cli;
pub mod error;
pub mod report;
pub mod stats;
pub mod subprocess;
pub mod tournament;

/// dimensional analysis types
pub type Millis = i64;
pub type Nodes = u64;
pub type Score = f64;
/// run-level player index, 1 or 2; 0 means "nobody"
pub type BotId = u8;

// board and wire protocol parameters
pub const MIN_BOARD_SIZE: usize = 5;
pub const MAX_BOARD_SIZE: usize = 40;
pub const DEFAULT_BOARD_SIZE: usize = 20;
pub const WIN_LENGTH: usize = 5;
pub const PROTOCOL_GAME_TYPE: u32 = 1;
pub const PROTOCOL_RULE: u32 = 0;
pub const PROTOCOL_THREAD_NUM: u32 = 1;
pub const MAX_NAME_LENGTH: usize = 16;
pub const MAX_VERSION_LENGTH: usize = 8;

// time control
pub const DEFAULT_TIMEOUT_ANNOUNCE_MS: Millis = 5_000;
pub const MIN_TURN_TIMEOUT_MS: Millis = 10;
pub const META_TIMEOUT_MS: Millis = 3_000;
pub const POLL_SLICE_MS: Millis = 100;
pub const WRITE_TIMEOUT_MS: Millis = 500;
pub const TERMINATION_GRACE_MS: u64 = 100;
pub const WORKER_IDLE_WAIT_MS: u64 = 500;
pub const MAX_NODE_TIMEOUT_MS: Millis = 60_000;
pub const RAPFI_CUTOFF_FACTOR: Millis = 2;
pub const RAPFI_CUTOFF_PLUS_MS: Millis = 1_500;

// match control
pub const DEFAULT_MIN_PAIRS: u32 = 5;
pub const DEFAULT_MAX_PAIRS: u32 = 10;
pub const DEFAULT_RISK: f64 = 0.0;
pub const DEFAULT_THREADS: usize = 4;

// rating parameters
pub const ELO_BASE: i32 = 1_000;
pub const ELO_K_FACTOR: f64 = 32.0;
pub const ELO_DIVISOR: f64 = 400.0;

// decision quality parameters
pub const DEFAULT_EVAL_NODES: Nodes = 15_000_000;
pub const DEFAULT_EVAL_CUTOFF_MS: Millis = 30_000;
pub const CRITICAL_SHARPNESS: f64 = 0.05;
pub const CRITICAL_SUCCESS_REGRET: f64 = 0.02;
pub const SEVERE_ERROR_REGRET: f64 = 0.20;
pub const WEIGHT_SHARPNESS_FACTOR: f64 = 10.0;
pub const GARBAGE_TIME_THRESHOLD: f64 = 0.05;

// reporter parameters
pub const API_TIMEOUT_SECS: u64 = 10;
pub const API_QUEUE_MAX: usize = 5_000;
pub const API_BACKOFF_MIN_SECS: u64 = 2;
pub const API_BACKOFF_MAX_SECS: u64 = 10;
pub const API_SHUTDOWN_RETRIES: u32 = 3;
pub const API_SHUTDOWN_BACKOFF_SECS: u64 = 1;

// subprocess and cache sizing
pub const ZOBRIST_SEED: u64 = 12_345;
pub const CACHE_SLOTS: usize = 1 << 20;
pub const READ_CHUNK_SIZE: usize = 4_096;
pub const CHANNEL_BUFFER_MAX: usize = 256 * 1_024;
pub const RAPFI_MEMORY_OVERHEAD: i64 = 128 * 1_048_576;

// process exit codes
pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_SYSTEM_FAILURE: u8 = 1;
pub const EXIT_BOT_FAILURE: u8 = 2;

/// initialize terminal logging; --debug raises the level
pub fn init(debug: bool) {
    let config = simplelog::ConfigBuilder::new()
        .set_location_level(log::LevelFilter::Off)
        .set_target_level(log::LevelFilter::Off)
        .set_thread_level(log::LevelFilter::Off)
        .build();
    let level = if debug {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    simplelog::TermLogger::init(
        level,
        config,
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    )
    .expect("initialize logger");
}
