use crate::DEFAULT_BOARD_SIZE;
use crate::DEFAULT_RISK;
use crate::DEFAULT_THREADS;
use crate::MAX_BOARD_SIZE;
use crate::MIN_BOARD_SIZE;
use crate::Millis;
use crate::Nodes;
use crate::error::Error;
use crate::error::Result;
use crate::tournament::BatchConfig;
use clap::Parser;
use std::path::PathBuf;

const AFTER_HELP: &str = "\
BATCH MODE
  Comma-separated lists (no spaces): -N 250k,500k,1m -M 25,50
  The arena generates the cartesian product and shuffles the run order.
  Per-player lists (--p1-max-nodes, --p2-max-nodes) enable asymmetric
  comparison.

METRICS
  Elo        relative strength from win/loss/draw outcomes
  SW-DQI     sharpness-weighted decision quality index (0-100)
  CMA        critical move accuracy: success rate in sharp positions
  Blunder    severe error rate: moves losing >20% win probability
  Crashes    process failures counted against a player

EXIT CODES
  0   success
  1   system failure (config, I/O, resource)
  2   bot failure (crash, timeout, illegal move)";

/// Gomoku Arena: batch tournament runner with Elo and decision quality metrics.
#[derive(Parser, Debug)]
#[command(name = "arena", version, after_help = AFTER_HELP)]
pub struct Args {
    /// player 1 executable
    #[arg(short = '1', long = "p1", value_name = "CMD")]
    pub p1: String,

    /// player 2 executable
    #[arg(short = '2', long = "p2", value_name = "CMD")]
    pub p2: String,

    /// evaluator engine for quality metrics
    #[arg(short = 'e', long = "eval", value_name = "CMD")]
    pub eval: Option<String>,

    /// board size, 5-40
    #[arg(short = 's', long = "size", env = "SIZE", default_value_t = DEFAULT_BOARD_SIZE)]
    pub size: usize,

    /// opening positions file
    #[arg(short = 'o', long = "openings", env = "OPENINGS", value_name = "FILE")]
    pub openings: Option<PathBuf>,

    /// randomize opening order
    #[arg(long)]
    pub shuffle_openings: bool,

    /// thinking time hint to bots; units ms, s (default), m, h
    #[arg(
        short = 't',
        long = "timeout-announce",
        env = "TIMEOUT_ANNOUNCE",
        value_parser = parse_duration_ms,
        default_value = "5s"
    )]
    pub timeout_announce: Millis,

    /// player 1 announce override
    #[arg(long = "p1-timeout-announce", value_parser = parse_duration_ms)]
    pub p1_timeout_announce: Option<Millis>,

    /// player 2 announce override
    #[arg(long = "p2-timeout-announce", value_parser = parse_duration_ms)]
    pub p2_timeout_announce: Option<Millis>,

    /// hard turn deadline (default: derived from the announce)
    #[arg(
        short = 'T',
        long = "timeout-cutoff",
        env = "TIMEOUT_CUTOFF",
        value_parser = parse_duration_ms,
        default_value = "0"
    )]
    pub timeout_cutoff: Millis,

    /// player 1 cutoff override
    #[arg(long = "p1-timeout-cutoff", value_parser = parse_duration_ms)]
    pub p1_timeout_cutoff: Option<Millis>,

    /// player 2 cutoff override
    #[arg(long = "p2-timeout-cutoff", value_parser = parse_duration_ms)]
    pub p2_timeout_cutoff: Option<Millis>,

    /// total game time bank (default: unlimited)
    #[arg(
        short = 'g',
        long = "timeout-game",
        env = "TIMEOUT_GAME",
        value_parser = parse_duration_ms,
        default_value = "0"
    )]
    pub timeout_game: Millis,

    /// player 1 time bank override
    #[arg(long = "p1-timeout-game", value_parser = parse_duration_ms)]
    pub p1_timeout_game: Option<Millis>,

    /// player 2 time bank override
    #[arg(long = "p2-timeout-game", value_parser = parse_duration_ms)]
    pub p2_timeout_game: Option<Millis>,

    /// evaluator read deadline
    #[arg(long = "eval-timeout-cutoff", value_parser = parse_duration_ms, default_value = "30s")]
    pub eval_timeout_cutoff: Millis,

    /// memory limit; units k, m (default), g
    #[arg(
        short = 'l',
        long = "memory",
        env = "MEMORY",
        value_parser = parse_memory_bytes,
        default_value = "0"
    )]
    pub memory: i64,

    /// player 1 memory override
    #[arg(long = "p1-memory", value_parser = parse_memory_bytes)]
    pub p1_memory: Option<i64>,

    /// player 2 memory override
    #[arg(long = "p2-memory", value_parser = parse_memory_bytes)]
    pub p2_memory: Option<i64>,

    /// search node limits for both players; suffixes k, m, b/g
    #[arg(short = 'N', long = "max-nodes", value_delimiter = ',', value_parser = parse_nodes)]
    pub max_nodes: Vec<Nodes>,

    /// player 1 node limits
    #[arg(long = "p1-max-nodes", value_delimiter = ',', value_parser = parse_nodes)]
    pub p1_max_nodes: Vec<Nodes>,

    /// player 2 node limits
    #[arg(long = "p2-max-nodes", value_delimiter = ',', value_parser = parse_nodes)]
    pub p2_max_nodes: Vec<Nodes>,

    /// evaluator node limits (default: 15m)
    #[arg(long = "eval-max-nodes", value_delimiter = ',', value_parser = parse_nodes)]
    pub eval_max_nodes: Vec<Nodes>,

    /// minimum pairs before the early stop may fire
    #[arg(
        short = 'm',
        long = "min-pairs",
        env = "MIN_PAIRS",
        value_delimiter = ',',
        default_value = "5"
    )]
    pub min_pairs: Vec<u32>,

    /// maximum pairs to play
    #[arg(
        short = 'M',
        long = "max-pairs",
        env = "MAX_PAIRS",
        value_delimiter = ',',
        default_value = "10"
    )]
    pub max_pairs: Vec<u32>,

    /// early stop confidence threshold, 0 disables
    #[arg(short = 'r', long = "risk", env = "RISK", default_value_t = DEFAULT_RISK)]
    pub risk: f64,

    /// concurrent games
    #[arg(short = 'j', long = "threads", env = "THREADS", default_value_t = DEFAULT_THREADS)]
    pub threads: usize,

    /// run each configuration N times
    #[arg(long, default_value_t = 1)]
    pub repeat: u32,

    /// explicit seeds to rotate through the repeats
    #[arg(long = "seed", value_delimiter = ',')]
    pub seeds: Vec<u64>,

    /// remote endpoint for live results
    #[arg(long = "api-url", env = "API_URL")]
    pub api_url: Option<String>,

    /// API authentication key
    #[arg(long = "api-key", env = "API_KEY")]
    pub api_key: Option<String>,

    /// API batch interval (default: half the announce, at least 100ms)
    #[arg(long = "debounce", env = "DEBOUNCE", value_parser = parse_duration_ms)]
    pub debounce: Option<Millis>,

    /// clear the API database before starting
    #[arg(long)]
    pub cleanup: bool,

    /// NDJSON output, one line per finished configuration
    #[arg(long = "export-results", value_name = "FILE")]
    pub export_results: Option<PathBuf>,

    /// print the board after each move
    #[arg(short = 'b', long = "show-board")]
    pub show_board: bool,

    /// verbose logging with CPU metrics
    #[arg(short = 'd', long = "debug")]
    pub debug: bool,

    /// terminate immediately on any bot failure
    #[arg(long)]
    pub exit_on_crash: bool,
}

/// Validate the parsed arguments and fold them into the batch config.
pub fn to_batch(args: Args) -> Result<BatchConfig> {
    if args.size < MIN_BOARD_SIZE || args.size > MAX_BOARD_SIZE {
        return Err(Error::Config(format!(
            "board size must be between {MIN_BOARD_SIZE} and {MAX_BOARD_SIZE}"
        )));
    }
    if args.max_pairs.iter().any(|&mp| mp < 1) {
        return Err(Error::Config("--max-pairs must be >= 1".into()));
    }
    if !(0.0..=1.0).contains(&args.risk) {
        return Err(Error::Config("--risk must be between 0.0 and 1.0".into()));
    }
    if args.api_url.is_some() != args.api_key.is_some() {
        return Err(Error::Config(
            "API URL and API key must be provided together".into(),
        ));
    }
    if args.threads < 1 {
        return Err(Error::Config("--threads must be >= 1".into()));
    }
    let hardware = num_cpus::get();
    if args.threads > hardware {
        return Err(Error::Config(format!(
            "requested threads ({}) exceed hardware concurrency ({hardware})",
            args.threads
        )));
    }

    let p1_timeout_announce = args.p1_timeout_announce.unwrap_or(args.timeout_announce);
    let p2_timeout_announce = args.p2_timeout_announce.unwrap_or(args.timeout_announce);
    let debounce_ms = args.debounce.unwrap_or_else(|| (p1_timeout_announce / 2).max(100));
    let api_url = args
        .api_url
        .unwrap_or_default()
        .trim_end_matches('/')
        .to_string();

    Ok(BatchConfig {
        p1_cmd: args.p1,
        p2_cmd: args.p2,
        eval_cmd: args.eval.unwrap_or_default(),
        board_size: args.size,
        openings_path: args.openings,
        shuffle_openings: args.shuffle_openings,
        threads: args.threads,
        p1_timeout_announce,
        p2_timeout_announce,
        p1_timeout_cutoff: args.p1_timeout_cutoff.unwrap_or(args.timeout_cutoff),
        p2_timeout_cutoff: args.p2_timeout_cutoff.unwrap_or(args.timeout_cutoff),
        p1_timeout_game: args.p1_timeout_game.unwrap_or(args.timeout_game),
        p2_timeout_game: args.p2_timeout_game.unwrap_or(args.timeout_game),
        eval_timeout_cutoff: args.eval_timeout_cutoff,
        p1_memory: args.p1_memory.unwrap_or(args.memory),
        p2_memory: args.p2_memory.unwrap_or(args.memory),
        common_nodes: args.max_nodes,
        p1_nodes: args.p1_max_nodes,
        p2_nodes: args.p2_max_nodes,
        eval_nodes: args.eval_max_nodes,
        min_pairs: args.min_pairs,
        max_pairs: args.max_pairs,
        seeds: args.seeds,
        repeat: args.repeat,
        risk: args.risk,
        api_url,
        api_key: args.api_key.unwrap_or_default(),
        debounce_ms,
        cleanup: args.cleanup,
        export_results: args.export_results,
        debug: args.debug,
        show_board: args.show_board,
        exit_on_crash: args.exit_on_crash,
    })
}

/// duration with an optional unit suffix; bare numbers are seconds
pub fn parse_duration_ms(s: &str) -> std::result::Result<Millis, String> {
    let (value, unit) = split_number(s)?;
    let ms = match unit {
        "" | "s" => value * 1_000.0,
        "ms" => value,
        "m" => value * 60_000.0,
        "h" => value * 3_600_000.0,
        other => return Err(format!("unknown duration unit {other:?} in {s:?}")),
    };
    Ok(ms as Millis)
}

/// memory size with an optional unit suffix; bare numbers are MiB
pub fn parse_memory_bytes(s: &str) -> std::result::Result<i64, String> {
    if s.is_empty() {
        return Ok(0);
    }
    let (value, unit) = split_number(s)?;
    let unit = unit.strip_suffix(|c| c == 'b' || c == 'B').unwrap_or(unit);
    let multiplier: i64 = match unit.to_ascii_lowercase().as_str() {
        "" => 1_048_576,
        "k" => 1_024,
        "m" => 1_048_576,
        "g" => 1_073_741_824,
        other => return Err(format!("unknown memory unit {other:?} in {s:?}")),
    };
    Ok((value * multiplier as f64) as i64)
}

/// node count with an optional decimal suffix k/m/b/g
pub fn parse_nodes(s: &str) -> std::result::Result<Nodes, String> {
    if s.is_empty() {
        return Ok(0);
    }
    let (value, unit) = split_number(s)?;
    let multiplier: u64 = match unit.to_ascii_lowercase().as_str() {
        "" => 1,
        "k" => 1_000,
        "m" => 1_000_000,
        "b" | "g" => 1_000_000_000,
        other => return Err(format!("unknown node suffix {other:?} in {s:?}")),
    };
    Ok((value * multiplier as f64) as Nodes)
}

fn split_number(s: &str) -> std::result::Result<(f64, &str), String> {
    let end = s
        .find(|c: char| !c.is_ascii_digit() && c != '.' && c != '-' && c != '+')
        .unwrap_or(s.len());
    let value = s[..end]
        .parse::<f64>()
        .map_err(|_| format!("invalid number in {s:?}"))?;
    Ok((value, &s[end..]))
}
