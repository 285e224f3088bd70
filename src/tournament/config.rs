use crate::DEFAULT_EVAL_CUTOFF_MS;
use crate::DEFAULT_EVAL_NODES;
use crate::MAX_NODE_TIMEOUT_MS;
use crate::Millis;
use crate::Nodes;
use crate::RAPFI_CUTOFF_FACTOR;
use crate::RAPFI_CUTOFF_PLUS_MS;
use std::path::PathBuf;

/// Rapfi builds get special-cased timeouts and memory headroom, detected
/// by a case-insensitive substring on the command or announced name.
pub fn is_rapfi(name_or_cmd: &str) -> bool {
    name_or_cmd.to_lowercase().contains("rapfi")
}

/// launch and resource settings of one bot side
#[derive(Debug, Clone, Default)]
pub struct BotConfig {
    pub cmd: String,
    /// virtual memory cap in bytes, 0 = unlimited
    pub memory: i64,
    /// thinking time announced to the bot
    pub timeout_announce: Millis,
    /// hard per-turn deadline, 0 = derive from the announce
    pub timeout_cutoff: Millis,
    /// per-game time bank, 0 = unlimited
    pub timeout_game: Millis,
    /// search node budget, overrides time control when set
    pub max_nodes: Nodes,
}

impl BotConfig {
    /// Effective hard deadline for one turn. Engines running on a node
    /// budget get a generous fixed cutoff; rapfi announces soft limits it
    /// routinely overshoots, so its derived cutoff gets slack.
    pub fn cutoff(&self, bot_name: &str) -> Millis {
        if self.timeout_cutoff != 0 {
            return self.timeout_cutoff;
        }
        if self.max_nodes > 0 {
            return MAX_NODE_TIMEOUT_MS;
        }
        if is_rapfi(bot_name) {
            self.timeout_announce * RAPFI_CUTOFF_FACTOR + RAPFI_CUTOFF_PLUS_MS
        } else {
            self.timeout_announce
        }
    }
}

/// one parameter point of the batch: node budgets, pair bounds, repeat
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSpec {
    pub p1_nodes: Nodes,
    pub p2_nodes: Nodes,
    pub eval_nodes: Nodes,
    pub min_pairs: u32,
    pub max_pairs: u32,
    pub repeat_index: u32,
    pub seed: Option<u64>,
}

impl Default for RunSpec {
    fn default() -> Self {
        Self {
            p1_nodes: 0,
            p2_nodes: 0,
            eval_nodes: DEFAULT_EVAL_NODES,
            min_pairs: 1,
            max_pairs: crate::DEFAULT_MAX_PAIRS,
            repeat_index: 0,
            seed: None,
        }
    }
}

/// fully resolved settings of one run: batch config crossed with one spec
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub bot1: BotConfig,
    pub bot2: BotConfig,
    pub eval_cmd: String,
    pub eval_cutoff: Millis,
    pub eval_max_nodes: Nodes,
    pub board_size: usize,
    pub threads: usize,
    pub min_pairs: u32,
    pub max_pairs: u32,
    pub risk: f64,
    pub debounce_ms: Millis,
    pub seed: Option<u64>,
    pub repeat_index: u32,
    pub debug: bool,
    pub show_board: bool,
    pub exit_on_crash: bool,
}

impl RunConfig {
    pub fn eval_enabled(&self) -> bool {
        !self.eval_cmd.is_empty()
    }
}

/// everything the CLI resolves before batch expansion
#[derive(Debug, Clone, Default)]
pub struct BatchConfig {
    pub p1_cmd: String,
    pub p2_cmd: String,
    pub eval_cmd: String,
    pub board_size: usize,
    pub openings_path: Option<PathBuf>,
    pub shuffle_openings: bool,
    pub threads: usize,

    pub p1_timeout_announce: Millis,
    pub p2_timeout_announce: Millis,
    pub p1_timeout_cutoff: Millis,
    pub p2_timeout_cutoff: Millis,
    pub p1_timeout_game: Millis,
    pub p2_timeout_game: Millis,
    pub eval_timeout_cutoff: Millis,

    pub p1_memory: i64,
    pub p2_memory: i64,

    pub common_nodes: Vec<Nodes>,
    pub p1_nodes: Vec<Nodes>,
    pub p2_nodes: Vec<Nodes>,
    pub eval_nodes: Vec<Nodes>,
    pub min_pairs: Vec<u32>,
    pub max_pairs: Vec<u32>,
    pub seeds: Vec<u64>,
    pub repeat: u32,

    pub risk: f64,
    pub api_url: String,
    pub api_key: String,
    pub debounce_ms: Millis,
    pub cleanup: bool,
    pub export_results: Option<PathBuf>,
    pub debug: bool,
    pub show_board: bool,
    pub exit_on_crash: bool,
}

impl BatchConfig {
    /// resolve one parameter point into the settings a run sees
    pub fn run_config(&self, spec: &RunSpec) -> RunConfig {
        RunConfig {
            bot1: BotConfig {
                cmd: self.p1_cmd.clone(),
                memory: self.p1_memory,
                timeout_announce: self.p1_timeout_announce,
                timeout_cutoff: self.p1_timeout_cutoff,
                timeout_game: self.p1_timeout_game,
                max_nodes: spec.p1_nodes,
            },
            bot2: BotConfig {
                cmd: self.p2_cmd.clone(),
                memory: self.p2_memory,
                timeout_announce: self.p2_timeout_announce,
                timeout_cutoff: self.p2_timeout_cutoff,
                timeout_game: self.p2_timeout_game,
                max_nodes: spec.p2_nodes,
            },
            eval_cmd: self.eval_cmd.clone(),
            eval_cutoff: if self.eval_timeout_cutoff > 0 {
                self.eval_timeout_cutoff
            } else {
                DEFAULT_EVAL_CUTOFF_MS
            },
            eval_max_nodes: spec.eval_nodes,
            board_size: self.board_size,
            threads: self.threads,
            min_pairs: spec.min_pairs,
            max_pairs: spec.max_pairs,
            risk: self.risk,
            debounce_ms: self.debounce_ms,
            seed: spec.seed,
            repeat_index: spec.repeat_index,
            debug: self.debug,
            show_board: self.show_board,
            exit_on_crash: self.exit_on_crash,
        }
    }
}
