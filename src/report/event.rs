use crate::Millis;
use crate::Nodes;
use serde::Serialize;

/// One progress event for the HTTP sink. Serialized shapes are part of the
/// remote contract: the `type` tag plus the per-kind payload fields.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    RunStart {
        run_id: String,
        p1_name: String,
        p1_version: String,
        p2_name: String,
        p2_version: String,
        config_label: String,
        total_games: u32,
        p1_nodes: Nodes,
        p2_nodes: Nodes,
        eval_nodes: Nodes,
        board_size: usize,
        min_pairs: u32,
        max_pairs: u32,
        repeat_index: u32,
        seed: Option<u64>,
    },
    RunUpdate {
        run_id: String,
        games_played: u32,
        wins: u32,
        losses: u32,
        draws: u32,
        wall_time_ms: Millis,
        arena_load: f64,
        p1_efficiency: f64,
        p2_efficiency: f64,
        p1_elo: i32,
        p1_dqi: f64,
        p1_cma: f64,
        p1_blunder: f64,
        p1_crashes: u32,
        p2_elo: i32,
        p2_dqi: f64,
        p2_cma: f64,
        p2_blunder: f64,
        p2_crashes: u32,
        is_done: bool,
    },
    Start {
        external_id: String,
        run_id: String,
        p1n: String,
        p1v: String,
        p2n: String,
        p2v: String,
        black_is_p1: bool,
    },
    Move {
        external_id: String,
        x: i32,
        y: i32,
        c: u8,
    },
    Result {
        external_id: String,
        winner: u8,
        moves: String,
    },
}
