use super::config::RunConfig;
use super::config::RunSpec;
use crate::BotId;
use crate::Millis;
use crate::Nodes;
use crate::Score;
use crate::board::Point;
use crate::error::Error;
use crate::error::Result;
use crate::stats::Tracker;
use crate::subprocess::CpuTimes;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::Once;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicI64;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;
use std::time::Instant;

const LEG_UNSET: Score = -5.0;
const LEG_SET_THRESHOLD: Score = -1.5;

/// Pair outcome bookkeeping for one run. Each leg reports a score from the
/// perspective of the player holding black; a pair counts toward
/// win/loss/draw only once both legs are in.
#[derive(Debug, Default)]
pub struct PairBook {
    legs: HashMap<u32, (Score, Score)>,
    pub pairs_done: u32,
    pub wins: u32,
    pub losses: u32,
    pub draws: u32,
}

impl PairBook {
    /// Record one leg result (P1 perspective within the run); returns true
    /// when this completed the pair.
    pub fn record(&mut self, pair: u32, leg: u8, p1_score: Score) -> bool {
        let slot = self.legs.entry(pair).or_insert((LEG_UNSET, LEG_UNSET));
        if leg == 0 {
            slot.0 = p1_score;
        } else {
            slot.1 = p1_score;
        }
        if slot.0 > LEG_SET_THRESHOLD && slot.1 > LEG_SET_THRESHOLD {
            self.pairs_done += 1;
            let total = slot.0 + (1.0 - slot.1);
            if total > 1.0 {
                self.wins += 1;
            } else if total < 1.0 {
                self.losses += 1;
            } else {
                self.draws += 1;
            }
            return true;
        }
        false
    }
}

/// the two bot identities announced over ABOUT, captured once per run
#[derive(Debug, Clone, Default)]
pub struct BotNames {
    pub p1_name: String,
    pub p1_version: String,
    pub p2_name: String,
    pub p2_version: String,
}

/// Shared state of one run: the immutable spec plus every aggregate its
/// games mutate. One context per run; every game descriptor and outcome
/// callback holds it by `Arc`.
#[derive(Debug)]
pub struct RunContext {
    pub id: String,
    pub label: String,
    pub run: RunConfig,
    pub spec: RunSpec,
    pub stats: Tracker,
    pub pairs: Mutex<PairBook>,
    pub names: Mutex<Option<BotNames>>,

    pub expected_games: u32,
    pub games_completed: AtomicU32,
    pub games_skipped: AtomicU32,
    pub stop: AtomicBool,
    finalized: Once,

    pub started: Instant,
    pub started_cpu: CpuTimes,
    pub total_wall_ms: AtomicI64,
    pub total_p1_cpu: AtomicI64,
    pub total_p2_cpu: AtomicI64,
    pub total_p1_wall: AtomicI64,
    pub total_p2_wall: AtomicI64,
    last_update: Mutex<Instant>,
}

impl RunContext {
    pub fn new(id: String, label: String, run: RunConfig, spec: RunSpec) -> Self {
        let expected_games = 2 * run.max_pairs;
        Self {
            id,
            label,
            run,
            spec,
            stats: Tracker::default(),
            pairs: Mutex::new(PairBook::default()),
            names: Mutex::new(None),
            expected_games,
            games_completed: AtomicU32::new(0),
            games_skipped: AtomicU32::new(0),
            stop: AtomicBool::new(false),
            finalized: Once::new(),
            started: Instant::now(),
            started_cpu: CpuTimes::sample(std::process::id() as i32),
            total_wall_ms: AtomicI64::new(0),
            total_p1_cpu: AtomicI64::new(0),
            total_p2_cpu: AtomicI64::new(0),
            total_p1_wall: AtomicI64::new(0),
            total_p2_wall: AtomicI64::new(0),
            last_update: Mutex::new(Instant::now()),
        }
    }

    /// run the closure at most once over the context's lifetime
    pub fn finalize_once(&self, body: impl FnOnce()) {
        self.finalized.call_once(body);
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized.is_completed()
    }

    pub fn done(&self) -> bool {
        self.games_completed.load(Ordering::Relaxed) + self.games_skipped.load(Ordering::Relaxed)
            >= self.expected_games
    }

    /// debounce gate for run_update events; claims the send slot when open
    pub fn should_send_update(&self) -> bool {
        let mut last = self.last_update.lock().expect("context lock");
        if last.elapsed().as_millis() as Millis >= self.run.debounce_ms {
            *last = Instant::now();
            return true;
        }
        false
    }
}

/// one pending game: a leg of a pair, with leg-local bot configs (leg 1
/// plays the same pairing with colors swapped)
#[derive(Clone, Debug)]
pub struct GameSpec {
    pub pair: u32,
    pub leg: u8,
    pub black: super::config::BotConfig,
    pub white: super::config::BotConfig,
    pub opening: Vec<Point>,
    pub seed: Option<u64>,
    pub ctx: Arc<RunContext>,
}

impl GameSpec {
    pub fn external_id(&self) -> String {
        format!("{}_{}_{}", self.ctx.id, self.pair, self.leg)
    }

    /// translate a leg-local black/white side into the run-level bot id
    pub fn run_level_bot(&self, black: bool) -> BotId {
        if (self.leg == 0) == black { 1 } else { 2 }
    }
}

/// one analysis request produced by a finished ply
pub struct EvalJob {
    pub moves: Vec<Point>,
    pub bot: BotId,
    pub ctx: Arc<RunContext>,
    pub max_nodes: Nodes,
}

/// fields reported by a finished game to the run controller
#[derive(Debug, Clone, Copy)]
pub struct GameOutcome {
    pub pair: u32,
    pub leg: u8,
    /// score of the player holding black in this leg
    pub black_score: Score,
    pub wall_ms: Millis,
    pub p1_cpu_ms: Millis,
    pub p2_cpu_ms: Millis,
}

/// Produce the `2 * max_pairs` descriptors of one run, legs paired with
/// swapped colors and openings rotating per pair. Out-of-bounds opening
/// cells are a config error caught before anything is queued.
pub fn pending_games(ctx: &Arc<RunContext>, openings: &[Vec<Point>]) -> Result<Vec<GameSpec>> {
    let run = &ctx.run;
    let mut games = Vec::with_capacity(2 * run.max_pairs as usize);
    for pair in 1..=run.max_pairs {
        let opening = if openings.is_empty() {
            Vec::new()
        } else {
            openings[(pair as usize - 1) % openings.len()].clone()
        };
        for mv in &opening {
            if mv.x < 0
                || mv.x as usize >= run.board_size
                || mv.y < 0
                || mv.y as usize >= run.board_size
            {
                return Err(Error::Config(format!("opening move out of bounds: {mv}")));
            }
        }
        games.push(GameSpec {
            pair,
            leg: 0,
            black: run.bot1.clone(),
            white: run.bot2.clone(),
            opening: opening.clone(),
            seed: run.seed,
            ctx: Arc::clone(ctx),
        });
        games.push(GameSpec {
            pair,
            leg: 1,
            black: run.bot2.clone(),
            white: run.bot1.clone(),
            opening,
            seed: run.seed,
            ctx: Arc::clone(ctx),
        });
    }
    Ok(games)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tournament::BatchConfig;

    fn ctx() -> Arc<RunContext> {
        let bc = BatchConfig {
            p1_cmd: "./a".into(),
            p2_cmd: "./b".into(),
            board_size: 20,
            min_pairs: vec![5],
            max_pairs: vec![10],
            repeat: 1,
            ..Default::default()
        };
        let spec = RunSpec::default();
        let run = bc.run_config(&spec);
        Arc::new(RunContext::new("run1".into(), "default".into(), run, spec))
    }

    #[test]
    fn pair_counts_only_when_both_legs_report() {
        let mut book = PairBook::default();
        assert!(!book.record(1, 0, 1.0));
        assert_eq!(book.pairs_done, 0);
        assert!(book.record(1, 1, 0.0));
        assert_eq!(book.pairs_done, 1);
        assert_eq!(book.wins, 1);
    }

    #[test]
    fn leg_order_does_not_matter() {
        let mut book = PairBook::default();
        assert!(!book.record(3, 1, 0.5));
        assert!(book.record(3, 0, 0.5));
        assert_eq!(book.pairs_done, 1);
        assert_eq!(book.draws, 1);
    }

    #[test]
    fn pair_categorization() {
        let mut book = PairBook::default();
        // leg0 win + leg1 loss for the black-side player = draw for P1
        book.record(1, 0, 1.0);
        book.record(1, 1, 1.0);
        assert_eq!((book.wins, book.losses, book.draws), (0, 0, 1));

        book.record(2, 0, 1.0);
        book.record(2, 1, 0.5);
        assert_eq!((book.wins, book.losses, book.draws), (1, 0, 1));

        book.record(3, 0, 0.0);
        book.record(3, 1, 1.0);
        assert_eq!((book.wins, book.losses, book.draws), (1, 1, 1));
    }

    #[test]
    fn zero_score_is_not_the_sentinel() {
        let mut book = PairBook::default();
        book.record(1, 0, 0.0);
        assert_eq!(book.pairs_done, 0);
        book.record(1, 1, 0.0);
        assert_eq!(book.pairs_done, 1);
        assert_eq!(book.losses, 0);
        assert_eq!(book.wins, 0);
        assert_eq!(book.draws, 1);
    }

    #[test]
    fn finalize_runs_exactly_once() {
        let ctx = ctx();
        let mut calls = 0;
        ctx.finalize_once(|| calls += 1);
        ctx.finalize_once(|| calls += 1);
        assert_eq!(calls, 1);
        assert!(ctx.is_finalized());
    }

    #[test]
    fn descriptors_swap_colors_between_legs() {
        let ctx = ctx();
        let games = pending_games(&ctx, &[]).unwrap();
        assert_eq!(games.len(), 2 * ctx.run.max_pairs as usize);
        let leg0 = &games[0];
        let leg1 = &games[1];
        assert_eq!(leg0.pair, 1);
        assert_eq!(leg0.black.cmd, "./a");
        assert_eq!(leg1.black.cmd, "./b");
        assert_eq!(leg0.run_level_bot(true), 1);
        assert_eq!(leg0.run_level_bot(false), 2);
        assert_eq!(leg1.run_level_bot(true), 2);
        assert_eq!(leg1.run_level_bot(false), 1);
    }

    #[test]
    fn openings_rotate_per_pair() {
        let ctx = ctx();
        let openings = vec![vec![Point::new(0, 0)], vec![Point::new(1, 1)]];
        let games = pending_games(&ctx, &openings).unwrap();
        assert_eq!(games[0].opening, openings[0]);
        assert_eq!(games[1].opening, openings[0]);
        assert_eq!(games[2].opening, openings[1]);
        assert_eq!(games[4].opening, openings[0]);
    }

    #[test]
    fn out_of_bounds_opening_is_a_config_error() {
        let ctx = ctx();
        let err = pending_games(&ctx, &[vec![Point::new(99, 0)]]).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn debounce_gate_claims_the_slot() {
        let ctx = ctx();
        // debounce_ms is zero by default in tests: always open
        assert!(ctx.should_send_update());
    }

    #[test]
    fn external_ids_name_run_pair_and_leg() {
        let ctx = ctx();
        let games = pending_games(&ctx, &[]).unwrap();
        assert_eq!(games[3].external_id(), "run1_2_1");
    }
}
