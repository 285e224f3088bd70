use super::batch;
use super::config::BatchConfig;
use super::context::EvalJob;
use super::context::GameOutcome;
use super::context::GameSpec;
use super::context::RunContext;
use super::context::pending_games;
use super::referee::Referee;
use super::referee::ResultFn;
use super::scheduler::Pool;
use crate::DEFAULT_EVAL_CUTOFF_MS;
use crate::DEFAULT_EVAL_NODES;
use crate::Millis;
use crate::Nodes;
use crate::analysis::Evaluator;
use crate::analysis::cache;
use crate::board::openings;
use crate::error::Error;
use crate::error::Result;
use crate::report::Event;
use crate::report::Reporter;
use crate::stats::is_blunder;
use crate::stats::sprt;
use crate::subprocess::CpuTimes;
use crate::subprocess::stop;
use rand::seq::SliceRandom;
use serde::Serialize;
use std::collections::VecDeque;
use std::fs::File;
use std::io::BufWriter;
use std::io::Write;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicI64;
use std::sync::atomic::Ordering;
use std::time::Instant;

/// one NDJSON line per finalized run
#[derive(Serialize)]
struct RunRecord<'a> {
    p1_cmd: &'a str,
    p2_cmd: &'a str,
    p1_nodes: Nodes,
    p2_nodes: Nodes,
    eval_nodes: Nodes,
    board_size: usize,
    min_pairs: u32,
    max_pairs: u32,
    repeat_index: u32,
    seed: Option<u64>,
    duration: f64,
    arena_load: f64,
    p1_efficiency: f64,
    p2_efficiency: f64,
    wins: u32,
    losses: u32,
    draws: u32,
    pairs: u32,
    p1: SideRecord,
    p2: SideRecord,
}

#[derive(Serialize)]
struct SideRecord {
    elo: i32,
    sw_dqi: f64,
    cma: f64,
    blunder: f64,
    crashes: u32,
}

/// Run lifecycle controller: reacts to finished games, evaluates the
/// early-stop rule, and finalizes each run exactly once — terminal
/// run_update, NDJSON line, summary log.
pub struct Controller {
    batch: BatchConfig,
    reporter: Option<Arc<Reporter>>,
    export: Option<Mutex<BufWriter<File>>>,
}

impl Controller {
    pub fn new(batch: BatchConfig, reporter: Option<Arc<Reporter>>) -> Result<Self> {
        let export = match &batch.export_results {
            Some(path) => {
                let file = File::create(path).map_err(|e| {
                    Error::Config(format!("cannot open export file {}: {e}", path.display()))
                })?;
                Some(Mutex::new(BufWriter::new(file)))
            }
            None => None,
        };
        Ok(Self {
            batch,
            reporter,
            export,
        })
    }

    /// Each worker owns one evaluator subprocess; a failed start disables
    /// analysis on that worker rather than failing the batch.
    pub fn make_evaluator(&self) -> Option<Evaluator> {
        if self.batch.eval_cmd.is_empty() {
            return None;
        }
        let cutoff = if self.batch.eval_timeout_cutoff > 0 {
            self.batch.eval_timeout_cutoff
        } else {
            DEFAULT_EVAL_CUTOFF_MS
        };
        let nodes = self
            .batch
            .eval_nodes
            .first()
            .copied()
            .unwrap_or(DEFAULT_EVAL_NODES);
        let mut eval = Evaluator::new(
            &self.batch.eval_cmd,
            self.batch.board_size,
            cutoff,
            self.batch.exit_on_crash,
            nodes,
        );
        if eval.start() { Some(eval) } else { None }
    }

    /// build a referee whose completion callback lands back here
    pub fn admit(ctrl: &Arc<Self>, spec: GameSpec) -> Referee {
        let controller = Arc::clone(ctrl);
        let ctx = Arc::clone(&spec.ctx);
        let reporter = ctrl.reporter.clone();
        let on_result: ResultFn =
            Box::new(move |outcome| controller.on_game_finished(&ctx, outcome));
        Referee::new(spec, reporter, on_result)
    }

    /// Completion callback for each finished leg: Elo, pair bookkeeping,
    /// the early-stop test, debounced progress, and the finalization
    /// trigger.
    fn on_game_finished(&self, ctx: &Arc<RunContext>, outcome: &GameOutcome) {
        let p1_score = if outcome.leg == 0 {
            outcome.black_score
        } else {
            1.0 - outcome.black_score
        };
        ctx.stats.update_elo(p1_score);
        ctx.total_wall_ms.fetch_add(outcome.wall_ms, Ordering::Relaxed);

        {
            let mut pairs = ctx.pairs.lock().expect("context lock");
            if pairs.record(outcome.pair, outcome.leg, outcome.black_score)
                && sprt::early_stop(&pairs, ctx.run.min_pairs, ctx.run.max_pairs, ctx.run.risk)
            {
                ctx.stop.store(true, Ordering::Relaxed);
            }
        }

        if self.reporter.is_some() && ctx.should_send_update() {
            let games_played = ctx.games_completed.load(Ordering::Relaxed) + 1;
            self.send_run_update(ctx, games_played, false);
        }

        ctx.games_completed.fetch_add(1, Ordering::Relaxed);
        if ctx.done() {
            self.finalize(ctx);
        }
    }

    /// Finalize a run exactly once: totals, terminal event, NDJSON line,
    /// summary. Fires when completed + skipped reaches the expected count,
    /// from whichever worker gets there first.
    pub fn finalize(&self, ctx: &Arc<RunContext>) {
        ctx.finalize_once(|| {
            if self.reporter.is_some() {
                self.send_run_update(ctx, ctx.expected_games, true);
            }
            if let Some(out) = &self.export {
                let line = self.record_line(ctx);
                let mut out = out.lock().expect("export lock");
                if writeln!(out, "{line}").and_then(|_| out.flush()).is_err() {
                    log::error!("cannot write result line for run {}", ctx.id);
                }
            }
            log::info!("Run {} finished (ID: {})", ctx.label, ctx.id);
            ctx.stats.log_summary();
        });
    }

    fn send_run_update(&self, ctx: &Arc<RunContext>, games_played: u32, is_done: bool) {
        let Some(reporter) = &self.reporter else {
            return;
        };
        let snap = ctx.stats.snapshot();
        let (wins, losses, draws) = {
            let pairs = ctx.pairs.lock().expect("context lock");
            (pairs.wins, pairs.losses, pairs.draws)
        };
        let (load, p1_efficiency, p2_efficiency) = resource_rates(ctx);
        reporter.enqueue(Event::RunUpdate {
            run_id: ctx.id.clone(),
            games_played,
            wins,
            losses,
            draws,
            wall_time_ms: ctx.total_wall_ms.load(Ordering::Relaxed),
            arena_load: load,
            p1_efficiency,
            p2_efficiency,
            p1_elo: snap.p1_elo,
            p1_dqi: snap.p1.dqi(),
            p1_cma: snap.p1.cma(),
            p1_blunder: snap.p1.blunder(),
            p1_crashes: snap.p1_crashes,
            p2_elo: snap.p2_elo,
            p2_dqi: snap.p2.dqi(),
            p2_cma: snap.p2.cma(),
            p2_blunder: snap.p2.blunder(),
            p2_crashes: snap.p2_crashes,
            is_done,
        });
    }

    fn record_line(&self, ctx: &Arc<RunContext>) -> String {
        let snap = ctx.stats.snapshot();
        let pairs = ctx.pairs.lock().expect("context lock");
        let (load, p1_efficiency, p2_efficiency) = resource_rates(ctx);
        let record = RunRecord {
            p1_cmd: &self.batch.p1_cmd,
            p2_cmd: &self.batch.p2_cmd,
            p1_nodes: ctx.spec.p1_nodes,
            p2_nodes: ctx.spec.p2_nodes,
            eval_nodes: ctx.spec.eval_nodes,
            board_size: ctx.run.board_size,
            min_pairs: ctx.run.min_pairs,
            max_pairs: ctx.run.max_pairs,
            repeat_index: ctx.run.repeat_index,
            seed: ctx.run.seed,
            duration: ctx.started.elapsed().as_millis() as f64 / 1_000.0,
            arena_load: load,
            p1_efficiency,
            p2_efficiency,
            wins: pairs.wins,
            losses: pairs.losses,
            draws: pairs.draws,
            pairs: pairs.pairs_done,
            p1: SideRecord {
                elo: snap.p1_elo,
                sw_dqi: snap.p1.dqi(),
                cma: snap.p1.cma(),
                blunder: snap.p1.blunder(),
                crashes: snap.p1_crashes,
            },
            p2: SideRecord {
                elo: snap.p2_elo,
                sw_dqi: snap.p2.dqi(),
                cma: snap.p2.cma(),
                blunder: snap.p2.blunder(),
                crashes: snap.p2_crashes,
            },
        };
        serde_json::to_string(&record).unwrap_or_else(|e| {
            log::error!("cannot serialize result record: {e}");
            String::from("{}")
        })
    }

    /// One eval task: probe the cache, consult the engine on a miss, fold
    /// regret and sharpness into the mover's aggregates unless the
    /// position is garbage time.
    pub fn run_eval(&self, eval: Option<&mut Evaluator>, job: &EvalJob) -> Result<()> {
        let Some(eval) = eval else {
            return Ok(());
        };
        let debug = job.ctx.run.debug;
        let ply = job.moves.len();
        let h = cache::hash(&job.moves);
        let metrics = match cache::get(h) {
            Some(metrics) => {
                if debug {
                    log::debug!("[CACHE HIT] Move {ply} hash={h}");
                }
                metrics
            }
            None => {
                if debug {
                    log::debug!("[CACHE MISS] Move {ply} hash={h}");
                }
                let cpu_start = debug.then(|| CpuTimes::sample(eval.pid()));
                let queried = Instant::now();
                eval.set_max_nodes(job.max_nodes);
                let metrics = eval.analyze(&job.moves)?;
                cache::set(h, metrics);
                if let Some(cpu_start) = cpu_start {
                    let wall_ms = queried.elapsed().as_millis() as Millis;
                    let cpu_end = CpuTimes::sample(eval.pid());
                    let cpu_ms = CpuTimes::delta_ms(&cpu_start, &cpu_end);
                    let load = CpuTimes::load_pct(&cpu_start, &cpu_end, wall_ms);
                    log::debug!(
                        "Eval Move {ply} | Wall: {wall_ms}ms | CPU: {cpu_ms}ms | Load: {}%",
                        load as i32
                    );
                }
                metrics
            }
        };

        if metrics.garbage_time() {
            if debug {
                log::debug!("Move {ply} SKIPPED (Garbage Time p_best={:.3})", metrics.p_best);
            }
            return Ok(());
        }
        let regret = metrics.regret();
        let sharpness = metrics.sharpness();
        if debug {
            log::debug!(
                "Move {ply} P{} | p_best={:.4} p_second={:.4} p_played={:.4} | Regret={regret:.4} Sharpness={sharpness:.4}",
                job.bot,
                metrics.p_best,
                metrics.p_second,
                metrics.p_played,
            );
        }
        if is_blunder(regret) {
            log::warn!(
                ">>> BLUNDER <<< Move {ply} P{} Regret={regret:.3} (played={:.3} vs best={:.3})",
                job.bot,
                metrics.p_played,
                metrics.p_best,
            );
        }
        job.ctx.stats.add_metrics(job.bot, regret, sharpness);
        Ok(())
    }
}

/// process CPU load since run start plus per-player cpu/wall efficiency
fn resource_rates(ctx: &RunContext) -> (f64, f64, f64) {
    let run_wall = ctx.started.elapsed().as_millis() as Millis;
    let now = CpuTimes::sample(std::process::id() as i32);
    let load = CpuTimes::load_pct(&ctx.started_cpu, &now, run_wall);
    (
        load,
        efficiency(&ctx.total_p1_cpu, &ctx.total_p1_wall),
        efficiency(&ctx.total_p2_cpu, &ctx.total_p2_wall),
    )
}

fn efficiency(cpu: &AtomicI64, wall: &AtomicI64) -> f64 {
    let wall = wall.load(Ordering::Relaxed);
    if wall <= 0 {
        return 0.0;
    }
    cpu.load(Ordering::Relaxed) as f64 * 100.0 / wall as f64
}

/// Drive a whole batch to completion: expand the runs, queue every game,
/// run the worker pool, and hand the contexts back for the final summary.
pub fn run_batch(bc: &BatchConfig) -> Result<Vec<Arc<RunContext>>> {
    cache::init(bc.board_size);

    let reporter = if bc.api_url.is_empty() {
        None
    } else {
        let reporter = Arc::new(Reporter::start(&bc.api_url, &bc.api_key, bc.debounce_ms));
        if bc.cleanup {
            reporter.reset();
        }
        Some(reporter)
    };

    let openings = match &bc.openings_path {
        Some(path) => {
            let mut openings = openings::load(path)?;
            if openings.is_empty() {
                return Err(Error::Config(format!(
                    "no openings found in: {}",
                    path.display()
                )));
            }
            if bc.shuffle_openings {
                openings.shuffle(&mut rand::rng());
            }
            openings
        }
        None => Vec::new(),
    };

    let controller = Arc::new(Controller::new(bc.clone(), reporter.clone())?);
    let runs = batch::expand(bc);
    log::info!("Starting {} batch configuration(s)", runs.len());

    let mut contexts = Vec::new();
    let mut pending = VecDeque::new();
    for (i, spec) in runs.iter().enumerate() {
        let run = bc.run_config(spec);
        let label = batch::label(&run);
        let ctx = Arc::new(RunContext::new(batch::run_id(), label, run, *spec));
        log::info!(
            "[{}/{}] Creating run {} ({}) N1={} N2={} pairs={}-{}",
            i + 1,
            runs.len(),
            ctx.id,
            ctx.label,
            spec.p1_nodes,
            spec.p2_nodes,
            spec.min_pairs,
            spec.max_pairs,
        );
        pending.extend(pending_games(&ctx, &openings)?);
        contexts.push(ctx);
    }
    log::info!("Queued {} games.", pending.len());

    stop::clear();
    Pool::new(Arc::clone(&controller), bc.threads, pending).run();

    if let Some(reporter) = reporter {
        reporter.stop();
    }
    Ok(contexts)
}
