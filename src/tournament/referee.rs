use super::config::BotConfig;
use super::config::is_rapfi;
use super::context::BotNames;
use super::context::GameOutcome;
use super::context::GameSpec;
use super::context::RunContext;
use super::player::Player;
use crate::BotId;
use crate::MIN_TURN_TIMEOUT_MS;
use crate::Millis;
use crate::RAPFI_MEMORY_OVERHEAD;
use crate::Score;
use crate::board::Board;
use crate::board::Point;
use crate::board::Stone;
use crate::error::Error;
use crate::error::Result;
use crate::report::Event;
use crate::report::Reporter;
use crate::subprocess::CpuTimes;
use crate::subprocess::stop;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Running,
    Finished,
}

/// what one scheduler step produced
pub struct Step {
    pub status: Status,
    /// history snapshot when the step applied a move; feeds the evaluator
    pub position: Option<Vec<Point>>,
}

impl Step {
    fn running() -> Self {
        Self {
            status: Status::Running,
            position: None,
        }
    }
    fn finished() -> Self {
        Self {
            status: Status::Finished,
            position: None,
        }
    }
}

pub type ResultFn = Box<dyn Fn(&GameOutcome) + Send + Sync>;

enum State {
    Uninitialized,
    Initialized,
}

/// Per-game state machine driving two bot subprocesses one ply at a time.
///
/// The first `step()` spawns and initializes both bots and applies the
/// opening; every later step plays exactly one move. Player errors cost
/// the offender the game (or terminate the match in strict mode); the
/// completion callback fires exactly once, from `finish`.
pub struct Referee {
    spec: GameSpec,
    reporter: Option<Arc<Reporter>>,
    on_result: ResultFn,
    black: Player,
    white: Player,
    black_cutoff: Millis,
    white_cutoff: Millis,
    black_bank: Millis,
    white_bank: Millis,
    black_cpu_ms: Millis,
    white_cpu_ms: Millis,
    board: Board,
    hist: Vec<Point>,
    moves: usize,
    state: State,
    started: Instant,
    start_sent: bool,
    result_sent: bool,
}

impl Referee {
    pub fn new(spec: GameSpec, reporter: Option<Arc<Reporter>>, on_result: ResultFn) -> Self {
        let board = Board::new(spec.ctx.run.board_size);
        let black = Player::new(&spec.black.cmd, "P1");
        let white = Player::new(&spec.white.cmd, "P2");
        let black_bank = spec.black.timeout_game;
        let white_bank = spec.white.timeout_game;
        Self {
            spec,
            reporter,
            on_result,
            black,
            white,
            black_cutoff: 0,
            white_cutoff: 0,
            black_bank,
            white_bank,
            black_cpu_ms: 0,
            white_cpu_ms: 0,
            board,
            hist: Vec::new(),
            moves: 0,
            state: State::Uninitialized,
            started: Instant::now(),
            start_sent: false,
            result_sent: false,
        }
    }

    pub fn ctx(&self) -> &Arc<RunContext> {
        &self.spec.ctx
    }

    pub fn opening_len(&self) -> usize {
        self.spec.opening.len()
    }

    /// run-level id of the bot that played the latest move
    pub fn last_mover(&self) -> BotId {
        if self.moves == 0 {
            return 0;
        }
        self.spec.run_level_bot(self.moves % 2 == 1)
    }

    /// Advance the game and absorb errors per the taxonomy: player errors
    /// lose the game for the mover, termination propagates after closing
    /// the books, anything else counts as a crash of the mover.
    pub fn step(&mut self) -> Result<Step> {
        match self.advance() {
            Ok(step) => Ok(step),
            Err(Error::Player(msg)) => {
                log::warn!(
                    "Pair {} Leg {} Player Error: {msg}",
                    self.spec.pair,
                    self.spec.leg
                );
                if self.spec.ctx.run.exit_on_crash {
                    log::error!("STRICT MODE: Exiting due to player error: {msg}");
                    self.spec.ctx.stats.add_crash(self.offender());
                    stop::request();
                    return Err(Error::Terminated);
                }
                let black_at_fault = self.to_move() == Stone::Black;
                self.finish(if black_at_fault { 0.0 } else { 1.0 });
                Ok(Step::finished())
            }
            Err(Error::Terminated) => {
                match self.state {
                    State::Initialized => self.finish(0.5),
                    State::Uninitialized => {
                        self.black.stop();
                        self.white.stop();
                    }
                }
                Err(Error::Terminated)
            }
            Err(e) => {
                log::error!(
                    "Pair {} Leg {} System Error: {e}",
                    self.spec.pair,
                    self.spec.leg
                );
                if self.spec.ctx.run.exit_on_crash {
                    log::error!("STRICT MODE: Exiting due to system error: {e}");
                    stop::request();
                    return Err(Error::Terminated);
                }
                self.spec.ctx.stats.add_crash(self.offender());
                let black_at_fault = self.to_move() == Stone::Black;
                self.finish(if black_at_fault { 0.0 } else { 1.0 });
                Ok(Step::finished())
            }
        }
    }

    fn advance(&mut self) -> Result<Step> {
        match self.state {
            State::Uninitialized => {
                self.initialize()?;
                Ok(Step::running())
            }
            State::Initialized => self.play_turn(),
        }
    }

    fn initialize(&mut self) -> Result<()> {
        self.state = State::Initialized;
        self.run_start_if_first();

        let env = match self.spec.seed {
            Some(seed) => vec![("GOMOKU_SEED".to_string(), seed.to_string())],
            None => Vec::new(),
        };
        let mem_black = memory_with_overhead(&self.spec.black);
        let mem_white = memory_with_overhead(&self.spec.white);
        self.black.start(mem_black, &env)?;
        self.white.start(mem_white, &env)?;
        self.black.meta()?;
        self.white.meta()?;
        self.emit_start();
        self.black_cutoff = init_protocol(&mut self.black, &self.spec.black, self.board.size())?;
        self.white_cutoff = init_protocol(&mut self.white, &self.spec.white, self.board.size())?;
        self.apply_openings()?;
        Ok(())
    }

    fn apply_openings(&mut self) -> Result<()> {
        for mv in self.spec.opening.clone() {
            if !self.board.in_bounds(mv) {
                return Err(Error::Config(format!("opening move out of bounds: {mv}")));
            }
            if !self.board.is_empty(mv) {
                return Err(Error::Config(format!("opening move on occupied cell: {mv}")));
            }
            let stone = Stone::of_ply(self.moves);
            self.board.place(mv, stone);
            self.hist.push(mv);
            self.moves += 1;
            self.emit_move(mv, stone);
        }
        Ok(())
    }

    fn play_turn(&mut self) -> Result<Step> {
        let size = self.board.size();
        if self.moves >= size * size {
            self.finish(0.5);
            return Ok(Step::finished());
        }
        let stone = self.to_move();
        let black = stone == Stone::Black;

        let bank = if black { self.black_bank } else { self.white_bank };
        if bank > 0 {
            let line = format!("INFO time_left {bank}");
            self.mover(black).send(&line)?;
        }
        let cpu_start = CpuTimes::sample(self.mover(black).pid());
        self.send_turn_command(black)?;
        let cutoff = if black { self.black_cutoff } else { self.white_cutoff };
        let (reply, elapsed) = self.read_move(black, cutoff)?;

        if bank > 0 {
            let left = bank - elapsed;
            if black {
                self.black_bank = left;
            } else {
                self.white_bank = left;
            }
            if left < 0 {
                return Err(Error::Player("Game timeout".into()));
            }
        }

        let mv = self.parse_move(&reply)?;
        self.board.place(mv, stone);
        self.hist.push(mv);
        self.moves += 1;
        self.emit_move(mv, stone);

        let cpu_end = CpuTimes::sample(self.mover(black).pid());
        let cpu_delta = CpuTimes::delta_ms(&cpu_start, &cpu_end);
        if black {
            self.black_cpu_ms += cpu_delta;
        } else {
            self.white_cpu_ms += cpu_delta;
        }
        let ctx = &self.spec.ctx;
        if self.spec.run_level_bot(black) == 1 {
            ctx.total_p1_cpu.fetch_add(cpu_delta, Ordering::Relaxed);
            ctx.total_p1_wall.fetch_add(elapsed, Ordering::Relaxed);
        } else {
            ctx.total_p2_cpu.fetch_add(cpu_delta, Ordering::Relaxed);
            ctx.total_p2_wall.fetch_add(elapsed, Ordering::Relaxed);
        }

        if ctx.run.debug {
            let load = CpuTimes::load_pct(&cpu_start, &cpu_end, elapsed);
            log::debug!(
                "Move {} ({}): {mv} | Wall: {elapsed}ms | CPU: {cpu_delta}ms | Load: {}%",
                self.moves,
                if black { "P1" } else { "P2" },
                load as i32,
            );
        }
        if ctx.run.show_board {
            log::info!(
                "P1: {} [X] vs P2: {} [O]",
                self.black.name(),
                self.white.name()
            );
            log::info!("{}", self.board.render());
        }

        if self.board.wins(mv, stone) {
            let position = self.hist.clone();
            self.finish(if black { 1.0 } else { 0.0 });
            return Ok(Step {
                status: Status::Finished,
                position: Some(position),
            });
        }
        Ok(Step {
            status: Status::Running,
            position: Some(self.hist.clone()),
        })
    }

    /// Each player's first move gets the full position (`BEGIN` on an
    /// empty board, a `BOARD` reconstruction otherwise); afterwards only
    /// the opponent's reply via `TURN`.
    fn send_turn_command(&mut self, black: bool) -> Result<()> {
        if self.moves <= self.spec.opening.len() + 1 {
            if self.moves > 0 {
                let mut block = String::from("BOARD");
                for (i, mv) in self.hist.iter().enumerate() {
                    block.push_str(&format!("\n{mv},{}", Stone::of_ply(i).code()));
                }
                block.push_str("\nDONE");
                self.mover(black).send(&block)
            } else {
                self.mover(black).send("BEGIN")
            }
        } else {
            let last = self.hist[self.hist.len() - 1];
            let line = format!("TURN {last}");
            self.mover(black).send(&line)
        }
    }

    /// tolerate a stray protocol `OK` ahead of the move, shrinking the
    /// deadline by the time it burned
    fn read_move(&mut self, black: bool, cutoff: Millis) -> Result<(String, Millis)> {
        let mut remaining = cutoff;
        let mut total = 0;
        loop {
            let (reply, elapsed) = self.mover(black).read(remaining)?;
            total += elapsed;
            if reply == "OK" {
                remaining = (remaining - elapsed).max(MIN_TURN_TIMEOUT_MS);
                continue;
            }
            return Ok((reply, total));
        }
    }

    fn parse_move(&self, reply: &str) -> Result<Point> {
        let mv = Point::parse(reply)
            .ok_or_else(|| Error::Player(format!("Invalid move: {reply:?}")))?;
        if !self.board.in_bounds(mv) {
            return Err(Error::Player(format!("Move out of bounds: {mv}")));
        }
        if !self.board.is_empty(mv) {
            return Err(Error::Player(format!("Cell occupied: {mv}")));
        }
        Ok(mv)
    }

    /// Close the game: terminate both bots, emit the result event, and
    /// hand the outcome to the run controller. `black_score` is from the
    /// perspective of the player holding black in this leg.
    fn finish(&mut self, black_score: Score) {
        self.result_sent = true;
        self.black.stop();
        self.white.stop();
        log::info!(
            "Peak Memory: P1={}KB P2={}KB",
            self.black.peak_mem_kb(),
            self.white.peak_mem_kb()
        );
        self.emit_result(black_score);
        let outcome = GameOutcome {
            pair: self.spec.pair,
            leg: self.spec.leg,
            black_score,
            wall_ms: self.started.elapsed().as_millis() as Millis,
            p1_cpu_ms: self.black_cpu_ms,
            p2_cpu_ms: self.white_cpu_ms,
        };
        (self.on_result)(&outcome);
    }

    fn to_move(&self) -> Stone {
        Stone::of_ply(self.moves)
    }

    fn mover(&mut self, black: bool) -> &mut Player {
        if black { &mut self.black } else { &mut self.white }
    }

    /// run-level id of the side to move, for crash attribution
    fn offender(&self) -> BotId {
        self.spec.run_level_bot(self.to_move() == Stone::Black)
    }

    fn external_id(&self) -> String {
        self.spec.external_id()
    }

    /// capture run identity and announce the run on its very first game
    fn run_start_if_first(&self) {
        let ctx = &self.spec.ctx;
        let mut names = ctx.names.lock().expect("context lock");
        if names.is_some() {
            return;
        }
        let (p1, p2) = if self.spec.leg == 0 {
            (&self.black, &self.white)
        } else {
            (&self.white, &self.black)
        };
        let identity = BotNames {
            p1_name: p1.name().to_string(),
            p1_version: p1.version().to_string(),
            p2_name: p2.name().to_string(),
            p2_version: p2.version().to_string(),
        };
        if let Some(reporter) = &self.reporter {
            reporter.enqueue(Event::RunStart {
                run_id: ctx.id.clone(),
                p1_name: identity.p1_name.clone(),
                p1_version: identity.p1_version.clone(),
                p2_name: identity.p2_name.clone(),
                p2_version: identity.p2_version.clone(),
                config_label: ctx.label.clone(),
                total_games: ctx.expected_games,
                p1_nodes: ctx.spec.p1_nodes,
                p2_nodes: ctx.spec.p2_nodes,
                eval_nodes: ctx.spec.eval_nodes,
                board_size: ctx.run.board_size,
                min_pairs: ctx.run.min_pairs,
                max_pairs: ctx.run.max_pairs,
                repeat_index: ctx.spec.repeat_index,
                seed: ctx.spec.seed,
            });
        }
        *names = Some(identity);
    }

    fn emit_start(&mut self) {
        let Some(reporter) = &self.reporter else {
            return;
        };
        reporter.enqueue(Event::Start {
            external_id: self.external_id(),
            run_id: self.spec.ctx.id.clone(),
            p1n: self.black.name().to_string(),
            p1v: self.black.version().to_string(),
            p2n: self.white.name().to_string(),
            p2v: self.white.version().to_string(),
            black_is_p1: true,
        });
        self.start_sent = true;
    }

    fn emit_move(&self, mv: Point, stone: Stone) {
        if let Some(reporter) = &self.reporter {
            reporter.enqueue(Event::Move {
                external_id: self.external_id(),
                x: mv.x,
                y: mv.y,
                c: stone.code(),
            });
        }
    }

    fn emit_result(&self, black_score: Score) {
        let Some(reporter) = &self.reporter else {
            return;
        };
        if !self.start_sent {
            return;
        }
        let moves = self
            .hist
            .iter()
            .enumerate()
            .map(|(i, mv)| format!("{mv},{}", Stone::of_ply(i).code()))
            .collect::<Vec<_>>()
            .join(";");
        let winner = if black_score == 1.0 {
            1
        } else if black_score == 0.0 {
            2
        } else {
            3
        };
        reporter.enqueue(Event::Result {
            external_id: self.external_id(),
            winner,
            moves,
        });
    }
}

impl Drop for Referee {
    fn drop(&mut self) {
        if self.start_sent && !self.result_sent {
            self.emit_result(0.5);
        }
        self.black.stop();
        self.white.stop();
    }
}

/// rapfi needs headroom on top of the configured cap for its runtime
fn memory_with_overhead(cfg: &BotConfig) -> i64 {
    if cfg.memory > 0 && is_rapfi(&cfg.cmd) {
        cfg.memory + RAPFI_MEMORY_OVERHEAD
    } else {
        cfg.memory
    }
}

/// START/INFO handshake; returns the effective per-turn cutoff
fn init_protocol(player: &mut Player, cfg: &BotConfig, board_size: usize) -> Result<Millis> {
    player.send(&format!("START {board_size}"))?;
    let cutoff = cfg.cutoff(player.name());
    let (reply, _) = player.read(cutoff)?;
    if reply != "OK" {
        return Err(Error::Player(format!("Expected OK, got: {reply:?}")));
    }
    if cfg.max_nodes > 0 {
        player.send(&format!("INFO MAX_NODE {}", cfg.max_nodes))?;
        player.send("INFO timeout_turn 0")?;
        player.send("INFO timeout_match 0")?;
    } else {
        player.send(&format!("INFO timeout_turn {}", cfg.timeout_announce))?;
        player.send(&format!("INFO timeout_match {}", cfg.timeout_game))?;
    }
    player.send(&format!("INFO max_memory {}", cfg.memory))?;
    player.send(&format!("INFO game_type {}", crate::PROTOCOL_GAME_TYPE))?;
    player.send(&format!("INFO rule {}", crate::PROTOCOL_RULE))?;
    player.send(&format!("INFO THREAD_NUM {}", crate::PROTOCOL_THREAD_NUM))?;
    Ok(cutoff)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tournament::BatchConfig;
    use crate::tournament::RunSpec;
    use std::sync::Mutex;

    /// a bot that replies its scripted moves in order, one per turn request
    fn scripted(moves: &str) -> String {
        format!(
            "/bin/sh -c 'MOVES=\"{moves}\"; \
             reply() {{ set -- $MOVES; echo \"$1\"; shift; MOVES=\"$*\"; }}; \
             while read -r line; do case \"$line\" in \
               ABOUT) echo name=\\\"scripted\\\" version=\\\"1.0\\\" ;; \
               START*) echo OK ;; \
               INFO*) ;; \
               BEGIN|TURN*) reply ;; \
               BOARD) while read -r b; do case \"$b\" in DONE) break ;; esac; done; reply ;; \
               END) exit 0 ;; \
             esac; done'"
        )
    }

    fn game(black: &str, white: &str, opening: Vec<Point>, announce: Millis) -> GameSpec {
        let bc = BatchConfig {
            p1_cmd: black.to_string(),
            p2_cmd: white.to_string(),
            board_size: 5,
            threads: 1,
            p1_timeout_announce: announce,
            p2_timeout_announce: announce,
            min_pairs: vec![1],
            max_pairs: vec![1],
            repeat: 1,
            ..Default::default()
        };
        let spec = RunSpec {
            min_pairs: 1,
            max_pairs: 1,
            ..Default::default()
        };
        let run = bc.run_config(&spec);
        let ctx = Arc::new(RunContext::new("r".into(), "default".into(), run, spec));
        GameSpec {
            pair: 1,
            leg: 0,
            black: ctx.run.bot1.clone(),
            white: ctx.run.bot2.clone(),
            opening,
            seed: None,
            ctx,
        }
    }

    fn play(spec: GameSpec) -> (Vec<GameOutcome>, usize) {
        let results = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&results);
        let mut referee = Referee::new(
            spec,
            None,
            Box::new(move |outcome| sink.lock().unwrap().push(*outcome)),
        );
        let mut steps = 0;
        loop {
            steps += 1;
            if referee.step().unwrap().status == Status::Finished {
                break;
            }
        }
        let results = results.lock().unwrap().clone();
        (results, steps)
    }

    #[test]
    fn black_five_in_a_row_scores_one() {
        let spec = game(
            &scripted("2,0 2,1 2,2 2,3 2,4"),
            &scripted("0,0 0,1 0,2 0,3"),
            vec![],
            2_000,
        );
        let (results, _) = play(spec);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].black_score, 1.0);
        assert_eq!(results[0].pair, 1);
        assert_eq!(results[0].leg, 0);
        assert!(results[0].wall_ms >= 0);
    }

    #[test]
    fn illegal_move_loses_the_game() {
        let spec = game(
            &scripted("9,9"),
            &scripted("0,0 0,1 0,2 0,3"),
            vec![],
            2_000,
        );
        let ctx = Arc::clone(&spec.ctx);
        let (results, _) = play(spec);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].black_score, 0.0);
        // a protocol violation is not a crash
        assert_eq!(ctx.stats.crashes.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn occupied_cell_loses_the_game() {
        let spec = game(
            &scripted("2,2 2,2"),
            &scripted("1,1"),
            vec![],
            2_000,
        );
        let (results, _) = play(spec);
        assert_eq!(results[0].black_score, 0.0);
    }

    #[test]
    fn unresponsive_bot_times_out_and_loses() {
        // the white script never answers a turn request
        let silent = "/bin/sh -c 'while read -r line; do case \"$line\" in \
            ABOUT) echo name=\\\"mute\\\" ;; START*) echo OK ;; END) exit 0 ;; \
            esac; done'";
        let spec = game(&scripted("2,0 2,1 2,2 2,3 2,4"), silent, vec![], 300);
        let (results, _) = play(spec);
        assert_eq!(results.len(), 1);
        // white to move, white at fault
        assert_eq!(results[0].black_score, 1.0);
    }

    #[test]
    fn full_board_without_five_is_a_draw() {
        let spec = game(
            &scripted("0,0 1,0 4,0 2,1 3,1 0,2 1,2 4,2 2,3 3,3 0,4 1,4 4,4"),
            &scripted("2,0 3,0 0,1 1,1 4,1 2,2 3,2 0,3 1,3 4,3 2,4 3,4"),
            vec![],
            2_000,
        );
        let (results, _) = play(spec);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].black_score, 0.5);
    }

    #[test]
    fn opening_moves_seed_the_board() {
        // four black stones in column 0, four white in column 1; black
        // completes the five immediately
        let opening = vec![
            Point::new(0, 0),
            Point::new(1, 0),
            Point::new(0, 1),
            Point::new(1, 1),
            Point::new(0, 2),
            Point::new(1, 2),
            Point::new(0, 3),
            Point::new(1, 3),
        ];
        let spec = game(&scripted("0,4"), &scripted(""), opening, 2_000);
        let (results, steps) = play(spec);
        assert_eq!(results[0].black_score, 1.0);
        // one step to initialize, one step for the winning move
        assert_eq!(steps, 2);
    }

    #[test]
    fn occupied_opening_cell_counts_as_a_crash() {
        // the duplicated opening cell surfaces as a non-player failure:
        // the side to move is scored against and a crash is counted
        let opening = vec![Point::new(2, 2), Point::new(2, 2)];
        let spec = game(&scripted("0,0"), &scripted("1,1"), opening, 2_000);
        let ctx = Arc::clone(&spec.ctx);
        let (results, _) = play(spec);
        assert_eq!(results.len(), 1);
        assert_eq!(ctx.stats.crashes.load(Ordering::Relaxed), 1);
        // one opening stone is down, so white is the side to move
        assert_eq!(results[0].black_score, 1.0);
    }

    #[test]
    fn last_mover_tracks_leg_colors() {
        let spec = game(&scripted("2,0"), &scripted("0,0"), vec![], 2_000);
        let mut leg1 = spec.clone();
        leg1.leg = 1;
        assert_eq!(leg1.run_level_bot(true), 2);

        let sink: ResultFn = Box::new(|_| {});
        let mut referee = Referee::new(spec, None, sink);
        assert_eq!(referee.last_mover(), 0);
        referee.step().unwrap();
        referee.step().unwrap();
        assert_eq!(referee.last_mover(), 1);
    }
}
