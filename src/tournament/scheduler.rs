use super::context::EvalJob;
use super::context::GameSpec;
use super::controller::Controller;
use super::referee::Referee;
use super::referee::Status;
use super::referee::Step;
use crate::WORKER_IDLE_WAIT_MS;
use crate::subprocess::stop;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Condvar;
use std::sync::Mutex;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

enum Task {
    Eval(EvalJob),
    Game(Box<Referee>),
    Stop,
    Retry,
}

struct Queues {
    eval: VecDeque<EvalJob>,
    games: VecDeque<Box<Referee>>,
    pending: VecDeque<GameSpec>,
}

/// Cooperative worker pool over three shared queues.
///
/// Every worker runs the same loop: drain in-flight eval jobs first, then
/// advance in-flight games one ply, and only then admit new games, capped
/// at `threads` live games. Games re-enter the queue between plies, so the
/// pool interleaves everything on the same N threads while the eval
/// priority keeps each worker's engine fed and the admission cap bounds
/// memory.
pub struct Pool {
    controller: Arc<Controller>,
    threads: usize,
    queues: Mutex<Queues>,
    cv: Condvar,
    active_games: AtomicUsize,
}

impl Pool {
    pub fn new(controller: Arc<Controller>, threads: usize, pending: VecDeque<GameSpec>) -> Arc<Self> {
        Arc::new(Self {
            controller,
            threads,
            queues: Mutex::new(Queues {
                eval: VecDeque::new(),
                games: VecDeque::new(),
                pending,
            }),
            cv: Condvar::new(),
            active_games: AtomicUsize::new(0),
        })
    }

    /// run N workers to completion; returns once every queue is drained or
    /// the stop flag fired
    pub fn run(self: Arc<Self>) {
        let workers = (0..self.threads)
            .map(|i| {
                let pool = Arc::clone(&self);
                std::thread::Builder::new()
                    .name(format!("worker-{i}"))
                    .spawn(move || pool.worker())
                    .expect("spawn worker")
            })
            .collect::<Vec<_>>();
        for worker in workers {
            if worker.join().is_err() {
                log::error!("worker thread panicked");
            }
        }
    }

    fn worker(&self) {
        let mut eval = self.controller.make_evaluator();
        loop {
            match self.next_task() {
                Task::Stop => break,
                Task::Retry => continue,
                Task::Eval(job) => {
                    // only match termination escapes an eval task
                    if self.controller.run_eval(eval.as_mut(), &job).is_err() {
                        break;
                    }
                }
                Task::Game(mut referee) => match referee.step() {
                    Err(_) => break,
                    Ok(step) => self.after_step(referee, step),
                },
            }
        }
    }

    /// Hand the step outcome back to the queues: a fresh position becomes
    /// an eval job (once past the opening), a running game is re-queued,
    /// a finished one releases its admission slot.
    fn after_step(&self, referee: Box<Referee>, step: Step) {
        let mut queues = self.queues.lock().expect("scheduler lock");
        if let Some(position) = step.position {
            let ctx = referee.ctx();
            if ctx.run.eval_enabled() && position.len() > referee.opening_len() {
                queues.eval.push_back(EvalJob {
                    bot: referee.last_mover(),
                    ctx: Arc::clone(ctx),
                    max_nodes: ctx.run.eval_max_nodes,
                    moves: position,
                });
            }
        }
        match step.status {
            Status::Running => queues.games.push_back(referee),
            Status::Finished => {
                self.active_games.fetch_sub(1, Ordering::Relaxed);
            }
        }
        self.cv.notify_all();
    }

    /// Take the highest-priority available task, waiting up to the idle
    /// slice for one to appear. Sets the stop flag once everything has
    /// drained and no game is live.
    fn next_task(&self) -> Task {
        let queues = self.queues.lock().expect("scheduler lock");
        let (mut queues, _) = self
            .cv
            .wait_timeout_while(queues, Duration::from_millis(WORKER_IDLE_WAIT_MS), |q| {
                !(stop::requested()
                    || !q.eval.is_empty()
                    || !q.games.is_empty()
                    || (self.active_games.load(Ordering::Relaxed) < self.threads
                        && !q.pending.is_empty()))
            })
            .expect("scheduler lock");

        if stop::requested() {
            return Task::Stop;
        }
        if let Some(job) = queues.eval.pop_front() {
            return Task::Eval(job);
        }
        if let Some(game) = queues.games.pop_front() {
            return Task::Game(game);
        }
        if self.active_games.load(Ordering::Relaxed) < self.threads {
            if let Some(spec) = queues.pending.pop_front() {
                if spec.ctx.stop.load(Ordering::Relaxed) {
                    let ctx = Arc::clone(&spec.ctx);
                    drop(queues);
                    ctx.games_skipped.fetch_add(1, Ordering::Relaxed);
                    if ctx.done() {
                        self.controller.finalize(&ctx);
                    }
                    return Task::Retry;
                }
                self.active_games.fetch_add(1, Ordering::Relaxed);
                drop(queues);
                return Task::Game(Box::new(Controller::admit(&self.controller, spec)));
            }
        }
        if queues.pending.is_empty()
            && queues.games.is_empty()
            && queues.eval.is_empty()
            && self.active_games.load(Ordering::Relaxed) == 0
        {
            stop::request();
            self.cv.notify_all();
            return Task::Stop;
        }
        Task::Retry
    }
}
