use crate::Millis;
use crate::Nodes;
use crate::board::Point;
use crate::error::Error;
use crate::error::Result;
use crate::stats::EvalMetrics;
use crate::subprocess::Channel;
use crate::subprocess::stop;

/// Client for a third-party analysis engine speaking the Gomocup verbs
/// plus `YXBOARD`/`ANALYZE_MOVE`.
///
/// Each worker owns one evaluator for the life of the process. Failures
/// are absorbed: the engine is restarted and the query yields zero
/// metrics, unless strict mode escalates to match termination.
pub struct Evaluator {
    chan: Option<Channel>,
    cmd: String,
    board_size: usize,
    cutoff_ms: Millis,
    exit_on_crash: bool,
    max_nodes: Nodes,
}

impl Evaluator {
    pub fn new(
        cmd: &str,
        board_size: usize,
        cutoff_ms: Millis,
        exit_on_crash: bool,
        max_nodes: Nodes,
    ) -> Self {
        Self {
            chan: None,
            cmd: cmd.to_string(),
            board_size,
            cutoff_ms,
            exit_on_crash,
            max_nodes,
        }
    }

    pub fn pid(&self) -> i32 {
        self.chan.as_ref().map(Channel::pid).unwrap_or(0)
    }

    pub fn start(&mut self) -> bool {
        match self.handshake() {
            Ok(()) => true,
            Err(e) => {
                log::error!("Evaluator: start failed: {e}");
                self.chan = None;
                false
            }
        }
    }

    fn handshake(&mut self) -> Result<()> {
        let mut chan = Channel::spawn(&self.cmd, 0, &[])?;
        chan.write_line(&format!("START {}", self.board_size))?;
        let (reply, _) = chan.read_line(self.cutoff_ms)?;
        match reply {
            Some(line) if line.contains("OK") => {}
            other => {
                return Err(Error::System(format!("START not acknowledged: {other:?}")));
            }
        }
        chan.write_line("INFO timeout_turn 0")?;
        chan.write_line("INFO timeout_match 0")?;
        chan.write_line(&format!("INFO THREAD_NUM {}", crate::PROTOCOL_THREAD_NUM))?;
        chan.write_line(&format!("INFO MAX_NODE {}", self.max_nodes))?;
        self.chan = Some(chan);
        Ok(())
    }

    pub fn restart(&mut self) {
        if let Some(chan) = &mut self.chan {
            chan.terminate();
        }
        self.chan = None;
        self.start();
    }

    /// re-announce the node budget only when it changes
    pub fn set_max_nodes(&mut self, nodes: Nodes) {
        if nodes == self.max_nodes {
            return;
        }
        if let Some(chan) = &mut self.chan {
            let _ = chan.write_line(&format!("INFO MAX_NODE {nodes}"));
        }
        self.max_nodes = nodes;
    }

    /// Analyze the final move of `moves`. Engine failures restart the
    /// engine and yield zero metrics; only cancellation propagates.
    pub fn analyze(&mut self, moves: &[Point]) -> Result<EvalMetrics> {
        match self.query(moves) {
            Ok(metrics) => Ok(metrics),
            Err(Error::Terminated) => Err(Error::Terminated),
            Err(e) => {
                log::warn!("Evaluator failed on move {}: {e}", moves.len());
                if self.exit_on_crash {
                    log::error!("STRICT MODE: Exiting due to evaluator error: {e}");
                    stop::request();
                    return Err(Error::Terminated);
                }
                self.restart();
                Ok(EvalMetrics::default())
            }
        }
    }

    fn query(&mut self, moves: &[Point]) -> Result<EvalMetrics> {
        let Some((last, prefix)) = moves.split_last() else {
            return Ok(EvalMetrics::default());
        };
        let chan = self
            .chan
            .as_mut()
            .ok_or_else(|| Error::System("evaluator not running".into()))?;
        chan.write_line("YXBOARD")?;
        for (i, mv) in prefix.iter().enumerate() {
            chan.write_line(&format!("{mv},{}", if i % 2 == 0 { 1 } else { 2 }))?;
        }
        chan.write_line("DONE")?;
        chan.write_line(&format!("ANALYZE_MOVE {last}"))?;
        loop {
            let (line, _) = chan.read_line(self.cutoff_ms)?;
            let Some(line) = line else {
                // deadline expired without a verdict: count nothing
                return Ok(EvalMetrics::default());
            };
            if let Some(metrics) = parse_eval_data(&line) {
                return Ok(metrics);
            }
        }
    }
}

/// `EVAL_DATA <p_best> <p_second> <p_played>` anywhere on the line
fn parse_eval_data(line: &str) -> Option<EvalMetrics> {
    let idx = line.find("EVAL_DATA")?;
    let mut parts = line[idx..].split_whitespace().skip(1);
    Some(EvalMetrics {
        p_best: parts.next()?.parse().ok()?,
        p_second: parts.next()?.parse().ok()?,
        p_played: parts.next()?.parse().ok()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    // an evaluator that acknowledges the handshake and rates every query
    const SCRIPT: &str = "/bin/sh -c 'while read line; do case \"$line\" in \
        START*) echo OK ;; \
        ANALYZE_MOVE*) echo \"EVAL_DATA 0.9 0.6 0.8\" ;; \
        END) exit 0 ;; \
        esac; done'";

    fn moves() -> Vec<Point> {
        vec![Point::new(7, 7), Point::new(8, 8), Point::new(9, 9)]
    }

    #[test]
    fn parses_eval_data_lines() {
        let m = parse_eval_data("EVAL_DATA 0.9 0.5 0.75").unwrap();
        assert_eq!(m.p_best, 0.9);
        assert_eq!(m.p_second, 0.5);
        assert_eq!(m.p_played, 0.75);
        assert!(parse_eval_data("MESSAGE thinking").is_none());
        assert!(parse_eval_data("EVAL_DATA 0.9 0.5").is_none());
        assert!(parse_eval_data("prefix EVAL_DATA 1 0 0.5").is_some());
    }

    #[test]
    fn handshake_and_query_round_trip() {
        let mut eval = Evaluator::new(SCRIPT, 20, 2_000, false, 1_000);
        assert!(eval.start());
        let m = eval.analyze(&moves()).unwrap();
        assert_eq!(m.p_best, 0.9);
        assert_eq!(m.p_played, 0.8);
    }

    #[test]
    fn empty_history_yields_zeros() {
        let mut eval = Evaluator::new(SCRIPT, 20, 2_000, false, 1_000);
        assert!(eval.start());
        assert_eq!(eval.analyze(&[]).unwrap(), EvalMetrics::default());
    }

    #[test]
    fn silent_engine_times_out_to_zeros() {
        let script = "/bin/sh -c 'while read line; do case \"$line\" in \
            START*) echo OK ;; END) exit 0 ;; esac; done'";
        let mut eval = Evaluator::new(script, 20, 300, false, 1_000);
        assert!(eval.start());
        assert_eq!(eval.analyze(&moves()).unwrap(), EvalMetrics::default());
    }

    #[test]
    fn dead_engine_restarts_and_yields_zeros() {
        let script = "/bin/sh -c 'read line; echo OK; read line; exit 1'";
        let mut eval = Evaluator::new(script, 20, 2_000, false, 1_000);
        assert!(eval.start());
        let m = eval.analyze(&moves()).unwrap();
        assert_eq!(m, EvalMetrics::default());
        // the replacement engine answers again
        assert!(eval.pid() > 0);
    }

    #[test]
    fn unacknowledged_start_fails() {
        let mut eval = Evaluator::new("/bin/sh -c 'read line; echo NOPE'", 20, 500, false, 0);
        assert!(!eval.start());
    }
}
