use crate::BotId;
use crate::CRITICAL_SHARPNESS;
use crate::CRITICAL_SUCCESS_REGRET;
use crate::ELO_BASE;
use crate::ELO_DIVISOR;
use crate::ELO_K_FACTOR;
use crate::SEVERE_ERROR_REGRET;
use crate::Score;
use crate::WEIGHT_SHARPNESS_FACTOR;
use std::sync::Mutex;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;

/// per-player decision quality aggregates
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SideTotals {
    pub sum_weighted_sq_err: f64,
    pub sum_weights: f64,
    pub critical_total: u32,
    pub critical_success: u32,
    pub severe_errors: u32,
    pub moves_analyzed: u32,
}

impl SideTotals {
    /// sharpness-weighted decision quality index, 0-100
    pub fn dqi(&self) -> f64 {
        if self.sum_weights == 0.0 {
            return 0.0;
        }
        100.0 * (1.0 - (self.sum_weighted_sq_err / self.sum_weights).sqrt())
    }

    /// critical move accuracy, percent
    pub fn cma(&self) -> f64 {
        if self.critical_total == 0 {
            return 0.0;
        }
        100.0 * self.critical_success as f64 / self.critical_total as f64
    }

    /// severe error rate, percent of analyzed moves
    pub fn blunder(&self) -> f64 {
        if self.moves_analyzed == 0 {
            return 0.0;
        }
        100.0 * self.severe_errors as f64 / self.moves_analyzed as f64
    }

    fn add(&mut self, regret: f64, sharpness: f64) {
        let weight = 1.0 + WEIGHT_SHARPNESS_FACTOR * sharpness * sharpness;
        self.sum_weighted_sq_err += weight * regret * regret;
        self.sum_weights += weight;
        self.moves_analyzed += 1;
        if sharpness > CRITICAL_SHARPNESS {
            self.critical_total += 1;
            if regret < CRITICAL_SUCCESS_REGRET {
                self.critical_success += 1;
            }
        }
        if regret > SEVERE_ERROR_REGRET {
            self.severe_errors += 1;
        }
    }
}

#[derive(Debug)]
struct Ratings {
    p1_elo: i32,
    p2_elo: i32,
    sides: [SideTotals; 2],
}

/// a consistent copy of everything the tracker knows, taken under the lock
#[derive(Debug, Clone, Copy)]
pub struct Snapshot {
    pub p1_elo: i32,
    pub p2_elo: i32,
    pub p1: SideTotals,
    pub p2: SideTotals,
    pub p1_crashes: u32,
    pub p2_crashes: u32,
}

/// Per-run score and decision-quality aggregation. Sums are serialized
/// behind one mutex; plain counters are atomic.
#[derive(Debug)]
pub struct Tracker {
    inner: Mutex<Ratings>,
    pub games: AtomicU32,
    pub crashes: AtomicU32,
    p1_crashes: AtomicU32,
    p2_crashes: AtomicU32,
}

impl Default for Tracker {
    fn default() -> Self {
        Self {
            inner: Mutex::new(Ratings {
                p1_elo: ELO_BASE,
                p2_elo: ELO_BASE,
                sides: [SideTotals::default(); 2],
            }),
            games: AtomicU32::new(0),
            crashes: AtomicU32::new(0),
            p1_crashes: AtomicU32::new(0),
            p2_crashes: AtomicU32::new(0),
        }
    }
}

impl Tracker {
    /// Fold one game score (P1 perspective) into both ratings. The delta
    /// is truncated to whole Elo points, so the total is conserved.
    pub fn update_elo(&self, score: Score) {
        let mut inner = self.inner.lock().expect("tracker lock");
        let expected =
            1.0 / (1.0 + f64::powf(10.0, (inner.p2_elo - inner.p1_elo) as f64 / ELO_DIVISOR));
        let delta = (ELO_K_FACTOR * (score - expected)) as i32;
        inner.p1_elo += delta;
        inner.p2_elo -= delta;
        self.games.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_metrics(&self, bot: BotId, regret: f64, sharpness: f64) {
        let mut inner = self.inner.lock().expect("tracker lock");
        let side = if bot == 1 { 0 } else { 1 };
        inner.sides[side].add(regret, sharpness);
    }

    pub fn add_crash(&self, bot: BotId) {
        self.crashes.fetch_add(1, Ordering::Relaxed);
        if bot == 1 {
            self.p1_crashes.fetch_add(1, Ordering::Relaxed);
        } else {
            self.p2_crashes.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        let inner = self.inner.lock().expect("tracker lock");
        Snapshot {
            p1_elo: inner.p1_elo,
            p2_elo: inner.p2_elo,
            p1: inner.sides[0],
            p2: inner.sides[1],
            p1_crashes: self.p1_crashes.load(Ordering::Relaxed),
            p2_crashes: self.p2_crashes.load(Ordering::Relaxed),
        }
    }

    pub fn log_summary(&self) {
        let snap = self.snapshot();
        for (tag, elo, side, crashes) in [
            ("P1", snap.p1_elo, snap.p1, snap.p1_crashes),
            ("P2", snap.p2_elo, snap.p2, snap.p2_crashes),
        ] {
            log::info!(
                "{tag} Final: Elo={elo} | SW-DQI={:.1} | CMA={:.1}% | Blunder={:.1}% | Crashes={crashes}",
                side.dqi(),
                side.cma(),
                side.blunder(),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn winner_gains_loser_drops() {
        let tracker = Tracker::default();
        tracker.update_elo(1.0);
        let snap = tracker.snapshot();
        assert!(snap.p1_elo > ELO_BASE);
        assert!(snap.p2_elo < ELO_BASE);
        assert_eq!(tracker.games.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn draw_between_equals_changes_nothing() {
        let tracker = Tracker::default();
        tracker.update_elo(0.5);
        let snap = tracker.snapshot();
        assert_eq!(snap.p1_elo, ELO_BASE);
        assert_eq!(snap.p2_elo, ELO_BASE);
    }

    #[test]
    fn elo_total_is_conserved() {
        let tracker = Tracker::default();
        for score in [1.0, 0.0, 0.5, 1.0, 1.0, 0.0] {
            tracker.update_elo(score);
            let snap = tracker.snapshot();
            assert_eq!(snap.p1_elo + snap.p2_elo, 2 * ELO_BASE);
        }
    }

    #[test]
    fn underdog_gains_more() {
        let even = Tracker::default();
        even.update_elo(1.0);
        let gain_equal = even.snapshot().p1_elo - ELO_BASE;

        let uphill = Tracker::default();
        // push P2 well ahead first
        for _ in 0..5 {
            uphill.update_elo(0.0);
        }
        let before = uphill.snapshot().p1_elo;
        uphill.update_elo(1.0);
        let gain_underdog = uphill.snapshot().p1_elo - before;
        assert!(gain_underdog > gain_equal);
    }

    #[test]
    fn metric_aggregation() {
        let tracker = Tracker::default();
        tracker.add_metrics(1, 0.1, 0.05);
        let snap = tracker.snapshot();
        assert_eq!(snap.p1.moves_analyzed, 1);
        assert!(snap.p1.sum_weights > 0.0);

        tracker.add_metrics(1, 0.21, 0.0);
        assert_eq!(tracker.snapshot().p1.severe_errors, 1);

        tracker.add_metrics(2, 0.0, 0.06);
        let snap = tracker.snapshot();
        assert_eq!(snap.p2.critical_total, 1);
        assert_eq!(snap.p2.critical_success, 1);
    }

    #[test]
    fn critical_success_needs_low_regret() {
        let tracker = Tracker::default();
        tracker.add_metrics(1, 0.02, 0.051);
        let snap = tracker.snapshot();
        assert_eq!(snap.p1.critical_total, 1);
        assert_eq!(snap.p1.critical_success, 0);

        tracker.add_metrics(1, 0.019, 0.051);
        assert_eq!(tracker.snapshot().p1.critical_success, 1);
    }

    #[test]
    fn metric_weight_grows_with_sharpness() {
        let tracker = Tracker::default();
        tracker.add_metrics(1, 0.0, 0.5);
        let snap = tracker.snapshot();
        // weight = 1 + 10 * 0.5^2
        assert!((snap.p1.sum_weights - 3.5).abs() < 1e-12);
    }

    #[test]
    fn crash_counting_per_side() {
        let tracker = Tracker::default();
        tracker.add_crash(1);
        tracker.add_crash(2);
        tracker.add_crash(1);
        let snap = tracker.snapshot();
        assert_eq!(tracker.crashes.load(Ordering::Relaxed), 3);
        assert_eq!(snap.p1_crashes, 2);
        assert_eq!(snap.p2_crashes, 1);
    }

    #[test]
    fn derived_rates() {
        let side = SideTotals {
            sum_weighted_sq_err: 0.25,
            sum_weights: 1.0,
            critical_total: 4,
            critical_success: 3,
            severe_errors: 1,
            moves_analyzed: 10,
        };
        assert!((side.dqi() - 50.0).abs() < 1e-9);
        assert!((side.cma() - 75.0).abs() < 1e-9);
        assert!((side.blunder() - 10.0).abs() < 1e-9);
        assert_eq!(SideTotals::default().dqi(), 0.0);
        assert_eq!(SideTotals::default().cma(), 0.0);
        assert_eq!(SideTotals::default().blunder(), 0.0);
    }
}
