use crate::Millis;
use std::sync::OnceLock;

const FALLBACK_CLK_TCK: i64 = 100;

/// user + system CPU time of one process, sampled from /proc/<pid>/stat
/// (fields 14 and 15, in clock ticks)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuTimes {
    pub user_ms: Millis,
    pub sys_ms: Millis,
}

impl CpuTimes {
    pub fn sample(pid: i32) -> Self {
        if pid <= 0 {
            return Self::default();
        }
        std::fs::read_to_string(format!("/proc/{pid}/stat"))
            .ok()
            .and_then(|stat| Self::parse(&stat))
            .unwrap_or_default()
    }

    /// The comm field may contain spaces and parentheses, so fields are
    /// counted from the last ')'. After it: state is field 3, utime field
    /// 14, stime field 15.
    fn parse(stat: &str) -> Option<Self> {
        let (_, rest) = stat.rsplit_once(')')?;
        let fields = rest.split_whitespace().collect::<Vec<_>>();
        let utime = fields.get(11)?.parse::<i64>().ok()?;
        let stime = fields.get(12)?.parse::<i64>().ok()?;
        let tck = clk_tck();
        Some(Self {
            user_ms: utime * 1_000 / tck,
            sys_ms: stime * 1_000 / tck,
        })
    }

    pub fn total_ms(&self) -> Millis {
        self.user_ms + self.sys_ms
    }

    pub fn delta_ms(start: &Self, end: &Self) -> Millis {
        end.total_ms() - start.total_ms()
    }

    /// CPU load over a wall-clock interval, in percent
    pub fn load_pct(start: &Self, end: &Self, wall_ms: Millis) -> f64 {
        if wall_ms <= 0 {
            return 0.0;
        }
        Self::delta_ms(start, end) as f64 * 100.0 / wall_ms as f64
    }
}

fn clk_tck() -> i64 {
    static TCK: OnceLock<i64> = OnceLock::new();
    *TCK.get_or_init(|| {
        let tck = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
        if tck > 0 { tck } else { FALLBACK_CLK_TCK }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_stat_line() {
        // utime=200 stime=100 at the 14th and 15th overall fields
        let stat = "1234 (some proc) S 1 1 1 0 -1 4194304 100 0 0 0 200 100 0 0 20 0 1 0 100 0 0";
        let times = CpuTimes::parse(stat).unwrap();
        let tck = clk_tck();
        assert_eq!(times.user_ms, 200 * 1_000 / tck);
        assert_eq!(times.sys_ms, 100 * 1_000 / tck);
    }

    #[test]
    fn parses_comm_with_spaces() {
        let stat = "42 (a b) c) R 1 1 1 0 -1 0 0 0 0 0 50 50 0 0 20 0 1 0 1 0 0";
        assert!(CpuTimes::parse(stat).is_some());
    }

    #[test]
    fn samples_own_process() {
        let times = CpuTimes::sample(std::process::id() as i32);
        assert!(times.user_ms >= 0);
        assert!(times.sys_ms >= 0);
    }

    #[test]
    fn missing_pid_is_zero() {
        assert_eq!(CpuTimes::sample(-1), CpuTimes::default());
        assert_eq!(CpuTimes::sample(0), CpuTimes::default());
    }

    #[test]
    fn load_calculation() {
        let start = CpuTimes { user_ms: 0, sys_ms: 0 };
        let end = CpuTimes { user_ms: 300, sys_ms: 200 };
        assert!((CpuTimes::load_pct(&start, &end, 1_000) - 50.0).abs() < 1e-9);
        assert_eq!(CpuTimes::load_pct(&start, &end, 0), 0.0);
    }
}
