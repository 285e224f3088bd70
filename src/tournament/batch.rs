use super::config::BatchConfig;
use super::config::RunConfig;
use super::config::RunSpec;
use crate::DEFAULT_EVAL_NODES;
use crate::DEFAULT_TIMEOUT_ANNOUNCE_MS;
use crate::Nodes;
use itertools::Itertools;
use itertools::iproduct;
use rand::Rng;
use rand::seq::SliceRandom;

/// Expand the batch parameters into the full randomized run list.
/// Shuffling surfaces degraded configurations early instead of clustering
/// them at the tail of a long batch.
pub fn expand(bc: &BatchConfig) -> Vec<RunSpec> {
    let mut runs = combos(bc);
    runs.shuffle(&mut rand::rng());
    runs
}

/// The deterministic cartesian product underneath `expand`. A common node
/// list with no per-side lists iterates diagonally, pitting equal budgets
/// against each other; otherwise the two per-side lists cross.
pub fn combos(bc: &BatchConfig) -> Vec<RunSpec> {
    let eval_nodes = if bc.eval_nodes.is_empty() {
        vec![DEFAULT_EVAL_NODES]
    } else {
        bc.eval_nodes.clone()
    };
    let diagonal = !bc.common_nodes.is_empty() && bc.p1_nodes.is_empty() && bc.p2_nodes.is_empty();
    let pairings: Vec<(Nodes, Nodes)> = if diagonal {
        bc.common_nodes.iter().map(|&n| (n, n)).collect()
    } else {
        let p1 = if bc.p1_nodes.is_empty() { vec![0] } else { bc.p1_nodes.clone() };
        let p2 = if bc.p2_nodes.is_empty() { vec![0] } else { bc.p2_nodes.clone() };
        iproduct!(p1, p2).collect()
    };

    iproduct!(
        pairings,
        eval_nodes,
        bc.min_pairs.clone(),
        bc.max_pairs.clone(),
        0..bc.repeat.max(1)
    )
    .map(|((n1, n2), ne, minp, maxp, r)| RunSpec {
        p1_nodes: n1,
        p2_nodes: n2,
        eval_nodes: ne,
        min_pairs: minp.min(maxp),
        max_pairs: maxp,
        repeat_index: r,
        seed: bc.seeds.get(r as usize).copied(),
    })
    .collect()
}

/// Human label of a run: the parameters that differ from the defaults,
/// `"default"` when nothing does.
pub fn label(run: &RunConfig) -> String {
    let mut parts = Vec::new();
    if run.bot1.max_nodes == run.bot2.max_nodes && run.bot1.max_nodes > 0 {
        parts.push(format!("N={}", format_nodes(run.bot1.max_nodes)));
    } else {
        if run.bot1.max_nodes > 0 {
            parts.push(format!("N1={}", format_nodes(run.bot1.max_nodes)));
        }
        if run.bot2.max_nodes > 0 {
            parts.push(format!("N2={}", format_nodes(run.bot2.max_nodes)));
        }
    }
    if run.bot1.max_nodes == 0 && run.bot2.max_nodes == 0 {
        if run.bot1.timeout_announce == run.bot2.timeout_announce {
            if run.bot1.timeout_announce != DEFAULT_TIMEOUT_ANNOUNCE_MS {
                parts.push(format!("T={}s", run.bot1.timeout_announce / 1_000));
            }
        } else {
            parts.push(format!("T1={}s", run.bot1.timeout_announce / 1_000));
            parts.push(format!("T2={}s", run.bot2.timeout_announce / 1_000));
        }
    }
    if run.bot1.memory > 0 && run.bot1.memory == run.bot2.memory {
        parts.push(format!("M={}m", run.bot1.memory / 1_048_576));
    }
    if parts.is_empty() {
        "default".into()
    } else {
        parts.iter().join(", ")
    }
}

/// compact node counts for labels: 250k, 1m, 2g
pub fn format_nodes(nodes: Nodes) -> String {
    match nodes {
        0 => String::new(),
        n if n >= 1_000_000_000 => format!("{}g", n / 1_000_000_000),
        n if n >= 1_000_000 => format!("{}m", n / 1_000_000),
        n if n >= 1_000 => format!("{}k", n / 1_000),
        n => n.to_string(),
    }
}

/// opaque run identity: epoch millis plus random suffix, both hex
pub fn run_id() -> String {
    let ms = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    format!("{:x}_{:x}", ms & 0xFFFF_FFFF, rand::rng().random::<u32>())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch() -> BatchConfig {
        BatchConfig {
            min_pairs: vec![5],
            max_pairs: vec![10],
            repeat: 1,
            board_size: 20,
            p1_timeout_announce: DEFAULT_TIMEOUT_ANNOUNCE_MS,
            p2_timeout_announce: DEFAULT_TIMEOUT_ANNOUNCE_MS,
            ..Default::default()
        }
    }

    #[test]
    fn defaults_make_a_single_unbounded_run() {
        let runs = combos(&batch());
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].p1_nodes, 0);
        assert_eq!(runs[0].p2_nodes, 0);
        assert_eq!(runs[0].eval_nodes, DEFAULT_EVAL_NODES);
        assert_eq!(runs[0].seed, None);
    }

    #[test]
    fn common_nodes_iterate_diagonally() {
        let mut bc = batch();
        bc.common_nodes = vec![1_000, 2_000, 3_000];
        let runs = combos(&bc);
        assert_eq!(runs.len(), 3);
        assert!(runs.iter().all(|r| r.p1_nodes == r.p2_nodes));
    }

    #[test]
    fn per_side_lists_cross() {
        let mut bc = batch();
        bc.common_nodes = vec![9_999];
        bc.p1_nodes = vec![100, 200];
        bc.p2_nodes = vec![300, 400, 500];
        let runs = combos(&bc);
        // per-side lists override the common list entirely
        assert_eq!(runs.len(), 6);
        assert!(runs.iter().all(|r| r.p1_nodes < 300 && r.p2_nodes >= 300));
    }

    #[test]
    fn pair_lists_and_repeat_multiply() {
        let mut bc = batch();
        bc.min_pairs = vec![5, 10];
        bc.max_pairs = vec![25, 50];
        bc.repeat = 3;
        assert_eq!(combos(&bc).len(), 2 * 2 * 3);
    }

    #[test]
    fn min_pairs_is_clamped_to_max() {
        let mut bc = batch();
        bc.min_pairs = vec![50];
        bc.max_pairs = vec![10];
        assert_eq!(combos(&bc)[0].min_pairs, 10);
    }

    #[test]
    fn seeds_rotate_with_repeats() {
        let mut bc = batch();
        bc.repeat = 3;
        bc.seeds = vec![11, 22];
        let runs = combos(&bc);
        let seed_of = |r: u32| runs.iter().find(|s| s.repeat_index == r).unwrap().seed;
        assert_eq!(seed_of(0), Some(11));
        assert_eq!(seed_of(1), Some(22));
        assert_eq!(seed_of(2), None);
    }

    #[test]
    fn expand_keeps_the_combination_count() {
        let mut bc = batch();
        bc.common_nodes = vec![1, 2, 3, 4];
        bc.repeat = 2;
        assert_eq!(expand(&bc).len(), combos(&bc).len());
    }

    #[test]
    fn node_formatting() {
        assert_eq!(format_nodes(0), "");
        assert_eq!(format_nodes(999), "999");
        assert_eq!(format_nodes(250_000), "250k");
        assert_eq!(format_nodes(15_000_000), "15m");
        assert_eq!(format_nodes(2_000_000_000), "2g");
    }

    #[test]
    fn labels_elide_defaults() {
        let bc = batch();
        let run = bc.run_config(&combos(&bc)[0]);
        assert_eq!(label(&run), "default");
    }

    #[test]
    fn labels_show_asymmetric_budgets() {
        let mut bc = batch();
        bc.p1_nodes = vec![250_000];
        bc.p2_nodes = vec![1_000_000];
        let run = bc.run_config(&combos(&bc)[0]);
        assert_eq!(label(&run), "N1=250k, N2=1m");
    }

    #[test]
    fn labels_collapse_equal_budgets() {
        let mut bc = batch();
        bc.common_nodes = vec![500_000];
        let run = bc.run_config(&combos(&bc)[0]);
        assert_eq!(label(&run), "N=500k");
    }

    #[test]
    fn labels_show_time_control_without_budgets() {
        let mut bc = batch();
        bc.p1_timeout_announce = 10_000;
        bc.p2_timeout_announce = 10_000;
        let run = bc.run_config(&combos(&bc)[0]);
        assert_eq!(label(&run), "T=10s");

        bc.p2_timeout_announce = 1_000;
        let run = bc.run_config(&combos(&bc)[0]);
        assert_eq!(label(&run), "T1=10s, T2=1s");
    }

    #[test]
    fn run_ids_are_unique_enough() {
        let a = run_id();
        let b = run_id();
        assert!(a.contains('_'));
        assert_ne!(a, b);
    }
}
