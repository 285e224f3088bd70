use crate::tournament::PairBook;

/// One-sided z-test early stop on the pair score.
///
/// Under the null (evenly matched bots) the final pair score over
/// `max_pairs` pairs is approximately normal with mean N/2 and standard
/// deviation sqrt(N)/2. The run stops once either side is decisively ahead
/// of that distribution at the configured risk, or once the trailing side
/// cannot reach the mean even by winning every remaining pair. With
/// `risk = 0` the test never fires.
pub fn early_stop(book: &PairBook, min_pairs: u32, max_pairs: u32, risk: f64) -> bool {
    if book.pairs_done < min_pairs {
        return false;
    }
    let n = max_pairs as f64;
    let mu = 0.5 * n;
    let sigma = 0.5 * n.sqrt();
    let s1 = book.wins as f64 + 0.5 * book.draws as f64;
    let s2 = book.losses as f64 + 0.5 * book.draws as f64;
    let rem = n - book.pairs_done as f64;

    // upper-tail p-value of a score under the null
    let z = |s: f64| 0.5 * libm::erfc(((s - mu) / sigma) / std::f64::consts::SQRT_2);

    (s1 > mu && z(s1) < risk)
        || (s2 > mu && z(s2) < risk)
        || (s1 + rem < mu + 1e-9 && z(s1 + rem) > risk)
}
