//! Streaming φ-quantile estimation over biased samples.
//!
//! This is the Cormode–Korn–Muthukrishnan–Srivastava algorithm: the stream
//! keeps a compressed list of samples, each carrying a width (how many
//! observations it stands for) and a delta (the uncertainty of its rank), and
//! an invariant function decides how much error is tolerable at a given rank.
//! Inserts land in a bounded buffer first; a full buffer is sorted, merged
//! into the sample list, and compressed, so the per-observation cost stays
//! flat no matter how many values have been seen.

const BUFFER_CAPACITY: usize = 500;

#[derive(Clone, Copy, Debug)]
struct Sample {
    value: f64,
    width: f64,
    delta: f64,
}

/// The rank-error bound used by the stream.
#[derive(Clone, Debug)]
enum Invariant {
    LowBiased(f64),
    HighBiased(f64),
    Targeted(Vec<(f64, f64)>),
}

impl Invariant {
    fn apply(&self, n: f64, r: f64) -> f64 {
        match self {
            Invariant::LowBiased(epsilon) => 2.0 * epsilon * r,
            Invariant::HighBiased(epsilon) => 2.0 * epsilon * (n - r),
            Invariant::Targeted(targets) => {
                let mut min = f64::MAX;
                for &(quantile, epsilon) in targets {
                    let f = if quantile * n <= r {
                        (2.0 * epsilon * r) / quantile
                    } else {
                        (2.0 * epsilon * (n - r)) / (1.0 - quantile)
                    };
                    if f < min {
                        min = f;
                    }
                }
                min
            }
        }
    }
}

/// A biased-sampling quantile stream.
///
/// Choose the invariant at construction: [`low_biased`][Self::low_biased]
/// bounds the relative error of low ranks, [`high_biased`][Self::high_biased]
/// of high ranks, and [`targeted`][Self::targeted] spends its budget only
/// around the quantiles that will actually be queried, which is what the
/// summary metric uses.
#[derive(Clone, Debug)]
pub struct QuantileStream {
    samples: Vec<Sample>,
    buffer: Vec<f64>,
    n: f64,
    invariant: Invariant,
}

impl QuantileStream {
    /// Creates a stream with the low-biased invariant `2εr`.
    pub fn low_biased(epsilon: f64) -> Self {
        Self::new(Invariant::LowBiased(epsilon))
    }

    /// Creates a stream with the high-biased invariant `2ε(n−r)`.
    pub fn high_biased(epsilon: f64) -> Self {
        Self::new(Invariant::HighBiased(epsilon))
    }

    /// Creates a stream tuned for the given `(quantile, epsilon)` targets.
    pub fn targeted(targets: &[(f64, f64)]) -> Self {
        Self::new(Invariant::Targeted(targets.to_vec()))
    }

    fn new(invariant: Invariant) -> Self {
        Self {
            samples: Vec::new(),
            buffer: Vec::with_capacity(BUFFER_CAPACITY),
            n: 0.0,
            invariant,
        }
    }

    /// Inserts one observation.
    pub fn insert(&mut self, value: f64) {
        self.buffer.push(value);
        if self.buffer.len() >= BUFFER_CAPACITY {
            self.flush();
        }
    }

    /// Queries the value at quantile `q`.
    ///
    /// An empty stream answers NaN. A stream that has only buffered values
    /// and never merged answers directly from the sorted buffer.
    pub fn query(&mut self, q: f64) -> f64 {
        if self.samples.is_empty() {
            if self.buffer.is_empty() {
                return f64::NAN;
            }
            self.buffer.sort_by(f64::total_cmp);
            let index = ((q * self.buffer.len() as f64) as usize).min(self.buffer.len() - 1);
            return self.buffer[index];
        }

        self.flush();

        let mut t = (q * self.n).ceil();
        t += (self.invariant.apply(self.n, t) / 2.0).ceil();

        let mut prev = self.samples[0];
        let mut r = 0.0;
        for &curr in &self.samples[1..] {
            r += prev.width;
            if r + curr.width + curr.delta > t {
                return prev.value;
            }
            prev = curr;
        }
        prev.value
    }

    /// Number of observations inserted since creation or the last reset.
    pub fn count(&self) -> u64 {
        self.n as u64 + self.buffer.len() as u64
    }

    /// Discards every sample and buffered value.
    pub fn reset(&mut self) {
        self.samples.clear();
        self.buffer.clear();
        self.n = 0.0;
    }

    fn flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        self.buffer.sort_by(f64::total_cmp);
        let buffer = std::mem::take(&mut self.buffer);
        self.merge_sorted(&buffer);
        self.buffer = buffer;
        self.buffer.clear();
        self.compress();
    }

    // Walks the sample list once, splicing each incoming value in before the
    // first sample with a greater value. `r` tracks the rank at the insertion
    // point; a fresh sample inherits the loosest delta the invariant allows
    // there, except at either end of the list where the rank is exact.
    fn merge_sorted(&mut self, incoming: &[f64]) {
        let mut r = 0.0;
        let mut i = 0;
        for &value in incoming {
            let mut inserted = false;
            while i < self.samples.len() {
                let curr = self.samples[i];
                if curr.value > value {
                    let delta = (self.invariant.apply(self.n, r).floor() - 1.0).max(0.0);
                    self.samples.insert(i, Sample { value, width: 1.0, delta });
                    i += 1;
                    inserted = true;
                    break;
                }
                r += curr.width;
                i += 1;
            }
            if !inserted {
                self.samples.push(Sample { value, width: 1.0, delta: 0.0 });
                i += 1;
            }
            self.n += 1.0;
            r += 1.0;
        }
    }

    // Scans right-to-left, folding each sample into its right neighbour
    // whenever the combined width still satisfies the invariant at that rank.
    fn compress(&mut self) {
        if self.samples.len() < 2 {
            return;
        }

        let mut x = self.samples[self.samples.len() - 1];
        let mut xi = self.samples.len() - 1;
        let mut r = self.n - 1.0 - x.width;

        let mut i = self.samples.len() - 1;
        while i > 0 {
            i -= 1;
            let curr = self.samples[i];
            if curr.width + x.width + x.delta <= self.invariant.apply(self.n, r) {
                x.width += curr.width;
                self.samples[xi] = x;
                self.samples.remove(i);
                xi -= 1;
            } else {
                x = curr;
                xi = i;
            }
            r -= curr.width;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{QuantileStream, BUFFER_CAPACITY};
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::SeedableRng;

    const TARGETS: &[(f64, f64)] = &[(0.5, 0.05), (0.9, 0.01), (0.99, 0.001)];

    fn shuffled(n: usize, seed: u64) -> Vec<f64> {
        let mut values = (1..=n).map(|v| v as f64).collect::<Vec<_>>();
        values.shuffle(&mut StdRng::seed_from_u64(seed));
        values
    }

    // With values 1..=n, the value at quantile q is within epsilon*n ranks of
    // q*n, so the estimate itself must land inside that window.
    fn assert_within(stream: &mut QuantileStream, n: usize, q: f64, epsilon: f64) {
        let estimate = stream.query(q);
        let lower = (q - 2.0 * epsilon) * n as f64 - 1.0;
        let upper = (q + 2.0 * epsilon) * n as f64 + 1.0;
        assert!(
            estimate >= lower && estimate <= upper,
            "q={q}: estimate {estimate} outside [{lower}, {upper}]"
        );
    }

    #[test]
    fn test_empty_stream_answers_nan() {
        let mut stream = QuantileStream::targeted(TARGETS);
        assert!(stream.query(0.5).is_nan());
        assert_eq!(stream.count(), 0);
    }

    #[test]
    fn test_unmerged_buffer_queried_by_index() {
        let mut stream = QuantileStream::targeted(TARGETS);
        for v in [5.0, 1.0, 3.0, 2.0, 4.0] {
            stream.insert(v);
        }
        assert_eq!(stream.count(), 5);
        assert_eq!(stream.query(0.0), 1.0);
        assert_eq!(stream.query(0.5), 3.0);
        assert_eq!(stream.query(1.0), 5.0);
    }

    #[test]
    fn test_targeted_accuracy() {
        const N: usize = 20_000;

        let mut stream = QuantileStream::targeted(TARGETS);
        for v in shuffled(N, 7) {
            stream.insert(v);
        }
        assert_eq!(stream.count(), N as u64);

        for &(q, epsilon) in TARGETS {
            assert_within(&mut stream, N, q, epsilon);
        }
    }

    #[test]
    fn test_low_and_high_biased_accuracy() {
        const N: usize = 10_000;

        let mut low = QuantileStream::low_biased(0.01);
        let mut high = QuantileStream::high_biased(0.01);
        for v in shuffled(N, 11) {
            low.insert(v);
            high.insert(v);
        }

        assert_within(&mut low, N, 0.05, 0.01);
        assert_within(&mut high, N, 0.95, 0.01);
    }

    #[test]
    fn test_compression_bounds_memory() {
        const N: usize = 50_000;

        let mut stream = QuantileStream::targeted(TARGETS);
        for v in shuffled(N, 13) {
            stream.insert(v);
        }
        stream.query(0.5);

        // The whole point of the invariant: sample count stays far below the
        // number of observations.
        assert!(stream.samples.len() < N / 10, "kept {} samples", stream.samples.len());
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut stream = QuantileStream::targeted(TARGETS);
        for v in 0..(BUFFER_CAPACITY + 10) {
            stream.insert(v as f64);
        }
        assert!(stream.count() > 0);

        stream.reset();
        assert_eq!(stream.count(), 0);
        assert!(stream.query(0.9).is_nan());
    }
}
