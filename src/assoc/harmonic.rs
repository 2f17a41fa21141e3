//! Harmonic sum scoring.

/// Bounded accumulator that keeps the `buffer` largest values it has seen.
///
/// Values are kept sorted in descending order, so insertion order has no effect on
/// [`HarmonicSumScorer::score`].
#[derive(Debug, Clone, PartialEq)]
pub struct HarmonicSumScorer {
    buffer: usize,
    values: Vec<f64>,
}

impl HarmonicSumScorer {
    pub fn new(buffer: usize) -> Self {
        Self {
            buffer,
            values: Vec::with_capacity(buffer.min(128)),
        }
    }

    /// Add a value, evicting the smallest stored value if the buffer is full.
    ///
    /// NaN values are ignored.
    pub fn add(&mut self, value: f64) {
        if value.is_nan() {
            return;
        }
        if self.values.len() >= self.buffer {
            match self.values.last() {
                Some(&smallest) if value > smallest => {
                    self.values.pop();
                }
                _ => return,
            }
        }
        let pos = self.values.partition_point(|&stored| stored >= value);
        self.values.insert(pos, value);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The stored values, largest first.
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// `sum(value[i] / (i + 1)^scale_factor)` over the stored values, optionally capped.
    pub fn score(&self, scale_factor: f64, cap: Option<f64>) -> f64 {
        let sum = self
            .values
            .iter()
            .enumerate()
            .map(|(i, value)| value / ((i + 1) as f64).powf(scale_factor))
            .sum::<f64>();
        match cap {
            Some(cap) => sum.min(cap),
            None => sum,
        }
    }
}

/// Logistic damping factor for a cluster of size `x`.
///
/// Close to 1 for small clusters, 0.5 at `mid_value`, and approaching 0 for large
/// clusters; `precision` controls the steepness.
pub fn sigmoid_scaling(x: f64, mid_value: f64, precision: f64) -> f64 {
    1.0 / (1.0 + ((x - mid_value) / precision).exp())
}

#[cfg(test)]
mod test {
    use float_cmp::approx_eq;
    use pretty_assertions::assert_eq;

    use super::*;

    fn scorer_with(buffer: usize, values: &[f64]) -> HarmonicSumScorer {
        let mut scorer = HarmonicSumScorer::new(buffer);
        values.iter().for_each(|&v| scorer.add(v));
        scorer
    }

    #[test]
    fn two_ones_with_scale_factor_one() {
        let scorer = scorer_with(100, &[1.0, 1.0]);
        assert!(approx_eq!(f64, 1.5, scorer.score(1.0, None), ulps = 2));
    }

    #[test]
    fn known_drug_example() {
        let scorer = scorer_with(100, &[0.4, 0.81]);
        assert!(approx_eq!(
            f64,
            0.91,
            scorer.score(2.0, Some(1.0)),
            epsilon = 1e-12
        ));
    }

    #[rstest::rstest]
    #[case(&[0.1, 0.5, 0.9, 0.3])]
    #[case(&[0.9, 0.5, 0.3, 0.1])]
    #[case(&[0.3, 0.1, 0.9, 0.5])]
    fn order_invariant(#[case] values: &[f64]) {
        let scorer = scorer_with(100, values);
        assert_eq!(scorer.values(), &[0.9, 0.5, 0.3, 0.1]);
        let expected = 0.9 + 0.5 / 4.0 + 0.3 / 9.0 + 0.1 / 16.0;
        assert!(approx_eq!(f64, expected, scorer.score(2.0, None), epsilon = 1e-12));
    }

    #[rstest::rstest]
    #[case(0.5)]
    #[case(1.0)]
    #[case(2.0)]
    fn capped_score_never_exceeds_cap(#[case] cap: f64) {
        let scorer = scorer_with(100, &[1.0; 10]);
        assert!(scorer.score(1.0, Some(cap)) <= cap);
    }

    #[test]
    fn keeps_only_largest_values() {
        let values = (0..1000).map(|i| i as f64 / 1000.0).collect::<Vec<_>>();
        let scorer = scorer_with(100, &values);

        assert_eq!(scorer.len(), 100);
        assert_eq!(scorer.values()[0], 0.999);
        assert_eq!(scorer.values()[99], 0.9);

        let mut reversed = values.clone();
        reversed.reverse();
        assert_eq!(scorer_with(100, &reversed), scorer);
    }

    #[rstest::rstest]
    #[case(1, 0.7)]
    #[case(5, 0.7)]
    #[case(50, 0.2)]
    fn identical_values(#[case] n: usize, #[case] v: f64) {
        let scorer = scorer_with(100, &vec![v; n]);
        let expected = v * (0..n).map(|i| 1.0 / (i + 1) as f64).sum::<f64>();
        assert!(approx_eq!(f64, expected, scorer.score(1.0, None), epsilon = 1e-12));
    }

    #[test]
    fn empty_and_zero_buffer() {
        assert_eq!(HarmonicSumScorer::new(10).score(2.0, Some(1.0)), 0.0);
        let scorer = scorer_with(0, &[1.0]);
        assert!(scorer.is_empty());
    }

    #[test]
    fn nan_is_ignored() {
        let scorer = scorer_with(10, &[f64::NAN, 0.5]);
        assert_eq!(scorer.values(), &[0.5]);
    }

    #[test]
    fn sigmoid() {
        assert!(approx_eq!(f64, 0.5, sigmoid_scaling(50.0, 50.0, 3.0), ulps = 2));
        assert!(sigmoid_scaling(1.0, 50.0, 3.0) > 0.999);
        assert!(sigmoid_scaling(200.0, 50.0, 3.0) < 1e-6);
        assert!(sigmoid_scaling(40.0, 50.0, 3.0) > sigmoid_scaling(60.0, 50.0, 3.0));
    }
}
