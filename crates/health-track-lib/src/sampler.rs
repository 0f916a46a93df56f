//! Deterministic stride sampling
//!
//! Both views over a coordinate sequence are plain strides: the route view keeps every
//! `sample_rate`-th point, the heatmap view every `heatmap_sample`-th point with a weight attached.
//! Nothing is binned or deduplicated, and the output only borrows from the input.

use std::num::NonZeroUsize;

/// Default point radius of the heat layer, the radius at which a point reaches full weight
pub const REFERENCE_HEAT_RADIUS: f64 = 25.0;

/// Read-only strided view over a sequence
#[derive(Clone, Debug, PartialEq)]
pub struct SampledSeries<'a, T> {
    items: Vec<&'a T>,
}

impl<'a, T> SampledSeries<'a, T> {
    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[inline]
    pub fn first(&self) -> Option<&'a T> {
        self.items.first().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &'a T> + '_ {
        self.items.iter().copied()
    }

    #[inline]
    pub fn as_slice(&self) -> &[&'a T] {
        &self.items
    }
}

impl<'a, T> IntoIterator for SampledSeries<'a, T> {
    type Item = &'a T;
    type IntoIter = std::vec::IntoIter<&'a T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

/// A sampled item with its heat weight in `[min_opacity, 1]`
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Weighted<T> {
    pub item: T,
    pub weight: f64,
}

/// Keep the elements at indices `0, stride, 2 * stride, ...`
///
/// The first element is always kept for non-empty input, and the result has
/// `ceil(len / stride)` elements.
#[cfg_attr(feature = "profiling", profiling::function)]
pub fn sample<T>(seq: &[T], stride: NonZeroUsize) -> SampledSeries<'_, T> {
    SampledSeries {
        items: seq.iter().step_by(stride.get()).collect(),
    }
}

/// Stride sample with a heat weight attached to every kept element
///
/// All points share the same weight, see [`heat_weight`].
#[cfg_attr(feature = "profiling", profiling::function)]
pub fn density_sample<T>(
    seq: &[T],
    stride: NonZeroUsize,
    min_opacity: f64,
    radius_weight: f64,
) -> Vec<Weighted<&T>> {
    let weight = heat_weight(min_opacity, radius_weight);
    seq.iter()
        .step_by(stride.get())
        .map(|item| Weighted { item, weight })
        .collect()
}

/// `radius_weight / REFERENCE_HEAT_RADIUS`, capped at 1 and floored at `min_opacity`
///
/// The floor is applied last, so it wins when `min_opacity > 1`. Non-finite inputs fall back to
/// full weight.
pub fn heat_weight(min_opacity: f64, radius_weight: f64) -> f64 {
    let raw = radius_weight / REFERENCE_HEAT_RADIUS;
    let raw = if raw.is_finite() { raw } else { 1.0 };
    let capped = raw.min(1.0);
    if min_opacity.is_finite() {
        capped.max(min_opacity)
    } else {
        capped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stride(k: usize) -> NonZeroUsize {
        NonZeroUsize::new(k).unwrap()
    }

    #[test]
    fn test_sample_every_tenth() {
        let points: Vec<usize> = (0..100).collect();
        let sampled: Vec<usize> = sample(&points, stride(10)).iter().copied().collect();
        assert_eq!(sampled, vec![0, 10, 20, 30, 40, 50, 60, 70, 80, 90]);
    }

    #[test]
    fn test_sample_length_is_ceiling() {
        for n in 1..60usize {
            let seq: Vec<usize> = (0..n).collect();
            for k in 1..15usize {
                let sampled = sample(&seq, stride(k));
                assert_eq!(sampled.len(), n.div_ceil(k), "n={n} k={k}");
                assert_eq!(sampled.first(), Some(&seq[0]));
            }
        }
    }

    #[test]
    fn test_stride_one_is_identity() {
        let seq = vec!['a', 'b', 'c'];
        let sampled: Vec<char> = sample(&seq, stride(1)).into_iter().copied().collect();
        assert_eq!(sampled, seq);
    }

    #[test]
    fn test_large_stride_keeps_first() {
        let seq = vec![7, 8, 9];
        let sampled = sample(&seq, stride(3));
        assert_eq!(sampled.as_slice(), &[&7]);
        assert_eq!(sample(&seq, stride(1000)).len(), 1);
    }

    #[test]
    fn test_empty_input() {
        let seq: Vec<u8> = Vec::new();
        assert!(sample(&seq, stride(5)).is_empty());
        assert!(density_sample(&seq, stride(5), 0.3, 15.0).is_empty());
    }

    #[test]
    fn test_sample_is_deterministic() {
        let seq: Vec<u32> = (0..1000).map(|i| i * 7 % 13).collect();
        assert_eq!(sample(&seq, stride(7)), sample(&seq, stride(7)));
    }

    #[test]
    fn test_density_sample_weights() {
        let seq: Vec<usize> = (0..50).collect();
        let weighted = density_sample(&seq, stride(1), 0.3, 15.0);

        assert_eq!(weighted.len(), 50);
        assert!(weighted.iter().all(|w| w.weight >= 0.3));
        assert!((weighted[0].weight - 0.6).abs() < 1e-12);
        assert_eq!(*weighted[49].item, 49);
    }

    #[test]
    fn test_density_sample_matches_sample() {
        let seq: Vec<usize> = (0..95).collect();
        let plain: Vec<usize> = sample(&seq, stride(20)).iter().copied().collect();
        let weighted: Vec<usize> = density_sample(&seq, stride(20), 0.3, 15.0)
            .iter()
            .map(|w| *w.item)
            .collect();
        assert_eq!(plain, weighted);
    }

    #[test]
    fn test_heat_weight_clamping() {
        assert!((heat_weight(0.3, 15.0) - 0.6).abs() < 1e-12);
        assert_eq!(heat_weight(0.3, 50.0), 1.0);
        assert_eq!(heat_weight(0.8, 5.0), 0.8);
        assert_eq!(heat_weight(1.5, 5.0), 1.5);
        assert_eq!(heat_weight(0.3, f64::NAN), 1.0);
    }
}
