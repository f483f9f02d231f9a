use geo::{Area, BooleanOps, Coord, CoordsIter, MultiPolygon};
use rayon::prelude::*;

/// Dice similarity in percent. Two empty contours agree perfectly (100).
pub fn dice(geo1: &MultiPolygon<f64>, geo2: &MultiPolygon<f64>) -> f64 {
    let area1 = geo1.unsigned_area();
    let area2 = geo2.unsigned_area();
    if area1 + area2 <= 0.0 {
        return 100.0;
    }
    // an empty operand never overlaps, skip the clipping
    let overlap = if area1 > 0.0 && area2 > 0.0 {
        geo1.intersection(geo2).unsigned_area()
    } else {
        0.0
    };
    (100.0 * 2.0 * overlap / (area1 + area2)).clamp(0.0, 100.0)
}

/// True when two parts of the multipolygon cover a common area. Parts that
/// only touch along edges or at corners do not count.
pub fn has_overlapping_parts(shape: &MultiPolygon<f64>) -> bool {
    let parts = &shape.0;
    parts.iter().enumerate().any(|(i, a)| {
        let area = a.unsigned_area();
        parts[i + 1..].iter().any(|b| {
            let shared = a.intersection(b).unsigned_area();
            shared > 1e-9 * area.max(b.unsigned_area()).max(1.0)
        })
    })
}

/// Hausdorff distance between the boundary vertices of both geometries, in
/// pixel units. Zero when both are empty, NaN when only one side is.
pub fn hausdorff(geo1: &MultiPolygon<f64>, geo2: &MultiPolygon<f64>) -> f64 {
    let set1: Vec<Coord<f64>> = geo1.coords_iter().collect();
    let set2: Vec<Coord<f64>> = geo2.coords_iter().collect();
    match (set1.is_empty(), set2.is_empty()) {
        (true, true) => 0.0,
        (false, false) => hausdorff_distance(&set1, &set2),
        _ => f64::NAN,
    }
}

/// Computes the Hausdorff distance between two point sets.
pub fn hausdorff_distance(set1: &[Coord<f64>], set2: &[Coord<f64>]) -> f64 {
    let forward = directed_hausdorff(set1, set2);
    let backward = directed_hausdorff(set2, set1);
    forward.max(backward)
}

fn directed_hausdorff(set_a: &[Coord<f64>], set_b: &[Coord<f64>]) -> f64 {
    set_a
        .par_iter()
        .map(|pa| {
            set_b
                .iter()
                .map(|pb| {
                    let dx = pa.x - pb.x;
                    let dy = pa.y - pb.y;
                    (dx * dx + dy * dy).sqrt()
                })
                .fold(f64::MAX, f64::min)
        })
        .reduce(|| 0.0, f64::max)
}

/// Overlap split of two contours: what both readers drew, and what only one did.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlapComparison {
    pub agreement: MultiPolygon<f64>,
    pub only_first: MultiPolygon<f64>,
    pub only_second: MultiPolygon<f64>,
}

impl OverlapComparison {
    pub fn areas(&self) -> (f64, f64, f64) {
        (
            self.agreement.unsigned_area(),
            self.only_first.unsigned_area(),
            self.only_second.unsigned_area(),
        )
    }
}

pub fn overlap_comparison(geo1: &MultiPolygon<f64>, geo2: &MultiPolygon<f64>) -> OverlapComparison {
    if geo1.0.is_empty() || geo2.0.is_empty() {
        return OverlapComparison {
            agreement: MultiPolygon::new(Vec::new()),
            only_first: geo1.clone(),
            only_second: geo2.clone(),
        };
    }
    OverlapComparison {
        agreement: geo1.intersection(geo2),
        only_first: geo1.difference(geo2),
        only_second: geo2.difference(geo1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::empty_contour;
    use crate::utils::test_utils::{ellipse_contour, square};
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn test_dice_both_empty_is_perfect() {
        assert_eq!(dice(&empty_contour(), &empty_contour()), 100.0);
    }

    #[test]
    fn test_dice_one_empty_is_zero() {
        let a = square(0.0, 0.0, 4.0);
        assert_eq!(dice(&a, &empty_contour()), 0.0);
        assert_eq!(dice(&empty_contour(), &a), 0.0);
    }

    #[test]
    fn test_dice_self_agreement() {
        let a = ellipse_contour(20.0, 20.0, 8.0, 5.0, 64);
        assert_relative_eq!(dice(&a, &a), 100.0, epsilon = 1e-6);
    }

    #[test]
    fn test_dice_half_overlap() {
        // 4x4 squares shifted by 2 share a 2x4 strip: 2*8 / 32
        let a = square(0.0, 0.0, 4.0);
        let b = square(2.0, 0.0, 4.0);
        assert_relative_eq!(dice(&a, &b), 50.0, epsilon = 1e-6);
    }

    #[test]
    fn test_dice_symmetric_and_bounded() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..25 {
            let a = ellipse_contour(
                rng.random_range(10.0..30.0),
                rng.random_range(10.0..30.0),
                rng.random_range(1.0..10.0),
                rng.random_range(1.0..10.0),
                32,
            );
            let b = square(
                rng.random_range(5.0..25.0),
                rng.random_range(5.0..25.0),
                rng.random_range(1.0..12.0),
            );
            let ab = dice(&a, &b);
            let ba = dice(&b, &a);
            assert_relative_eq!(ab, ba, epsilon = 1e-6);
            assert!((0.0..=100.0).contains(&ab), "dice out of range: {}", ab);
        }
    }

    #[test]
    fn test_overlapping_parts_detected() {
        let a = square(0.0, 0.0, 4.0);
        let b = square(4.0, 0.0, 4.0);
        let touching = MultiPolygon::new(a.0.iter().chain(b.0.iter()).cloned().collect());
        assert!(!has_overlapping_parts(&touching));
        let doubled = MultiPolygon::new(a.0.iter().chain(a.0.iter()).cloned().collect());
        assert!(has_overlapping_parts(&doubled));
        assert!(!has_overlapping_parts(&empty_contour()));
    }

    #[test]
    fn test_hausdorff_empty_handling() {
        let a = square(0.0, 0.0, 2.0);
        assert_eq!(hausdorff(&empty_contour(), &empty_contour()), 0.0);
        assert!(hausdorff(&a, &empty_contour()).is_nan());
        assert!(hausdorff(&empty_contour(), &a).is_nan());
    }

    #[test]
    fn test_hausdorff_shifted_square() {
        let a = square(0.0, 0.0, 2.0);
        let b = square(3.0, 4.0, 2.0);
        assert_relative_eq!(hausdorff(&a, &b), 5.0, epsilon = 1e-9);
        assert_relative_eq!(hausdorff(&a, &a), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_overlap_comparison_partitions_area() {
        let a = square(0.0, 0.0, 4.0);
        let b = square(2.0, 0.0, 4.0);
        let (both, only_a, only_b) = overlap_comparison(&a, &b).areas();
        assert_relative_eq!(both, 8.0, epsilon = 1e-6);
        assert_relative_eq!(only_a, 8.0, epsilon = 1e-6);
        assert_relative_eq!(only_b, 8.0, epsilon = 1e-6);
    }

    #[test]
    fn test_overlap_comparison_with_empty() {
        let a = square(0.0, 0.0, 4.0);
        let (both, only_a, only_b) = overlap_comparison(&a, &empty_contour()).areas();
        assert_eq!(both, 0.0);
        assert_relative_eq!(only_a, 16.0);
        assert_eq!(only_b, 0.0);
    }
}
