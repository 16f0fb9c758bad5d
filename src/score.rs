//! Agatston-style density scoring and calcified volume integration.

use crate::mask::MaskedVolume;

use log::trace;
use ndarray::ArrayView2;

/// Minimum calibrated density of a calcified voxel.
pub const DENSITY_FLOOR: f32 = 130.0;
const WEIGHT_2_MIN: f32 = 200.0;
const WEIGHT_3_MIN: f32 = 300.0;
const WEIGHT_4_MIN: f32 = 400.0;

/// Slices whose calcified area does not exceed this (mm²) are not scored.
pub const MIN_SCORED_AREA_MM2: f64 = 1.0;

/// Weight of a peak density, `None` below `density_floor`.
///
/// Bins are `[floor, 200) -> 1`, `[200, 300) -> 2`, `[300, 400) -> 3`,
/// `[400, inf) -> 4`.
pub fn density_weight(peak: f32, density_floor: f32) -> Option<u8> {
    if peak.is_nan() || peak < density_floor {
        None
    } else if peak < WEIGHT_2_MIN {
        Some(1)
    } else if peak < WEIGHT_3_MIN {
        Some(2)
    } else if peak < WEIGHT_4_MIN {
        Some(3)
    } else {
        Some(4)
    }
}

/// Weighted area of one slice, `None` when the slice is excluded.
pub fn slice_score(slice: ArrayView2<'_, f32>, pixel_area: f64, density_floor: f32) -> Option<f64> {
    let (count, peak) = slice
        .iter()
        .filter(|&&v| v != 0.0)
        .fold((0usize, f32::NEG_INFINITY), |(n, peak), &v| (n + 1, peak.max(v)));
    let area = count as f64 * pixel_area;
    if area <= MIN_SCORED_AREA_MM2 {
        return None;
    }
    density_weight(peak, density_floor).map(|weight| area * weight as f64)
}

/// Sum of the weighted areas of every scored slice, `+0.0` when none is scored.
pub fn agatston_score(volume: &MaskedVolume, pixel_area: f64, density_floor: f32) -> f64 {
    volume
        .slices()
        .enumerate()
        .filter_map(|(i, slice)| {
            let score = slice_score(slice, pixel_area, density_floor)?;
            trace!("Slice {} contributes {score}", volume.offset().slice + i);
            Some(score)
        })
        .fold(0.0, |total, score| total + score)
}

/// Calcified volume in mm³: non-zero voxels times the physical voxel volume.
pub fn calcium_volume(volume: &MaskedVolume, pixel_area: f64, z_spacing: f64) -> f64 {
    volume.count_nonzero() as f64 * pixel_area * z_spacing
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roi::Voxel;
    use ndarray::{Array2, Array3, s};

    #[test]
    fn weight_bins_match_boundaries() {
        assert_eq!(density_weight(129.999, DENSITY_FLOOR), None);
        assert_eq!(density_weight(130.0, DENSITY_FLOOR), Some(1));
        assert_eq!(density_weight(199.9, DENSITY_FLOOR), Some(1));
        assert_eq!(density_weight(200.0, DENSITY_FLOOR), Some(2));
        assert_eq!(density_weight(300.0, DENSITY_FLOOR), Some(3));
        assert_eq!(density_weight(399.999, DENSITY_FLOOR), Some(3));
        assert_eq!(density_weight(400.0, DENSITY_FLOOR), Some(4));
        assert_eq!(density_weight(3000.0, DENSITY_FLOOR), Some(4));
        assert_eq!(density_weight(f32::NAN, DENSITY_FLOOR), None);
    }

    #[test]
    fn area_of_exactly_one_mm2_is_excluded() {
        let mut slice = Array2::<f32>::zeros((4, 4));
        slice[[1, 1]] = 450.0;
        assert_eq!(slice_score(slice.view(), 1.0, DENSITY_FLOOR), None);
        slice[[1, 2]] = 150.0;
        assert_eq!(slice_score(slice.view(), 1.0, DENSITY_FLOOR), Some(8.0));
    }

    #[test]
    fn block_of_250_scores_18() {
        let mut data = Array3::<f32>::zeros((1, 5, 5));
        data.slice_mut(s![0, 1..4, 1..4]).fill(250.0);
        let volume = MaskedVolume::from_parts(data, Voxel::new(0, 0, 0));
        assert_eq!(agatston_score(&volume, 1.0, DENSITY_FLOOR), 18.0);
    }

    #[test]
    fn block_over_two_slices_is_45_mm3() {
        let data = Array3::<f32>::from_elem((2, 3, 3), 250.0);
        let volume = MaskedVolume::from_parts(data, Voxel::new(0, 0, 0));
        assert_eq!(calcium_volume(&volume, 1.0, 2.5), 45.0);
        assert_eq!(agatston_score(&volume, 1.0, DENSITY_FLOOR), 36.0);
    }

    #[test]
    fn slices_are_weighted_by_their_own_peak() {
        let mut data = Array3::<f32>::zeros((2, 2, 2));
        data.slice_mut(s![0, .., ..]).fill(180.0);
        data.slice_mut(s![1, .., ..]).fill(180.0);
        data[[1, 0, 0]] = 420.0;
        let volume = MaskedVolume::from_parts(data, Voxel::new(0, 0, 0));
        // 4 mm² * 1 + 4 mm² * 4
        assert_eq!(agatston_score(&volume, 1.0, DENSITY_FLOOR), 20.0);
        // sub-mm² pixels shrink the area below the cut-off
        assert_eq!(agatston_score(&volume, 0.25, DENSITY_FLOOR), 0.0);
    }

    #[test]
    fn empty_volume_scores_positive_zero() {
        let volume = MaskedVolume::from_parts(Array3::zeros((3, 4, 4)), Voxel::new(0, 0, 0));
        let score = agatston_score(&volume, 1.0, DENSITY_FLOOR);
        assert_eq!(score, 0.0);
        assert!(!score.is_sign_negative());
        assert!(!calcium_volume(&volume, 1.0, 2.5).is_sign_negative());
    }
}
