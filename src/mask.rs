use crate::error::{CalciumError, Result};
use crate::roi::{BoundingBox, Voxel, VoxelCoordinateSet};
use crate::slice::SliceStack;

use log::debug;
use ndarray::Array2;
use ndarray::Array3;
use ndarray::ArrayView2;
use ndarray::Axis;
use ndarray::Zip;
use ndarray::s;
use rayon::prelude::*;

/// Calibrated densities cropped to a ROI's bounding box.
///
/// `data` is laid out as (slice, row, col) in local indices; `offset` is the
/// global voxel of local index `[0, 0, 0]`. Every voxel outside the ROI, or
/// below the density floor it was built with, holds `0.0`.
#[derive(Clone, Debug, PartialEq)]
pub struct MaskedVolume {
    data: Array3<f32>,
    offset: Voxel,
}

impl MaskedVolume {
    /// Build the masked volume of `roi` over `stack`.
    ///
    /// Only the slices spanned by the ROI are calibrated, in parallel.
    pub fn build(stack: &SliceStack, roi: &VoxelCoordinateSet, density_floor: f32) -> Result<Self> {
        let bounds = roi.bounding_box();
        let (depth, rows, cols) = stack.dim();
        if bounds.max.slice >= depth {
            return Err(CalciumError::OutOfRangeSlice {
                reference: bounds.max.slice,
                len: depth,
            });
        }
        if bounds.max.row >= rows || bounds.max.col >= cols {
            return Err(CalciumError::InvalidRoi(format!(
                "ROI reaches ({}, {}) outside a {rows}x{cols} slice",
                bounds.max.row, bounds.max.col
            )));
        }

        let row_range = bounds.min.row..bounds.max.row + 1;
        let col_range = bounds.min.col..bounds.max.col + 1;
        let cropped: Vec<Array2<f32>> = (bounds.min.slice..=bounds.max.slice)
            .into_par_iter()
            .map(|index| {
                stack.slices()[index].calibrate_region(row_range.clone(), col_range.clone())
            })
            .collect::<Result<_>>()?;

        let mut data = Self::stack_slices(&cropped, &bounds);
        let offset = bounds.min;
        Zip::indexed(&mut data).par_for_each(|(s, r, c), value| {
            let global = Voxel::new(r + offset.row, c + offset.col, s + offset.slice);
            if value.is_nan() || *value < density_floor || !roi.contains(&global) {
                *value = 0.0;
            }
        });

        debug!(
            "Masked {} ROI voxels into a {:?} volume at offset {:?}",
            roi.len(),
            data.dim(),
            offset
        );
        Ok(Self { data, offset })
    }

    fn stack_slices(cropped: &[Array2<f32>], bounds: &BoundingBox) -> Array3<f32> {
        let mut volume = Array3::<f32>::zeros((bounds.slices(), bounds.rows(), bounds.cols()));
        for (i, image) in cropped.iter().enumerate() {
            volume.slice_mut(s![i, .., ..]).assign(image);
        }
        volume
    }

    /// Wrap already masked densities laid out as (slice, row, col).
    pub fn from_parts(data: Array3<f32>, offset: Voxel) -> Self {
        Self { data, offset }
    }

    /// Get the dimensions of the volume (slices, rows, columns)
    pub fn dim(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    pub fn data(&self) -> &Array3<f32> {
        &self.data
    }

    pub fn offset(&self) -> Voxel {
        self.offset
    }

    #[inline]
    pub fn to_global(&self, (s, r, c): (usize, usize, usize)) -> Voxel {
        Voxel::new(r + self.offset.row, c + self.offset.col, s + self.offset.slice)
    }

    /// Local index of a global voxel, `None` when it lies outside the volume.
    #[inline]
    fn to_local(&self, voxel: &Voxel) -> Option<(usize, usize, usize)> {
        let (depth, rows, cols) = self.dim();
        let s = voxel.slice.checked_sub(self.offset.slice).filter(|&s| s < depth)?;
        let r = voxel.row.checked_sub(self.offset.row).filter(|&r| r < rows)?;
        let c = voxel.col.checked_sub(self.offset.col).filter(|&c| c < cols)?;
        Some((s, r, c))
    }

    pub fn slices(&self) -> impl Iterator<Item = ArrayView2<'_, f32>> {
        self.data.axis_iter(Axis(0))
    }

    pub fn count_nonzero(&self) -> usize {
        self.data.iter().filter(|&&v| v != 0.0).count()
    }

    /// Highest density in the volume, `None` when every voxel is zero.
    pub fn peak(&self) -> Option<f32> {
        self.data
            .iter()
            .copied()
            .filter(|&v| v != 0.0)
            .reduce(f32::max)
    }

    /// Zero every voxel whose global coordinate fails `keep`.
    pub fn retain(&mut self, keep: impl Fn(&Voxel) -> bool + Sync) {
        let offset = self.offset;
        Zip::indexed(&mut self.data).par_for_each(|(s, r, c), value| {
            if *value != 0.0 && !keep(&Voxel::new(r + offset.row, c + offset.col, s + offset.slice)) {
                *value = 0.0;
            }
        });
    }

    /// Sub-volume over the bounding box of `voxels` holding only those voxels.
    ///
    /// Returns `None` for an empty voxel list or when any voxel lies outside
    /// this volume.
    pub fn isolate(&self, voxels: &[Voxel]) -> Option<Self> {
        let bounds = BoundingBox::enclosing(voxels)?;
        let mut data = Array3::<f32>::zeros((bounds.slices(), bounds.rows(), bounds.cols()));
        for voxel in voxels {
            let (s, r, c) = self.to_local(voxel)?;
            data[[
                voxel.slice - bounds.min.slice,
                voxel.row - bounds.min.row,
                voxel.col - bounds.min.col,
            ]] = self.data[[s, r, c]];
        }
        Some(Self {
            data,
            offset: bounds.min,
        })
    }
}
