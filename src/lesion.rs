//! Connected-component labelling of calcified voxels.

use crate::enums::Connectivity;
use crate::mask::MaskedVolume;
use crate::roi::{BoundingBox, Voxel};

use log::debug;
use ndarray::Array3;
use serde::Serialize;
use std::collections::VecDeque;

/// One connected cluster of non-zero voxels of a [`MaskedVolume`].
#[derive(Clone, Debug, PartialEq)]
pub struct Component {
    pub label: u32,
    /// Global coordinates in discovery order.
    pub voxels: Vec<Voxel>,
    offset: Voxel,
}

impl Component {
    pub fn voxel_count(&self) -> usize {
        self.voxels.len()
    }

    /// Mean voxel position rounded half to even in local indices, then
    /// moved into global coordinates.
    pub fn centroid(&self) -> Voxel {
        let n = self.voxels.len() as f64;
        let mean = |axis: fn(&Voxel) -> usize, origin: usize| -> usize {
            let sum: f64 = self.voxels.iter().map(|v| (axis(v) - origin) as f64).sum();
            (sum / n).round_ties_even() as usize + origin
        };
        Voxel::new(
            mean(|v| v.row, self.offset.row),
            mean(|v| v.col, self.offset.col),
            mean(|v| v.slice, self.offset.slice),
        )
    }

    pub fn bounding_box(&self) -> BoundingBox {
        BoundingBox::enclosing(&self.voxels).unwrap_or(BoundingBox {
            min: self.offset,
            max: self.offset,
        })
    }
}

/// A calcified lesion with its own score and volume.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Lesion {
    pub label: u32,
    pub voxel_count: usize,
    pub peak_density: f32,
    pub score: f64,
    pub volume_mm3: f64,
    pub centroid: Voxel,
    pub bbox: BoundingBox,
    #[serde(skip)]
    pub voxels: Vec<Voxel>,
}

/// Label volume and the components found in it.
pub struct Labeling {
    pub labels: Array3<u32>,
    pub components: Vec<Component>,
}

fn neighbour_offsets(connectivity: Connectivity) -> Vec<(isize, isize, isize)> {
    let slice_offsets: &[isize] = match connectivity {
        Connectivity::Volumetric => &[-1, 0, 1],
        Connectivity::PerSlice => &[0],
    };
    let mut offsets = Vec::with_capacity(26);
    for &ds in slice_offsets {
        for dr in -1..=1 {
            for dc in -1..=1 {
                if (ds, dr, dc) != (0, 0, 0) {
                    offsets.push((ds, dr, dc));
                }
            }
        }
    }
    offsets
}

#[inline]
fn step(index: usize, delta: isize, len: usize) -> Option<usize> {
    index.checked_add_signed(delta).filter(|&i| i < len)
}

/// Label every connected cluster of non-zero voxels.
///
/// Labels start at 1 and follow scan order (slice, row, col). With
/// [`Connectivity::PerSlice`] no component ever crosses a slice.
pub fn label_components(volume: &MaskedVolume, connectivity: Connectivity) -> Labeling {
    let data = volume.data();
    let (depth, rows, cols) = data.dim();
    let offsets = neighbour_offsets(connectivity);
    let mut labels = Array3::<u32>::zeros(data.dim());
    let mut components = Vec::new();
    let mut queue = VecDeque::new();

    for ((s, r, c), &value) in data.indexed_iter() {
        if value == 0.0 || labels[[s, r, c]] != 0 {
            continue;
        }
        let label = components.len() as u32 + 1;
        labels[[s, r, c]] = label;
        queue.push_back((s, r, c));
        let mut voxels = Vec::new();

        while let Some((cs, cr, cc)) = queue.pop_front() {
            voxels.push(volume.to_global((cs, cr, cc)));
            for &(ds, dr, dc) in &offsets {
                let (Some(ns), Some(nr), Some(nc)) = (
                    step(cs, ds, depth),
                    step(cr, dr, rows),
                    step(cc, dc, cols),
                ) else {
                    continue;
                };
                if data[[ns, nr, nc]] != 0.0 && labels[[ns, nr, nc]] == 0 {
                    labels[[ns, nr, nc]] = label;
                    queue.push_back((ns, nr, nc));
                }
            }
        }

        components.push(Component {
            label,
            voxels,
            offset: volume.offset(),
        });
    }

    debug!(
        "Labelled {} {:?} components in a {:?} volume",
        components.len(),
        connectivity,
        data.dim()
    );
    Labeling { labels, components }
}

/// Components of at least `min_voxels` voxels; smaller ones are noise.
pub fn segment(
    volume: &MaskedVolume,
    connectivity: Connectivity,
    min_voxels: usize,
) -> Vec<Component> {
    let Labeling { components, .. } = label_components(volume, connectivity);
    let found = components.len();
    let retained: Vec<_> = components
        .into_iter()
        .filter(|component| component.voxel_count() >= min_voxels)
        .collect();
    debug!(
        "Discarded {} of {found} components below {min_voxels} voxels",
        found - retained.len()
    );
    retained
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::s;

    fn volume_with_blocks(blocks: &[(usize, usize, usize, usize)]) -> MaskedVolume {
        // (slice start, slice count, row start, col start) of 3x3 blocks
        let mut data = Array3::<f32>::zeros((4, 12, 12));
        for &(s0, n, r0, c0) in blocks {
            data.slice_mut(s![s0..s0 + n, r0..r0 + 3, c0..c0 + 3])
                .fill(250.0);
        }
        MaskedVolume::from_parts(data, Voxel::new(100, 200, 5))
    }

    #[test]
    fn two_disjoint_blocks_are_two_lesions() {
        let volume = volume_with_blocks(&[(0, 1, 0, 0), (0, 1, 6, 6)]);
        let components = segment(&volume, Connectivity::Volumetric, 2);
        assert_eq!(components.len(), 2);
        assert_eq!(components[0].voxel_count(), 9);
        assert_eq!(components[0].centroid(), Voxel::new(101, 201, 5));
        assert_eq!(components[1].centroid(), Voxel::new(107, 207, 5));
        assert_eq!(
            components[1].bounding_box(),
            BoundingBox {
                min: Voxel::new(106, 206, 5),
                max: Voxel::new(108, 208, 5),
            }
        );
    }

    #[test]
    fn diagonal_neighbours_across_slices_join_in_3d_only() {
        let mut data = Array3::<f32>::zeros((2, 3, 3));
        data[[0, 0, 0]] = 300.0;
        data[[1, 1, 1]] = 300.0;
        let volume = MaskedVolume::from_parts(data, Voxel::new(0, 0, 0));

        let labeling = label_components(&volume, Connectivity::Volumetric);
        assert_eq!(labeling.components.len(), 1);
        assert_eq!(labeling.labels[[1, 1, 1]], 1);

        let labeling = label_components(&volume, Connectivity::PerSlice);
        assert_eq!(labeling.components.len(), 2);
        assert_eq!(labeling.labels[[1, 1, 1]], 2);
    }

    #[test]
    fn per_slice_splits_a_block_spanning_slices() {
        let volume = volume_with_blocks(&[(1, 2, 4, 4)]);
        assert_eq!(segment(&volume, Connectivity::Volumetric, 1).len(), 1);
        let per_slice = segment(&volume, Connectivity::PerSlice, 1);
        assert_eq!(per_slice.len(), 2);
        assert_eq!(per_slice[0].centroid().slice, 6);
        assert_eq!(per_slice[1].centroid().slice, 7);
    }

    #[test]
    fn small_components_are_discarded() {
        let mut data = Array3::<f32>::zeros((1, 6, 6));
        data[[0, 0, 0]] = 500.0;
        data.slice_mut(s![0, 3..5, 3..5]).fill(500.0);
        let volume = MaskedVolume::from_parts(data, Voxel::new(0, 0, 0));
        let components = segment(&volume, Connectivity::Volumetric, 2);
        assert_eq!(components.len(), 1);
        assert_eq!(components[0].label, 2);
        assert_eq!(components[0].voxel_count(), 4);
    }

    #[test]
    fn centroid_rounds_in_local_coordinates() {
        // local rows 0 and 1 average to 0.5 which rounds to 0
        let mut data = Array3::<f32>::zeros((1, 2, 1));
        data.fill(200.0);
        let volume = MaskedVolume::from_parts(data, Voxel::new(3, 0, 0));
        let components = segment(&volume, Connectivity::Volumetric, 1);
        assert_eq!(components[0].centroid(), Voxel::new(3, 0, 0));
    }
}
