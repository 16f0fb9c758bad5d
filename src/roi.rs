//! Region of interest geometry and its resolution into voxel coordinates.
//!
//! A ROI is a 2D footprint (a circle or a polygon drawn on a reference slice)
//! extended over an inclusive range of slices. Resolving it against the
//! stack dimensions yields the explicit [`VoxelCoordinateSet`] every later
//! stage works from.

use crate::error::{CalciumError, Result};

use serde::Serialize;
use std::collections::BTreeSet;
use std::collections::HashSet;

const ON_EDGE_EPSILON: f64 = 1e-9;

/// Global voxel coordinate inside a slice stack.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Voxel {
    pub row: usize,
    pub col: usize,
    pub slice: usize,
}

impl Voxel {
    pub fn new(row: usize, col: usize, slice: usize) -> Self {
        Self { row, col, slice }
    }
}

/// Inclusive min/max voxel position per axis.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct BoundingBox {
    pub min: Voxel,
    pub max: Voxel,
}

impl BoundingBox {
    pub fn rows(&self) -> usize {
        self.max.row - self.min.row + 1
    }

    pub fn cols(&self) -> usize {
        self.max.col - self.min.col + 1
    }

    pub fn slices(&self) -> usize {
        self.max.slice - self.min.slice + 1
    }

    fn include(&mut self, voxel: &Voxel) {
        self.min.row = self.min.row.min(voxel.row);
        self.min.col = self.min.col.min(voxel.col);
        self.min.slice = self.min.slice.min(voxel.slice);
        self.max.row = self.max.row.max(voxel.row);
        self.max.col = self.max.col.max(voxel.col);
        self.max.slice = self.max.slice.max(voxel.slice);
    }

    /// Smallest box enclosing every voxel, `None` for an empty iterator.
    pub fn enclosing<'a>(voxels: impl IntoIterator<Item = &'a Voxel>) -> Option<Self> {
        let mut voxels = voxels.into_iter();
        let first = *voxels.next()?;
        let mut bbox = Self {
            min: first,
            max: first,
        };
        voxels.for_each(|voxel| bbox.include(voxel));
        Some(bbox)
    }
}

/// In-plane position as drawn on screen: `x` is the column, `y` the row.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum RoiShape {
    Circular { center: Point, radius: f64 },
    Polygon { vertices: Vec<Point> },
}

impl RoiShape {
    fn validate(&self) -> Result<()> {
        match self {
            RoiShape::Circular { center, radius } => {
                if !center.is_finite() {
                    return Err(CalciumError::InvalidRoi(format!(
                        "circle center {center:?} is not finite"
                    )));
                }
                if !radius.is_finite() || *radius <= 0.0 {
                    return Err(CalciumError::InvalidRoi(format!(
                        "circle radius must be positive, got {radius}"
                    )));
                }
            }
            RoiShape::Polygon { vertices } => {
                if vertices.len() < 3 {
                    return Err(CalciumError::InvalidRoi(format!(
                        "polygon needs at least 3 vertices, got {}",
                        vertices.len()
                    )));
                }
                if !vertices.iter().all(Point::is_finite) {
                    return Err(CalciumError::InvalidRoi(
                        "polygon has a non-finite vertex".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Every `(row, col)` of a `rows` x `cols` grid covered by the shape.
    pub fn footprint(&self, rows: usize, cols: usize) -> Result<Vec<(usize, usize)>> {
        self.validate()?;

        let footprint: Vec<_> = match self {
            RoiShape::Circular { center, radius } => {
                // Distances are taken from the center snapped to its pixel.
                let center_row = center.y.round_ties_even();
                let center_col = center.x.round_ties_even();
                grid(rows, cols)
                    .filter(|&(r, c)| {
                        let dr = r as f64 - center_row;
                        let dc = c as f64 - center_col;
                        dr.hypot(dc) <= *radius
                    })
                    .collect()
            }
            RoiShape::Polygon { vertices } => grid(rows, cols)
                .filter(|&(r, c)| polygon_contains(vertices, c as f64, r as f64))
                .collect(),
        };

        if footprint.is_empty() {
            return Err(CalciumError::InvalidRoi(
                "shape covers no pixel of the slice grid".to_string(),
            ));
        }
        Ok(footprint)
    }
}

fn grid(rows: usize, cols: usize) -> impl Iterator<Item = (usize, usize)> {
    (0..rows).flat_map(move |r| (0..cols).map(move |c| (r, c)))
}

fn on_segment(a: Point, b: Point, px: f64, py: f64) -> bool {
    let cross = (b.x - a.x) * (py - a.y) - (b.y - a.y) * (px - a.x);
    if cross.abs() > ON_EDGE_EPSILON {
        return false;
    }
    px >= a.x.min(b.x) - ON_EDGE_EPSILON
        && px <= a.x.max(b.x) + ON_EDGE_EPSILON
        && py >= a.y.min(b.y) - ON_EDGE_EPSILON
        && py <= a.y.max(b.y) + ON_EDGE_EPSILON
}

/// Even-odd ray casting; points lying on an edge count as inside.
fn polygon_contains(vertices: &[Point], px: f64, py: f64) -> bool {
    let mut inside = false;
    let mut j = vertices.len() - 1;
    for i in 0..vertices.len() {
        let vi = vertices[i];
        let vj = vertices[j];
        if on_segment(vj, vi, px, py) {
            return true;
        }
        if ((vi.y > py) != (vj.y > py)) && (px < (vj.x - vi.x) * (py - vi.y) / (vj.y - vi.y) + vi.x)
        {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Inclusive range of slice indices.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SliceRange {
    pub min: usize,
    pub max: usize,
}

impl SliceRange {
    pub fn len(&self) -> usize {
        self.max - self.min + 1
    }

    pub fn is_empty(&self) -> bool {
        self.max < self.min
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> {
        self.min..=self.max
    }
}

/// A footprint drawn on `slice_index`, extended `below` slices down and
/// `above` slices up.
#[derive(Clone, Debug, PartialEq)]
pub struct RoiSpec {
    pub shape: RoiShape,
    pub slice_index: usize,
    below: usize,
    above: usize,
}

impl RoiSpec {
    /// ROI covering `[slice_index - z_bounds, slice_index + z_bounds]`.
    pub fn new(shape: RoiShape, slice_index: usize, z_bounds: usize) -> Self {
        Self {
            shape,
            slice_index,
            below: z_bounds,
            above: z_bounds,
        }
    }

    /// ROI covering `[min_slice, max_slice]`, anchored at `slice_index`.
    pub fn with_slice_range(
        shape: RoiShape,
        slice_index: usize,
        min_slice: usize,
        max_slice: usize,
    ) -> Result<Self> {
        if !(min_slice <= slice_index && slice_index <= max_slice) {
            return Err(CalciumError::InvalidRoi(format!(
                "reference slice {slice_index} is not within [{min_slice}, {max_slice}]"
            )));
        }
        Ok(Self {
            shape,
            slice_index,
            below: slice_index - min_slice,
            above: max_slice - slice_index,
        })
    }

    /// The requested range clipped to a stack of `depth` slices.
    pub fn slice_range(&self, depth: usize) -> Result<SliceRange> {
        if self.slice_index >= depth {
            return Err(CalciumError::OutOfRangeSlice {
                reference: self.slice_index,
                len: depth,
            });
        }
        Ok(SliceRange {
            min: self.slice_index.saturating_sub(self.below),
            max: self.slice_index.saturating_add(self.above).min(depth - 1),
        })
    }

    /// Resolve against a stack of dimensions `(depth, rows, cols)`.
    pub fn resolve(&self, dim: (usize, usize, usize)) -> Result<VoxelCoordinateSet> {
        let (depth, rows, cols) = dim;
        let range = self.slice_range(depth)?;
        let footprint = self.shape.footprint(rows, cols)?;

        let voxels: HashSet<Voxel> = range
            .iter()
            .flat_map(|slice| {
                footprint
                    .iter()
                    .map(move |&(row, col)| Voxel::new(row, col, slice))
            })
            .collect();
        VoxelCoordinateSet::new(voxels)
    }
}

/// Unique, non-empty set of global voxel coordinates.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VoxelCoordinateSet {
    voxels: HashSet<Voxel>,
    bounds: BoundingBox,
}

impl VoxelCoordinateSet {
    pub fn new(voxels: HashSet<Voxel>) -> Result<Self> {
        let bounds = BoundingBox::enclosing(&voxels)
            .ok_or_else(|| CalciumError::InvalidRoi("ROI resolves to zero voxels".to_string()))?;
        Ok(Self { voxels, bounds })
    }

    pub fn from_voxels(voxels: impl IntoIterator<Item = Voxel>) -> Result<Self> {
        Self::new(voxels.into_iter().collect())
    }

    pub fn len(&self) -> usize {
        self.voxels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voxels.is_empty()
    }

    #[inline]
    pub fn contains(&self, voxel: &Voxel) -> bool {
        self.voxels.contains(voxel)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Voxel> {
        self.voxels.iter()
    }

    pub fn bounding_box(&self) -> BoundingBox {
        self.bounds
    }

    pub fn slice_indices(&self) -> BTreeSet<usize> {
        self.voxels.iter().map(|voxel| voxel.slice).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn circle(x: f64, y: f64, radius: f64) -> RoiShape {
        RoiShape::Circular {
            center: Point::new(x, y),
            radius,
        }
    }

    #[test]
    fn circle_is_boundary_inclusive_around_rounded_center() {
        let shape = circle(5.4, 4.6, 2.0);
        let footprint = shape.footprint(10, 10).unwrap();
        // center snaps to (row 5, col 5)
        assert!(footprint.contains(&(5, 5)));
        assert!(footprint.contains(&(3, 5)));
        assert!(footprint.contains(&(5, 7)));
        assert!(!footprint.contains(&(3, 6)));
        for r in 0..10 {
            for c in 0..10 {
                let d = ((r as f64 - 5.0).powi(2) + (c as f64 - 5.0).powi(2)).sqrt();
                assert_eq!(footprint.contains(&(r, c)), d <= 2.0, "({r}, {c})");
            }
        }
    }

    #[test]
    fn center_rounding_ties_to_even() {
        let footprint = circle(2.5, 2.5, 0.5).footprint(6, 6).unwrap();
        assert_eq!(footprint, vec![(2, 2)]);
    }

    #[test]
    fn degenerate_shapes_are_invalid() {
        assert!(matches!(
            circle(3.0, 3.0, 0.0).footprint(8, 8),
            Err(CalciumError::InvalidRoi(_))
        ));
        assert!(matches!(
            circle(3.0, 3.0, -1.0).footprint(8, 8),
            Err(CalciumError::InvalidRoi(_))
        ));
        let line = RoiShape::Polygon {
            vertices: vec![Point::new(0.0, 0.0), Point::new(4.0, 4.0)],
        };
        assert!(matches!(
            line.footprint(8, 8),
            Err(CalciumError::InvalidRoi(_))
        ));
    }

    #[test]
    fn circle_outside_grid_is_invalid() {
        assert!(matches!(
            circle(50.0, 50.0, 1.0).footprint(8, 8),
            Err(CalciumError::InvalidRoi(_))
        ));
    }

    #[test]
    fn polygon_includes_its_boundary() {
        let square = RoiShape::Polygon {
            vertices: vec![
                Point::new(1.0, 1.0),
                Point::new(3.0, 1.0),
                Point::new(3.0, 3.0),
                Point::new(1.0, 3.0),
            ],
        };
        let footprint = square.footprint(6, 6).unwrap();
        assert_eq!(footprint.len(), 9);
        assert!(footprint.contains(&(1, 1)));
        assert!(footprint.contains(&(3, 3)));
        assert!(footprint.contains(&(2, 3)));
        assert!(!footprint.contains(&(0, 2)));
        assert!(!footprint.contains(&(4, 2)));
    }

    #[test]
    fn triangle_contains_interior_points() {
        let triangle = RoiShape::Polygon {
            vertices: vec![
                Point::new(0.0, 0.0),
                Point::new(6.0, 0.0),
                Point::new(0.0, 6.0),
            ],
        };
        let footprint = triangle.footprint(8, 8).unwrap();
        assert!(footprint.contains(&(1, 1)));
        assert!(footprint.contains(&(3, 3)));
        assert!(!footprint.contains(&(4, 4)));
        assert!(!footprint.contains(&(7, 0)));
    }

    #[test]
    fn slice_range_is_clipped_to_stack() {
        let spec = RoiSpec::new(circle(2.0, 2.0, 1.0), 1, 3);
        let resolved = spec.resolve((4, 5, 5)).unwrap();
        assert_eq!(resolved.slice_indices(), (0..=3).collect());
        assert_eq!(resolved.len(), 5 * 4);

        let spec = RoiSpec::new(circle(2.0, 2.0, 1.0), 5, 1);
        assert_eq!(spec.slice_range(10).unwrap(), SliceRange { min: 4, max: 6 });
    }

    #[test]
    fn reference_outside_stack_is_out_of_range() {
        let spec = RoiSpec::new(circle(2.0, 2.0, 1.0), 4, 1);
        assert_eq!(
            spec.resolve((4, 5, 5)).unwrap_err(),
            CalciumError::OutOfRangeSlice {
                reference: 4,
                len: 4
            }
        );
    }

    #[test]
    fn explicit_range_must_contain_reference() {
        assert!(RoiSpec::with_slice_range(circle(2.0, 2.0, 1.0), 1, 2, 3).is_err());
        let spec = RoiSpec::with_slice_range(circle(2.0, 2.0, 1.0), 2, 1, 4).unwrap();
        assert_eq!(spec.slice_range(10).unwrap(), SliceRange { min: 1, max: 4 });
    }

    #[test]
    fn coordinate_set_reports_bounding_box() {
        let set = VoxelCoordinateSet::from_voxels([
            Voxel::new(4, 1, 2),
            Voxel::new(2, 6, 3),
            Voxel::new(3, 3, 2),
        ])
        .unwrap();
        assert_eq!(
            set.bounding_box(),
            BoundingBox {
                min: Voxel::new(2, 1, 2),
                max: Voxel::new(4, 6, 3),
            }
        );

        assert!(matches!(
            VoxelCoordinateSet::from_voxels(std::iter::empty()),
            Err(CalciumError::InvalidRoi(_))
        ));
    }
}
