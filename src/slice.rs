use crate::enums::SpacingSource;
use crate::error::{CalciumError, Result};

use ndarray::Array2;
use ndarray::ArrayView2;
use ndarray::s;
use std::ops::Range;

/// Modality rescale of a slice: `density = slope * raw + intercept`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Rescale {
    pub slope: f64,
    pub intercept: f64,
}

impl Rescale {
    pub fn new(slope: f64, intercept: f64) -> Self {
        Self { slope, intercept }
    }

    /// Both coefficients are finite numbers.
    pub fn is_finite(&self) -> bool {
        self.slope.is_finite() && self.intercept.is_finite()
    }

    #[inline]
    pub fn apply(&self, raw: f32) -> f32 {
        self.slope.mul_add(raw as f64, self.intercept) as f32
    }
}

/// One raw cross-section with the attributes needed to calibrate and measure it.
#[derive(Clone, Debug)]
pub struct Slice {
    pixels: Array2<f32>,
    rescale: Option<Rescale>,
    pixel_spacing: Option<(f64, f64)>,
    instance_number: i32,
}

impl Slice {
    pub fn new(pixels: Array2<f32>, instance_number: i32) -> Self {
        Self {
            pixels,
            rescale: None,
            pixel_spacing: None,
            instance_number,
        }
    }

    pub fn with_rescale(mut self, rescale: Rescale) -> Self {
        self.rescale = Some(rescale);
        self
    }

    /// Physical (row, column) pixel size in millimetres.
    pub fn with_pixel_spacing(mut self, pixel_spacing: (f64, f64)) -> Self {
        self.pixel_spacing = Some(pixel_spacing);
        self
    }

    /// Get the dimensions of the slice (rows, columns)
    pub fn dim(&self) -> (usize, usize) {
        self.pixels.dim()
    }

    pub fn instance_number(&self) -> i32 {
        self.instance_number
    }

    pub fn pixels(&self) -> ArrayView2<'_, f32> {
        self.pixels.view()
    }

    pub fn rescale(&self) -> Option<Rescale> {
        self.rescale
    }

    pub fn pixel_spacing(&self) -> Option<(f64, f64)> {
        self.pixel_spacing
    }

    /// Area covered by one pixel in mm².
    pub fn pixel_area(&self) -> Result<f64> {
        match self.pixel_spacing {
            Some((row, col)) if row.is_finite() && col.is_finite() && row > 0.0 && col > 0.0 => {
                Ok(row * col)
            }
            _ => Err(CalciumError::MissingSpacing("pixel spacing")),
        }
    }

    /// Calibrate the whole slice into density units.
    pub fn calibrate(&self) -> Result<Array2<f32>> {
        let (rows, cols) = self.dim();
        self.calibrate_region(0..rows, 0..cols)
    }

    /// Calibrate only the `rows` x `cols` window of the slice.
    ///
    /// A slice without a rescale, or with a non-finite slope or intercept,
    /// fails instead of falling back to the identity transform.
    pub fn calibrate_region(&self, rows: Range<usize>, cols: Range<usize>) -> Result<Array2<f32>> {
        let rescale = self
            .rescale
            .filter(Rescale::is_finite)
            .ok_or(CalciumError::MissingCalibration {
                instance: self.instance_number,
            })?;
        Ok(self
            .pixels
            .slice(s![rows, cols])
            .mapv(|raw| rescale.apply(raw)))
    }
}

/// Slices of one study ordered by strictly increasing instance number.
#[derive(Clone, Debug)]
pub struct SliceStack {
    slices: Vec<Slice>,
    slice_spacing: Option<f64>,
    slice_thickness: Option<f64>,
}

impl SliceStack {
    pub fn new(slices: Vec<Slice>) -> Result<Self> {
        let first = slices.first().ok_or(CalciumError::EmptyStack)?;
        let first_dim = first.dim();
        if slices.iter().any(|slice| slice.dim() != first_dim) {
            return Err(CalciumError::InconsistentDimensions);
        }
        if slices
            .windows(2)
            .any(|pair| pair[0].instance_number >= pair[1].instance_number)
        {
            return Err(CalciumError::UnorderedStack);
        }

        Ok(Self {
            slices,
            slice_spacing: None,
            slice_thickness: None,
        })
    }

    /// Distance between consecutive slice centres in mm.
    pub fn with_slice_spacing(mut self, spacing: f64) -> Self {
        self.slice_spacing = Some(spacing);
        self
    }

    /// Imaged slab thickness in mm.
    pub fn with_slice_thickness(mut self, thickness: f64) -> Self {
        self.slice_thickness = Some(thickness);
        self
    }

    pub fn len(&self) -> usize {
        self.slices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }

    /// Get the dimensions of the stack (depth, rows, columns)
    pub fn dim(&self) -> (usize, usize, usize) {
        let (rows, cols) = self.slices[0].dim();
        (self.slices.len(), rows, cols)
    }

    pub fn get(&self, index: usize) -> Option<&Slice> {
        self.slices.get(index)
    }

    pub fn slices(&self) -> &[Slice] {
        &self.slices
    }

    pub fn slice_spacing(&self) -> Option<f64> {
        self.slice_spacing
    }

    pub fn slice_thickness(&self) -> Option<f64> {
        self.slice_thickness
    }

    /// The z extent of one voxel according to the chosen attribute.
    pub fn z_spacing(&self, source: SpacingSource) -> Result<f64> {
        let (value, name) = match source {
            SpacingSource::SliceSpacing => (self.slice_spacing, "slice spacing"),
            SpacingSource::SliceThickness => (self.slice_thickness, "slice thickness"),
        };
        match value {
            Some(v) if v.is_finite() && v > 0.0 => Ok(v),
            _ => Err(CalciumError::MissingSpacing(name)),
        }
    }
}
