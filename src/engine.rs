use crate::enums::{Connectivity, SpacingSource};
use crate::error::{CalciumError, Result};
use crate::lesion::{self, Component, Lesion};
use crate::mask::MaskedVolume;
use crate::roi::{RoiSpec, Voxel, VoxelCoordinateSet};
use crate::score::{self, DENSITY_FLOOR};
use crate::slice::SliceStack;

use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

const DEFAULT_MIN_CALCIUM_VOXELS: usize = 2;
const DEFAULT_MICRO_CALCIUM_THRESHOLD: usize = 3;

fn default_density_floor() -> f32 {
    DENSITY_FLOOR
}

fn default_min_calcium_voxels() -> usize {
    DEFAULT_MIN_CALCIUM_VOXELS
}

fn default_micro_calcium_threshold() -> usize {
    DEFAULT_MICRO_CALCIUM_THRESHOLD
}

/// Parameters of a scoring run.
///
/// `spacing_source` must always be given explicitly, in code and in TOML.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Densities below this are not calcium, both when masking and when
    /// weighting a slice.
    #[serde(default = "default_density_floor")]
    pub density_floor: f32,
    /// Components smaller than this are noise and are dropped.
    #[serde(default = "default_min_calcium_voxels")]
    pub min_calcium_voxels: usize,
    /// Lesions smaller than this are left out of the per-lesion report.
    #[serde(default = "default_micro_calcium_threshold")]
    pub micro_calcium_threshold: usize,
    #[serde(default)]
    pub connectivity: Connectivity,
    pub spacing_source: SpacingSource,
}

impl EngineConfig {
    pub fn new(spacing_source: SpacingSource) -> Self {
        Self {
            density_floor: DENSITY_FLOOR,
            min_calcium_voxels: DEFAULT_MIN_CALCIUM_VOXELS,
            micro_calcium_threshold: DEFAULT_MICRO_CALCIUM_THRESHOLD,
            connectivity: Connectivity::default(),
            spacing_source,
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| CalciumError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.density_floor.is_finite() || self.density_floor <= 0.0 {
            return Err(CalciumError::InvalidConfig(format!(
                "density_floor must be positive, got {}",
                self.density_floor
            )));
        }
        if self.min_calcium_voxels == 0 {
            return Err(CalciumError::InvalidConfig(
                "min_calcium_voxels must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Aggregate score and volume of a ROI, with an optional lesion breakdown.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ScoreResult {
    pub aggregate_score: f64,
    pub aggregate_volume_mm3: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lesions: Option<Vec<Lesion>>,
}

/// Physical size of a voxel of the scored stack.
#[derive(Clone, Copy, Debug, PartialEq)]
struct VoxelSize {
    pixel_area: f64,
    z_spacing: f64,
}

/// Calcium scoring over a slice stack.
///
/// Holds no state besides its configuration; one engine can score any
/// number of stacks, from any number of threads.
pub struct Engine {
    config: EngineConfig,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn resolve(&self, stack: &SliceStack, roi: &RoiSpec) -> Result<VoxelCoordinateSet> {
        let voxels = roi.resolve(stack.dim())?;
        debug!("ROI resolved to {} voxels", voxels.len());
        Ok(voxels)
    }

    pub fn mask(&self, stack: &SliceStack, voxels: &VoxelCoordinateSet) -> Result<MaskedVolume> {
        MaskedVolume::build(stack, voxels, self.config.density_floor)
    }

    /// Components of `volume` large enough to count as calcium.
    pub fn segment(&self, volume: &MaskedVolume) -> Vec<Component> {
        lesion::segment(
            volume,
            self.config.connectivity,
            self.config.min_calcium_voxels,
        )
    }

    fn voxel_size(&self, stack: &SliceStack, roi: &RoiSpec) -> Result<VoxelSize> {
        let reference = stack
            .get(roi.slice_index)
            .ok_or(CalciumError::OutOfRangeSlice {
                reference: roi.slice_index,
                len: stack.len(),
            })?;
        Ok(VoxelSize {
            pixel_area: reference.pixel_area()?,
            z_spacing: stack.z_spacing(self.config.spacing_source)?,
        })
    }

    /// Score the ROI as a whole, without lesion segmentation.
    pub fn score(&self, stack: &SliceStack, roi: &RoiSpec) -> Result<ScoreResult> {
        let size = self.voxel_size(stack, roi)?;
        let voxels = self.resolve(stack, roi)?;
        let volume = self.mask(stack, &voxels)?;

        Ok(ScoreResult {
            aggregate_score: score::agatston_score(
                &volume,
                size.pixel_area,
                self.config.density_floor,
            ),
            aggregate_volume_mm3: score::calcium_volume(&volume, size.pixel_area, size.z_spacing),
            lesions: None,
        })
    }

    /// Score the ROI lesion by lesion.
    ///
    /// The aggregate covers every component of at least
    /// `min_calcium_voxels`; the reported lesions are those reaching
    /// `micro_calcium_threshold`.
    pub fn score_lesions(&self, stack: &SliceStack, roi: &RoiSpec) -> Result<ScoreResult> {
        let size = self.voxel_size(stack, roi)?;
        let voxels = self.resolve(stack, roi)?;
        let mut volume = self.mask(stack, &voxels)?;
        let components = self.segment(&volume);

        let retained: HashSet<Voxel> = components
            .iter()
            .flat_map(|component| component.voxels.iter().copied())
            .collect();
        volume.retain(|voxel| retained.contains(voxel));

        let lesions: Vec<Lesion> = components
            .into_iter()
            .filter(|component| component.voxel_count() >= self.config.micro_calcium_threshold)
            .filter_map(|component| self.measure_lesion(&volume, component, size))
            .collect();
        debug!("Reporting {} lesions", lesions.len());

        Ok(ScoreResult {
            aggregate_score: score::agatston_score(
                &volume,
                size.pixel_area,
                self.config.density_floor,
            ),
            aggregate_volume_mm3: score::calcium_volume(&volume, size.pixel_area, size.z_spacing),
            lesions: Some(lesions),
        })
    }

    fn measure_lesion(
        &self,
        volume: &MaskedVolume,
        component: Component,
        size: VoxelSize,
    ) -> Option<Lesion> {
        let isolated = volume.isolate(&component.voxels)?;
        Some(Lesion {
            label: component.label,
            voxel_count: component.voxel_count(),
            peak_density: isolated.peak()?,
            score: score::agatston_score(&isolated, size.pixel_area, self.config.density_floor),
            volume_mm3: score::calcium_volume(&isolated, size.pixel_area, size.z_spacing),
            centroid: component.centroid(),
            bbox: component.bounding_box(),
            voxels: component.voxels,
        })
    }
}
