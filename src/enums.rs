use serde::{Deserialize, Serialize};

/// Neighbourhood used when grouping calcified voxels into lesions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
#[serde(rename_all = "kebab-case")]
pub enum Connectivity {
    /// 26-connectivity across slices: face, edge and corner neighbours.
    #[default]
    Volumetric,
    /// 8-connectivity, labelled independently on each slice.
    PerSlice,
}

/// Which stack attribute provides the z extent of a voxel.
///
/// Has no default: thickness and spacing diverge when a scanner
/// reconstructs overlapping slices.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
#[serde(rename_all = "kebab-case")]
pub enum SpacingSource {
    /// Distance between consecutive slice centres.
    SliceSpacing,
    /// Imaged slab thickness of a single slice.
    SliceThickness,
}
