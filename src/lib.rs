//! # DICOM-calcium library
//!
//! This crate computes an Agatston-style calcium score and a calcified
//! volume for a region of interest in a stack of CT slices

//!
//! A scoring run takes an ordered [`SliceStack`] of raw slices and a
//! [`RoiSpec`] (a circle or polygon drawn on a reference slice, extended
//! over a range of slices) and goes through the following stages:
//!  - Resolving the ROI into explicit voxel coordinates
//!  - Calibrating the touched slices (`slope * raw + intercept`) in parallel
//!    using rayon and masking them to the ROI and the density floor
//!  - Optionally labelling 26-connected (or per-slice 8-connected) lesions
//!  - Scoring each slice by calcified area times a peak-density weight and
//!    integrating the calcified volume
//!
//!  Stacks can either be built from in-memory arrays or loaded from a
//!  directory of ".dcm" files. DICOM files are assumed to have the
//!  following attributes:
//!   - RescaleSlope and RescaleIntercept on every slice that is scored
//!   - PixelSpacing on the reference slice of the ROI
//!   - InstanceNumber, unique within the series
//!   - SpacingBetweenSlices or SliceThickness, whichever the
//!     [`EngineConfig`] asks for
//!
//! # Examples
//!
//! ## Scoring a circular ROI
//!
//! Load all DICOM files from the dicom/ directory, then score a circle of
//! radius 12 pixels drawn on slice 40 and extended 3 slices up and down.
//!
//! ```no_run
//! # use dicom_calcium::{Engine, EngineConfig, Point, RoiShape, RoiSpec, SpacingSource, StackLoader};
//! let stack = StackLoader::load_from_directory("dicom")
//!     .expect("should have loaded files from directory");
//! let engine = Engine::new(EngineConfig::new(SpacingSource::SliceSpacing))
//!     .expect("default configuration should be valid");
//! let roi = RoiSpec::new(
//!     RoiShape::Circular {
//!         center: Point::new(256.0, 230.0),
//!         radius: 12.0,
//!     },
//!     40,
//!     3,
//! );
//! let result = engine
//!     .score_lesions(&stack, &roi)
//!     .expect("should have scored the ROI");
//! println!("{} ({} mm³)", result.aggregate_score, result.aggregate_volume_mm3);
//! ```

pub mod engine;
pub mod enums;
pub mod error;
pub mod lesion;
pub mod mask;
pub mod roi;
pub mod score;
pub mod slice;
pub mod stack_loader;

pub use engine::{Engine, EngineConfig, ScoreResult};
pub use enums::{Connectivity, SpacingSource};
pub use error::CalciumError;
pub use lesion::Lesion;
pub use mask::MaskedVolume;
pub use roi::{BoundingBox, Point, RoiShape, RoiSpec, Voxel, VoxelCoordinateSet};
pub use slice::{Rescale, Slice, SliceStack};
pub use stack_loader::{StackLoader, StackLoaderError};
