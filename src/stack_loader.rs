use crate::error::CalciumError;
use crate::slice::{Rescale, Slice, SliceStack};

use dicom::{
    object::{FileDicomObject, InMemDicomObject, open_file},
    pixeldata::{ConvertOptions, ModalityLutOption, PixelDecoder},
};
use dicom_dictionary_std::tags;
use log::{debug, warn};
use ndarray::{Array2, s};
use std::{fs, path::Path};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StackLoaderError {
    #[error("No valid DICOM images found")]
    NoValidImages,

    #[error("Invalid slice stack: {0}")]
    Stack(#[from] CalciumError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("DICOM error: {0}")]
    Dicom(#[from] dicom::object::ReadError),
}

/// A decoded slice plus the position used to derive the slice spacing.
struct LoadedSlice {
    slice: Slice,
    z_position: Option<f64>,
}

pub struct StackLoader;

impl StackLoader {
    /// Load a slice stack from DICOM objects
    ///
    /// Slices are ordered by InstanceNumber. Objects without an
    /// InstanceNumber or without decodable pixel data are skipped.
    ///
    /// # Errors
    ///
    /// Returns error if no valid images are found, dimensions are
    /// inconsistent or two slices share an InstanceNumber
    pub fn load_from_dicom_objects(
        dicom_objects: &[FileDicomObject<InMemDicomObject>],
    ) -> Result<SliceStack, StackLoaderError> {
        let mut loaded: Vec<_> = dicom_objects
            .iter()
            .filter_map(Self::extract_slice)
            .collect();

        if loaded.is_empty() {
            return Err(StackLoaderError::NoValidImages);
        }
        if loaded.len() < dicom_objects.len() {
            warn!(
                "Skipped {} of {} DICOM objects without usable image data",
                dicom_objects.len() - loaded.len(),
                dicom_objects.len()
            );
        }

        loaded.sort_by_key(|item| item.slice.instance_number());
        let slice_spacing = Self::get_slice_spacing(dicom_objects, &loaded);
        let slice_thickness = Self::get_slice_thickness(dicom_objects);

        let mut stack = SliceStack::new(loaded.into_iter().map(|item| item.slice).collect())?;
        if let Some(spacing) = slice_spacing {
            stack = stack.with_slice_spacing(spacing);
        }
        if let Some(thickness) = slice_thickness {
            stack = stack.with_slice_thickness(thickness);
        }
        debug!(
            "Loaded {:?} stack, slice spacing {:?}, slice thickness {:?}",
            stack.dim(),
            slice_spacing,
            slice_thickness
        );
        Ok(stack)
    }

    /// Load a slice stack from file paths
    pub fn load_from_file_paths(paths: &[impl AsRef<Path>]) -> Result<SliceStack, StackLoaderError> {
        let objects: Result<Vec<_>, _> =
            paths.iter().map(|path| open_file(path.as_ref())).collect();

        Self::load_from_dicom_objects(&objects?)
    }

    /// Load a slice stack from a directory containing .dcm files
    pub fn load_from_directory(path: impl AsRef<Path>) -> Result<SliceStack, StackLoaderError> {
        let paths: Vec<_> = fs::read_dir(path.as_ref())?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.extension()
                    .and_then(|s| s.to_str())
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("dcm"))
            })
            .collect();

        if paths.is_empty() {
            return Err(StackLoaderError::NoValidImages);
        }

        Self::load_from_file_paths(&paths)
    }

    fn extract_slice(dicom_object: &FileDicomObject<InMemDicomObject>) -> Option<LoadedSlice> {
        let instance_number = dicom_object
            .element(tags::INSTANCE_NUMBER)
            .ok()?
            .to_int::<i32>()
            .ok()?;
        let pixels = Self::decode_image(dicom_object)?;

        let mut slice = Slice::new(pixels, instance_number);
        if let Some(rescale) = Self::get_rescale(dicom_object) {
            slice = slice.with_rescale(rescale);
        }
        if let Some(spacing) = Self::get_pixel_spacing(dicom_object) {
            slice = slice.with_pixel_spacing(spacing);
        }

        Some(LoadedSlice {
            slice,
            z_position: Self::get_z_position(dicom_object),
        })
    }

    /// Raw stored values, the modality rescale is applied later per slice.
    fn decode_image(dicom_object: &FileDicomObject<InMemDicomObject>) -> Option<Array2<f32>> {
        let pixel_data = dicom_object.decode_pixel_data().ok()?;
        let options = ConvertOptions::new().with_modality_lut(ModalityLutOption::None);
        pixel_data
            .to_ndarray_with_options::<f32>(&options)
            .ok()
            .map(|arr| arr.slice_move(s![0, .., .., 0]))
    }

    fn get_float(dicom_object: &FileDicomObject<InMemDicomObject>, tag: dicom::core::Tag) -> Option<f64> {
        dicom_object.element(tag).ok()?.to_float64().ok()
    }

    fn get_rescale(dicom_object: &FileDicomObject<InMemDicomObject>) -> Option<Rescale> {
        let slope = Self::get_float(dicom_object, tags::RESCALE_SLOPE)?;
        let intercept = Self::get_float(dicom_object, tags::RESCALE_INTERCEPT)?;
        Some(Rescale::new(slope, intercept))
    }

    fn get_pixel_spacing(dicom_object: &FileDicomObject<InMemDicomObject>) -> Option<(f64, f64)> {
        let spacing = dicom_object
            .element(tags::PIXEL_SPACING)
            .ok()?
            .to_multi_float64()
            .ok()?;
        match spacing.as_slice() {
            [row, col, ..] => Some((*row, *col)),
            _ => None,
        }
    }

    fn get_z_position(dicom_object: &FileDicomObject<InMemDicomObject>) -> Option<f64> {
        let pos = dicom_object
            .element(tags::IMAGE_POSITION_PATIENT)
            .ok()?
            .to_multi_float64()
            .ok()?;
        pos.get(2).copied()
    }

    /// SpacingBetweenSlices, else the z distance of the first two slices.
    fn get_slice_spacing(
        dicom_objects: &[FileDicomObject<InMemDicomObject>],
        sorted: &[LoadedSlice],
    ) -> Option<f64> {
        dicom_objects
            .iter()
            .find_map(|dicom_object| Self::get_float(dicom_object, tags::SPACING_BETWEEN_SLICES))
            .or_else(|| match sorted {
                [first, second, ..] => Some((second.z_position? - first.z_position?).abs()),
                _ => None,
            })
            .map(f64::abs)
            .filter(|spacing| *spacing > 0.0)
    }

    fn get_slice_thickness(dicom_objects: &[FileDicomObject<InMemDicomObject>]) -> Option<f64> {
        dicom_objects
            .iter()
            .find_map(|dicom_object| Self::get_float(dicom_object, tags::SLICE_THICKNESS))
            .map(f64::abs)
            .filter(|thickness| *thickness > 0.0)
    }
}
