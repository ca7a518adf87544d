//! Geometry and pixel-format changes applied after decoding.
//!
//! Order: EXIF orientation, pixel config, resize/crop, rotation, then the
//! request's custom transformations.

use image::imageops::FilterType;
use image::metadata::Orientation;
use image::{DynamicImage, GenericImageView};
use tracing::debug;

use crate::domain::entities::{Bitmap, BitmapConfig, CropGravity, Request};
use crate::domain::errors::LoadError;

const FILTER: FilterType = FilterType::Triangle;

/// Runs [`transform_bitmap`] on the blocking pool.
///
/// # Errors
/// Returns a decode error if a transformation panicked.
pub async fn apply_transformations(
    request: &Request,
    bitmap: Bitmap,
    exif_orientation: Option<u8>,
) -> Result<Bitmap, LoadError> {
    let request = request.clone();
    tokio::task::spawn_blocking(move || transform_bitmap(&request, bitmap, exif_orientation))
        .await
        .map_err(|e| LoadError::decode(format!("Transformation of bitmap failed: {e}")))
}

/// Applies every transform the request asks for.
#[must_use]
pub fn transform_bitmap(request: &Request, bitmap: Bitmap, exif_orientation: Option<u8>) -> Bitmap {
    let orientation = exif_orientation
        .and_then(Orientation::from_exif)
        .filter(|o| *o != Orientation::NoTransforms);

    let mut bitmap = bitmap;
    if request.needs_matrix_transform() || request.config().is_some() || orientation.is_some() {
        let mut image = bitmap.image().clone();
        if let Some(orientation) = orientation {
            image.apply_orientation(orientation);
        }
        if let Some(config) = request.config() {
            image = convert(image, config);
        }
        if request.has_size() {
            image = resize(request, image);
        }
        image = rotate(request.rotation_degrees(), image);
        bitmap = Bitmap::new(image);
    }

    for transformation in request.transformations() {
        bitmap = transformation.transform(bitmap);
    }
    bitmap
}

fn convert(image: DynamicImage, config: BitmapConfig) -> DynamicImage {
    match config {
        BitmapConfig::Luma8 => DynamicImage::ImageLuma8(image.to_luma8()),
        BitmapConfig::Rgb8 => DynamicImage::ImageRgb8(image.to_rgb8()),
        BitmapConfig::Rgba8 => DynamicImage::ImageRgba8(image.to_rgba8()),
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn scaled(value: u32, numerator: u32, denominator: u32) -> u32 {
    ((f64::from(value) * f64::from(numerator) / f64::from(denominator)).round() as u32).max(1)
}

/// Fills in a zero target dimension from the source aspect ratio.
fn target_size(request: &Request, width: u32, height: u32) -> (u32, u32) {
    match (request.target_width(), request.target_height()) {
        (0, h) => (scaled(width, h, height), h),
        (w, 0) => (w, scaled(height, w, width)),
        (w, h) => (w, h),
    }
}

/// Largest source region with the target's aspect ratio, placed by gravity.
/// Returns `(x, y, width, height)`.
fn crop_rect(
    width: u32,
    height: u32,
    target_width: u32,
    target_height: u32,
    gravity: CropGravity,
) -> (u32, u32, u32, u32) {
    let width_ratio = f64::from(target_width) / f64::from(width);
    let height_ratio = f64::from(target_height) / f64::from(height);
    if width_ratio > height_ratio {
        let crop_height = scaled(width, target_height, target_width).min(height);
        let y = match gravity {
            CropGravity::Top => 0,
            CropGravity::Bottom => height - crop_height,
            CropGravity::Center | CropGravity::Start | CropGravity::End => {
                (height - crop_height) / 2
            }
        };
        (0, y, width, crop_height)
    } else {
        let crop_width = scaled(height, target_width, target_height).min(width);
        let x = match gravity {
            CropGravity::Start => 0,
            CropGravity::End => width - crop_width,
            CropGravity::Center | CropGravity::Top | CropGravity::Bottom => {
                (width - crop_width) / 2
            }
        };
        (x, 0, crop_width, height)
    }
}

fn resize(request: &Request, image: DynamicImage) -> DynamicImage {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return image;
    }
    let (target_width, target_height) = target_size(request, width, height);
    let only_scale_down = request.only_scale_down();

    if request.center_crop() {
        let (x, y, crop_width, crop_height) = crop_rect(
            width,
            height,
            target_width,
            target_height,
            request.center_crop_gravity(),
        );
        let cropped = image.crop_imm(x, y, crop_width, crop_height);
        if only_scale_down && crop_width <= target_width && crop_height <= target_height {
            return cropped;
        }
        return cropped.resize_exact(target_width, target_height, FILTER);
    }

    if only_scale_down && width <= target_width && height <= target_height {
        return image;
    }
    if request.center_inside() {
        image.resize(target_width, target_height, FILTER)
    } else {
        image.resize_exact(target_width, target_height, FILTER)
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn rotate(degrees: f32, image: DynamicImage) -> DynamicImage {
    if degrees == 0.0 {
        return image;
    }
    let turns = degrees.rem_euclid(360.0) / 90.0;
    if (turns - turns.round()).abs() > f32::EPSILON {
        debug!(degrees, "Rotation by a non-right angle is not rendered");
        return image;
    }
    match turns.round() as u32 % 4 {
        1 => image.rotate90(),
        2 => image.rotate180(),
        3 => image.rotate270(),
        _ => image,
    }
}
