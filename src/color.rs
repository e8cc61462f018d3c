use std::path::Path;

use image::{DynamicImage, GenericImageView, ImageFormat, Rgba32FImage};
use log::{debug, warn};

use crate::frame::{Frame, SceneFrames};
use crate::packing::encode_alpha;
use crate::params::{Params, Roi, ScatterSource};
use crate::RenderError;

/// Loads and crops every input image named by `params`.
pub fn load_scene(params: &Params) -> Result<SceneFrames, RenderError> {
    let diffuse_image = open_cropped(&params.diffuse_path, params.roi.as_ref())?;
    let depth_image = open_cropped(&params.depth_path, params.roi.as_ref())?;

    let mut diffuse = diffuse_frame(&diffuse_image);
    if params.strength.is_some() || params.quality.is_some() {
        repack_alpha(
            &mut diffuse,
            params.strength.unwrap_or(1.0),
            params.quality.unwrap_or(1.0),
        );
    }
    let depth = depth_frame(&depth_image, params.depth_scale);
    let scatter = match &params.scatter {
        ScatterSource::Image { path, scale } => {
            let image = open_cropped(path, params.roi.as_ref())?;
            scatter_frame(&image, *scale)
        }
        ScatterSource::Uniform(rgb) => Frame::filled(diffuse.width(), diffuse.height(), *rgb),
    };
    debug!(
        "loaded {}x{} diffuse, depth and scatter inputs",
        diffuse.width(),
        diffuse.height()
    );
    SceneFrames::new(diffuse, depth, scatter).map_err(RenderError::Message)
}

pub fn diffuse_frame(image: &DynamicImage) -> Frame<[f32; 4]> {
    let rgba = image.to_rgba32f();
    Frame::from_fn(rgba.width() as usize, rgba.height() as usize, |x, y| {
        rgba.get_pixel(x as u32, y as u32).0
    })
}

pub fn depth_frame(image: &DynamicImage, scale: f32) -> Frame<f32> {
    let luma = image.to_luma32f();
    Frame::from_fn(luma.width() as usize, luma.height() as usize, |x, y| {
        luma.get_pixel(x as u32, y as u32).0[0] * scale
    })
}

pub fn scatter_frame(image: &DynamicImage, scale: f32) -> Frame<[f32; 3]> {
    let rgb = image.to_rgb32f();
    Frame::from_fn(rgb.width() as usize, rgb.height() as usize, |x, y| {
        rgb.get_pixel(x as u32, y as u32).0.map(|v| v * scale)
    })
}

/// Overwrites the packed alpha of every pixel that is not disabled.
pub fn repack_alpha(diffuse: &mut Frame<[f32; 4]>, strength: f32, quality: f32) {
    let alpha = encode_alpha(strength, quality);
    for pixel in diffuse.pixels_mut() {
        if pixel[3] >= 0.0 {
            pixel[3] = alpha;
        }
    }
}

pub fn save_output(frame: &Frame<[f32; 4]>, path: &Path, format: ImageFormat) -> Result<(), RenderError> {
    let (width, height) = frame.dimensions();
    let raw: Vec<f32> = frame.pixels().flat_map(|p| p.iter().copied()).collect();
    let buffer = Rgba32FImage::from_raw(width as u32, height as u32, raw)
        .ok_or_else(|| RenderError::Message("failed to create RGBA image".into()))?;
    let image = DynamicImage::ImageRgba32F(buffer);
    let encoded = match format {
        ImageFormat::OpenExr => image,
        ImageFormat::Png | ImageFormat::Tiff => DynamicImage::ImageRgba16(image.to_rgba16()),
        ImageFormat::Jpeg => {
            warn!("{format:?} has no alpha channel; the scatter flag is dropped");
            DynamicImage::ImageRgb8(image.to_rgb8())
        }
        _ => DynamicImage::ImageRgba8(image.to_rgba8()),
    };
    encoded
        .save_with_format(path, format)
        .map_err(RenderError::from)
}

fn open_cropped(path: &Path, roi: Option<&Roi>) -> Result<DynamicImage, RenderError> {
    let image = image::open(path)?;
    apply_roi(image, roi)
}

fn apply_roi(image: DynamicImage, roi: Option<&Roi>) -> Result<DynamicImage, RenderError> {
    let Some(roi) = roi else {
        return Ok(image);
    };
    let (width, height) = image.dimensions();
    if roi.x1 > width || roi.y1 > height {
        return Err(RenderError::Message("ROI exceeds image bounds".to_owned()));
    }
    let w = roi.x1 - roi.x0;
    let h = roi.y1 - roi.y0;
    if w == 0 || h == 0 {
        return Err(RenderError::Message(
            "ROI width and height must be positive".to_owned(),
        ));
    }
    Ok(image.crop_imm(roi.x0, roi.y0, w, h))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Luma, Rgba};

    #[test]
    fn repack_keeps_disabled_pixels() {
        let mut frame = Frame::from_vec(2, 1, vec![[0.5, 0.5, 0.5, -1.0], [0.5, 0.5, 0.5, 0.2]]).unwrap();
        repack_alpha(&mut frame, 1.0, 1.0);
        assert_eq!(frame.get(0, 0)[3], -1.0);
        assert_eq!(frame.get(1, 0)[3], encode_alpha(1.0, 1.0));
    }

    #[test]
    fn depth_is_scaled() {
        let buffer: ImageBuffer<Luma<u16>, Vec<u16>> = ImageBuffer::from_pixel(2, 2, Luma([u16::MAX]));
        let frame = depth_frame(&DynamicImage::ImageLuma16(buffer), 10.0);
        assert!((frame.get(1, 1) - 10.0).abs() < 1e-4);
    }

    #[test]
    fn roi_crops_and_validates() {
        let buffer: ImageBuffer<Rgba<u8>, Vec<u8>> =
            ImageBuffer::from_fn(8, 4, |x, _| Rgba([x as u8, 0, 0, 255]));
        let image = DynamicImage::ImageRgba8(buffer);
        let roi = Roi { x0: 2, y0: 1, x1: 5, y1: 3 };
        let cropped = apply_roi(image.clone(), Some(&roi)).unwrap();
        assert_eq!(cropped.dimensions(), (3, 2));
        let frame = diffuse_frame(&cropped);
        assert!((frame.get(0, 0)[0] - 2.0 / 255.0).abs() < 1e-6);

        let too_big = Roi { x0: 0, y0: 0, x1: 9, y1: 4 };
        assert!(apply_roi(image, Some(&too_big)).is_err());
    }
}
