// Image loading module
// Turns an ImageSource into decoded RGBA pixels plus downscaled reductions.

use std::fs;
use std::io::Cursor;
use std::path::PathBuf;

use image::{imageops::FilterType, DynamicImage, RgbaImage};
use log::debug;
use thiserror::Error;

use crate::cli::ImageSource;
use crate::session;

/// Placeholder image shown when no path or pipe is given.
const DEFAULT_IMAGE: &str = "null.png";
const DEFAULT_IMAGE_DIR: &str = "data";

/// Smallest side length for which further reductions are still generated.
const REDUCTION_FLOOR: u32 = 512;
/// Upper bound on the reduction chain length.
const MAX_REDUCTIONS: usize = 6;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("could not locate the executable directory for the default image")]
    NoDefaultImage,
    #[error("unrecognized image data: {0}")]
    UnknownFormat(#[source] image::ImageError),
    #[error("failed to decode image: {0}")]
    Decode(#[source] image::ImageError),
    #[error("switching images at runtime is not implemented")]
    SwitchUnimplemented,
}

/// Loaded image data ready for display
#[derive(Debug, Clone)]
pub struct ImageData {
    /// Image width in pixels
    pub width: u32,
    /// Image height in pixels
    pub height: u32,
    /// RGBA pixel data, 4 bytes per pixel
    pub rgba: Vec<u8>,
    /// Progressively halved copies for cheap downscaled sampling
    pub reductions: Vec<Reduction>,
}

/// One downscaled copy of the image.
#[derive(Debug, Clone)]
pub struct Reduction {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

/// Resolve an image source to decoded pixels.
pub fn load(source: &ImageSource) -> Result<ImageData, LoadError> {
    let decoded = match source {
        ImageSource::File(path) => decode(&read_file(path.clone())?)?,
        ImageSource::Piped(bytes) => decode(bytes)?,
        ImageSource::BundledDefault => {
            let path = bundled_default_path().ok_or(LoadError::NoDefaultImage)?;
            decode(&read_file(path)?)?
        }
        ImageSource::NextInDirectory => return Err(LoadError::SwitchUnimplemented),
    };

    let rgba = decoded.to_rgba8();
    let (width, height) = rgba.dimensions();
    let reductions = build_reductions(&rgba);
    debug!(
        "decoded {}x{} with {} reductions",
        width,
        height,
        reductions.len()
    );

    Ok(ImageData {
        width,
        height,
        rgba: rgba.into_raw(),
        reductions,
    })
}

/// Where the bundled placeholder lives: `data/` next to the executable.
pub fn bundled_default_path() -> Option<PathBuf> {
    session::install_dir().map(|dir| dir.join(DEFAULT_IMAGE_DIR).join(DEFAULT_IMAGE))
}

fn read_file(path: PathBuf) -> Result<Vec<u8>, LoadError> {
    fs::read(&path).map_err(|source| LoadError::Read { path, source })
}

/// Decode raw bytes, auto-detecting the format.
fn decode(data: &[u8]) -> Result<DynamicImage, LoadError> {
    let format = image::guess_format(data).map_err(LoadError::UnknownFormat)?;
    image::load(Cursor::new(data), format).map_err(LoadError::Decode)
}

/// Halve the image repeatedly so minified draws can sample something close
/// to their output size instead of the full-resolution pixels.
fn build_reductions(full: &RgbaImage) -> Vec<Reduction> {
    let mut reductions = Vec::new();
    let mut current = full.clone();

    while reductions.len() < MAX_REDUCTIONS {
        let (w, h) = current.dimensions();
        if w / 2 < REDUCTION_FLOOR || h / 2 < REDUCTION_FLOOR {
            break;
        }
        current = image::imageops::resize(&current, w / 2, h / 2, FilterType::Triangle);
        let (rw, rh) = current.dimensions();
        reductions.push(Reduction {
            width: rw,
            height: rh,
            rgba: current.as_raw().clone(),
        });
    }

    reductions
}

/// Pick the smallest stored copy that still covers `target_w` pixels across.
pub fn best_level(image: &ImageData, target_w: f32) -> (u32, u32, &[u8]) {
    let mut choice = (image.width, image.height, image.rgba.as_slice());
    for level in &image.reductions {
        if (level.width as f32) < target_w {
            break;
        }
        choice = (level.width, level.height, level.rgba.as_slice());
    }
    choice
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgba};

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = RgbaImage::from_pixel(width, height, Rgba([40, 80, 120, 255]));
        let mut bytes = Vec::new();
        DynamicImage::ImageRgba8(img)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn test_piped_bytes_decode() {
        let loaded = load(&ImageSource::Piped(png_bytes(64, 48))).unwrap();
        assert_eq!((loaded.width, loaded.height), (64, 48));
        assert_eq!(loaded.rgba.len(), 64 * 48 * 4);
        assert!(loaded.reductions.is_empty());
    }

    #[test]
    fn test_garbage_bytes_are_rejected() {
        let err = load(&ImageSource::Piped(vec![0u8; 128])).unwrap_err();
        assert!(matches!(err, LoadError::UnknownFormat(_)));
    }

    #[test]
    fn test_missing_file_reports_path() {
        let err = load(&ImageSource::File(PathBuf::from("/no/such/image.png"))).unwrap_err();
        let msg = err.to_string();
        assert!(matches!(err, LoadError::Read { .. }));
        assert!(msg.contains("/no/such/image.png"));
    }

    #[test]
    fn test_switching_is_unimplemented() {
        let err = load(&ImageSource::NextInDirectory).unwrap_err();
        assert!(matches!(err, LoadError::SwitchUnimplemented));
    }

    #[test]
    fn test_reduction_chain_halves_until_floor() {
        let loaded = load(&ImageSource::Piped(png_bytes(2048, 2048))).unwrap();
        let sizes: Vec<(u32, u32)> = loaded
            .reductions
            .iter()
            .map(|r| (r.width, r.height))
            .collect();
        assert_eq!(sizes, vec![(1024, 1024), (512, 512)]);
    }

    #[test]
    fn test_best_level_picks_smallest_covering_copy() {
        let loaded = load(&ImageSource::Piped(png_bytes(2048, 2048))).unwrap();

        let (w, _, _) = best_level(&loaded, 2000.0);
        assert_eq!(w, 2048);

        let (w, _, _) = best_level(&loaded, 900.0);
        assert_eq!(w, 1024);

        let (w, _, _) = best_level(&loaded, 100.0);
        assert_eq!(w, 512);
    }
}
