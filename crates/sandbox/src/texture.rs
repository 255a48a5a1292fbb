use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::flip_vertical_in_place;
use image::RgbaImage;

use crate::types::Size;

/// Tightly packed RGBA8 pixels, first row at the bottom of the image.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageData {
    pub size: Size,
    pub pixels: Vec<u8>,
}

impl ImageData {
    pub fn new(size: Size, pixels: Vec<u8>) -> Result<Self> {
        let expected = size.width as usize * size.height as usize * 4;
        if pixels.len() != expected {
            return Err(anyhow!(
                "pixel buffer holds {} bytes, expected {expected} for {size}",
                pixels.len()
            ));
        }
        Ok(Self { size, pixels })
    }

    pub fn solid(size: Size, rgba: [u8; 4]) -> Self {
        let count = size.width as usize * size.height as usize;
        Self {
            size,
            pixels: rgba.iter().copied().cycle().take(count * 4).collect(),
        }
    }

    pub fn byte_len(&self) -> usize {
        self.pixels.len()
    }

    fn into_rgba(self) -> Result<RgbaImage> {
        RgbaImage::from_raw(self.size.width, self.size.height, self.pixels)
            .ok_or_else(|| anyhow!("pixel buffer does not match its dimensions"))
    }
}

/// Decodes an image file. With `vflip` the rows are reordered so the first row is the bottom one.
pub fn load_image(path: &Path, vflip: bool) -> Result<ImageData> {
    let image = image::open(path)
        .with_context(|| format!("failed to open texture at {}", path.display()))?;
    let mut rgba = image.to_rgba8();
    if vflip {
        flip_vertical_in_place(&mut rgba);
    }
    let size = Size::new(rgba.width(), rgba.height());
    Ok(ImageData {
        size,
        pixels: rgba.into_raw(),
    })
}

/// Writes pixels read back from a render target (bottom row first) as a PNG.
pub fn save_png(path: &Path, image: ImageData) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let mut rgba = image.into_rgba()?;
    flip_vertical_in_place(&mut rgba);
    rgba.save(path)
        .with_context(|| format!("failed to write {}", path.display()))
}
