//! PNG / JPEG encoding of 8-bit display products.
use std::path::Path;

use image::ImageEncoder;
use image::codecs::png::PngEncoder;
use jpeg_encoder::{ColorType, Encoder};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::ImageFormat;

const JPEG_QUALITY: u8 = 95;

/// 256-entry lookup table from 8-bit value to RGB.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Colormap {
    entries: Vec<[u8; 3]>,
}

impl Colormap {
    pub fn grayscale() -> Self {
        Self {
            entries: (0..=255u8).map(|v| [v, v, v]).collect(),
        }
    }

    /// Build from up to 256 entries; missing entries repeat the last one.
    pub fn from_entries(mut entries: Vec<[u8; 3]>) -> Result<Self> {
        let last = *entries.last().ok_or(Error::InvalidArgument {
            arg: "colormap",
            value: "empty table".into(),
        })?;
        if entries.len() > 256 {
            return Err(Error::InvalidArgument {
                arg: "colormap",
                value: format!("{} entries", entries.len()),
            });
        }
        entries.resize(256, last);
        Ok(Self { entries })
    }

    /// Load a JSON array of `[r, g, b]` triples.
    pub fn from_json(text: &str) -> Result<Self> {
        let entries: Vec<[u8; 3]> = serde_json::from_str(text)?;
        Self::from_entries(entries)
    }

    #[inline]
    pub fn lookup(&self, v: u8) -> [u8; 3] {
        self.entries[v as usize]
    }
}

impl Default for Colormap {
    fn default() -> Self {
        Self::grayscale()
    }
}

/// An encoded display image.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedImage {
    pub format: ImageFormat,
    pub width: usize,
    pub height: usize,
    pub bytes: Vec<u8>,
}

impl RenderedImage {
    pub fn content_type(&self) -> &'static str {
        self.format.content_type()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, &self.bytes)?;
        Ok(())
    }
}

/// Interleave 8-bit bands into RGB pixels. One band goes through `colormap`,
/// three bands are taken as red, green, blue.
pub fn to_rgb(bands: &[Array2<u8>], colormap: &Colormap) -> Result<Vec<u8>> {
    let first = bands.first().ok_or(Error::NoValidData)?;
    if bands.iter().any(|b| b.dim() != first.dim()) {
        return Err(Error::ShapeMismatch {
            expected: first.dim(),
            got: bands.iter().map(|b| b.dim()).find(|d| *d != first.dim()).unwrap_or_default(),
        });
    }
    let mut rgb = Vec::with_capacity(first.len() * 3);
    match bands.len() {
        1 => first.iter().for_each(|&v| rgb.extend_from_slice(&colormap.lookup(v))),
        3 => {
            for ((&r, &g), &b) in bands[0].iter().zip(bands[1].iter()).zip(bands[2].iter()) {
                rgb.extend_from_slice(&[r, g, b]);
            }
        }
        n => return Err(Error::Unsupported(format!("{n}-band display image"))),
    }
    Ok(rgb)
}

/// Encode bands as PNG (mask becomes the alpha channel) or JPEG.
pub fn encode(
    bands: &[Array2<u8>],
    mask: &Array2<bool>,
    colormap: &Colormap,
    format: ImageFormat,
) -> Result<RenderedImage> {
    let rgb = to_rgb(bands, colormap)?;
    let (height, width) = mask.dim();
    if rgb.len() != width * height * 3 {
        return Err(Error::ShapeMismatch {
            expected: (height, width),
            got: bands[0].dim(),
        });
    }
    let mut bytes = Vec::new();
    match format {
        ImageFormat::Png => {
            let mut rgba = Vec::with_capacity(width * height * 4);
            for (px, &valid) in rgb.chunks_exact(3).zip(mask.iter()) {
                rgba.extend_from_slice(px);
                rgba.push(if valid { 255 } else { 0 });
            }
            PngEncoder::new(&mut bytes)
                .write_image(&rgba, width as u32, height as u32, image::ExtendedColorType::Rgba8)
                .map_err(Error::image)?;
        }
        ImageFormat::Jpeg => {
            if width > u16::MAX as usize || height > u16::MAX as usize {
                return Err(Error::Unsupported(format!("{width}x{height} JPEG")));
            }
            let encoder = Encoder::new(&mut bytes, JPEG_QUALITY);
            encoder
                .encode(&rgb, width as u16, height as u16, ColorType::Rgb)
                .map_err(Error::image)?;
        }
    }
    Ok(RenderedImage {
        format,
        width,
        height,
        bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn single_band_goes_through_colormap() {
        let cmap = Colormap::from_entries(vec![[0, 0, 0], [10, 20, 30]]).unwrap();
        let rgb = to_rgb(&[array![[1u8, 0], [255, 1]]], &cmap).unwrap();
        assert_eq!(rgb, vec![10, 20, 30, 0, 0, 0, 10, 20, 30, 10, 20, 30]);
    }

    #[test]
    fn three_bands_interleave() {
        let rgb = to_rgb(
            &[array![[1u8, 2]], array![[3u8, 4]], array![[5u8, 6]]],
            &Colormap::grayscale(),
        )
        .unwrap();
        assert_eq!(rgb, vec![1, 3, 5, 2, 4, 6]);
    }

    #[test]
    fn two_bands_are_not_an_image() {
        let bands = [array![[1u8]], array![[2u8]]];
        assert!(to_rgb(&bands, &Colormap::grayscale()).is_err());
    }

    #[test]
    fn png_and_jpeg_signatures() {
        let bands = [Array2::from_elem((8, 8), 128u8)];
        let mask = Array2::from_elem((8, 8), true);
        let png = encode(&bands, &mask, &Colormap::grayscale(), ImageFormat::Png).unwrap();
        assert_eq!(&png.bytes[..4], &[0x89, b'P', b'N', b'G']);
        assert_eq!(png.content_type(), "image/png");
        let jpeg = encode(&bands, &mask, &Colormap::grayscale(), ImageFormat::Jpeg).unwrap();
        assert_eq!(&jpeg.bytes[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn colormap_from_json() {
        let cmap = Colormap::from_json("[[1,2,3],[4,5,6]]").unwrap();
        assert_eq!(cmap.lookup(0), [1, 2, 3]);
        assert_eq!(cmap.lookup(200), [4, 5, 6]);
        assert!(Colormap::from_json("[]").is_err());
    }
}
