//! JPEG stills of the live frame, as sent to the oracle and the coach.

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::{imageops, RgbImage};

use crate::hand::Frame;

const DATA_URL_PREFIX: &str = "data:image/jpeg;base64,";

#[derive(Clone)]
pub struct Snapshot {
    pub width: u32,
    pub height: u32,
    pub jpeg: Vec<u8>,
}

impl Snapshot {
    /// Encode `frame` as JPEG, flipped horizontally when `mirror` is set so the
    /// still matches what the user sees on screen
    pub fn capture(frame: &Frame, mirror: bool, quality: u8) -> Result<Self> {
        let mut img = RgbImage::from_raw(frame.width, frame.height, frame.rgb.clone())
            .context("frame buffer does not match its dimensions")?;
        if mirror {
            imageops::flip_horizontal_in_place(&mut img);
        }

        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(&mut jpeg, quality.clamp(1, 100))
            .encode_image(&img)
            .context("failed to encode snapshot")?;

        Ok(Self {
            width: frame.width,
            height: frame.height,
            jpeg,
        })
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.jpeg)
    }

    pub fn to_data_url(&self) -> String {
        format!("{}{}", DATA_URL_PREFIX, self.to_base64())
    }
}

impl std::fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Snapshot")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("jpeg_bytes", &self.jpeg.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Left half red, right half blue
    fn split_frame(w: u32, h: u32) -> Frame {
        let mut rgb = Vec::with_capacity((w * h * 3) as usize);
        for _ in 0..h {
            for x in 0..w {
                if x < w / 2 {
                    rgb.extend_from_slice(&[255, 0, 0]);
                } else {
                    rgb.extend_from_slice(&[0, 0, 255]);
                }
            }
        }
        Frame::new(w, h, rgb).unwrap()
    }

    fn decode(snapshot: &Snapshot) -> RgbImage {
        image::load_from_memory(&snapshot.jpeg).unwrap().to_rgb8()
    }

    #[test]
    fn test_unmirrored_keeps_orientation() {
        let snap = Snapshot::capture(&split_frame(64, 32), false, 90).unwrap();
        let img = decode(&snap);
        assert_eq!(img.dimensions(), (64, 32));
        let left = img.get_pixel(4, 16);
        assert!(left[0] > 200 && left[2] < 60, "left should stay red: {:?}", left);
    }

    #[test]
    fn test_mirror_flips_horizontally() {
        let snap = Snapshot::capture(&split_frame(64, 32), true, 90).unwrap();
        let img = decode(&snap);
        let left = img.get_pixel(4, 16);
        let right = img.get_pixel(60, 16);
        assert!(left[2] > 200 && left[0] < 60, "left should be blue: {:?}", left);
        assert!(right[0] > 200 && right[2] < 60, "right should be red: {:?}", right);
    }

    #[test]
    fn test_data_url() {
        let snap = Snapshot::capture(&Frame::filled(8, 8, [10, 20, 30]), true, 85).unwrap();
        let url = snap.to_data_url();
        assert!(url.starts_with(DATA_URL_PREFIX));
        let decoded = STANDARD.decode(&url[DATA_URL_PREFIX.len()..]).unwrap();
        assert_eq!(decoded, snap.jpeg);
        // JPEG SOI marker
        assert_eq!(&snap.jpeg[..2], &[0xFF, 0xD8]);
    }
}
