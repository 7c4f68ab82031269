// Shared fixtures for unit tests

use crate::models::frame::Frame;
use image::{DynamicImage, GrayImage, ImageFormat, Luma};
use std::io::Cursor;

/// PNG-encoded grayscale frame of uniform intensity
pub fn uniform_frame(width: u32, height: u32, value: u8) -> Frame {
    let img = GrayImage::from_pixel(width, height, Luma([value]));
    let mut bytes = Vec::new();
    DynamicImage::ImageLuma8(img)
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .expect("encode test frame");
    Frame::new(bytes)
}

/// Bytes that no image decoder accepts
pub fn garbage_frame() -> Frame {
    Frame::new(vec![0xde, 0xad, 0xbe, 0xef])
}
