mod decoder;

pub use decoder::{Decoder, ParserError};

/// A fully decoded P6 image: row-major, interleaved RGB, one byte per
/// channel. The decoder guarantees `pixels` is exactly
/// `width * height * 3` bytes long.
#[derive(Debug)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub max_color_value: u16,
    pixels: Box<[u8]>,
}

impl DecodedImage {
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }
}
