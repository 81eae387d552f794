use std::io::{prelude::*, BufWriter};
use std::fs::File;
use std::path::Path;
use anyhow::Result;

use crate::parser::DecodedImage;

const MAGIC_NUMBER: &[u8] = b"P6";

pub fn write_ppm<W: Write>(writer: &mut W, image: &DecodedImage) -> Result<()> {
    writer.write_all(MAGIC_NUMBER)?;
    writer.write_all(b"\n")?;
    writer.write_all(format!("{} {}\n", image.width, image.height).as_bytes())?;
    writer.write_all(format!("{}\n", image.max_color_value).as_bytes())?;

    // pixel region is raw bytes, written as-is
    writer.write_all(image.pixels())?;

    Ok(())
}

pub fn write_ppm_file(path: &Path, image: &DecodedImage) -> Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);

    write_ppm(&mut writer, image)?;
    writer.flush()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::parser::Decoder;

    use std::io::Cursor;

    fn decode(data: Vec<u8>) -> DecodedImage {
        Decoder::new(Cursor::new(data)).decode().unwrap()
    }

    #[test]
    fn writes_canonical_p6_layout() {
        // comments in the source header are not carried over
        let mut data = b"P6\n# a comment\n2 1\n255\n".to_vec();
        data.extend_from_slice(&[0xff, 0x00, 0x00, 0x00, 0xff, 0x00]);
        let image = decode(data);

        let mut encoded = Vec::new();
        write_ppm(&mut encoded, &image).unwrap();

        assert_eq!(encoded, b"P6\n2 1\n255\n\xff\x00\x00\x00\xff\x00".to_vec());
    }

    #[test]
    fn round_trips_through_decoder() {
        let pixels: Vec<u8> = (0..3 * 4 * 3).map(|i| i as u8).collect();
        let mut data = b"P6\n3 4\n255\n".to_vec();
        data.extend_from_slice(&pixels);
        let image = decode(data);

        let mut encoded = Vec::new();
        write_ppm(&mut encoded, &image).unwrap();

        let decoded = Decoder::new(Cursor::new(encoded)).decode().unwrap();

        assert_eq!(decoded.width, 3);
        assert_eq!(decoded.height, 4);
        assert_eq!(decoded.max_color_value, 255);
        assert_eq!(decoded.pixels(), &pixels[..]);
    }

    #[test]
    fn preserves_unusual_max_color_value() {
        let mut data = b"P6\n1 1\n100\n".to_vec();
        data.extend_from_slice(&[10, 20, 30]);
        let image = decode(data);

        let mut encoded = Vec::new();
        write_ppm(&mut encoded, &image).unwrap();

        assert_eq!(encoded, b"P6\n1 1\n100\n\x0a\x14\x1e".to_vec());
    }
}
