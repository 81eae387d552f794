use super::DecodedImage;

use thiserror::Error;
use log::{debug, warn};

use std::io;
use std::io::prelude::*;

/// Widest image accepted on either axis. A header can declare arbitrary
/// dimensions and the pixel buffer is allocated up front, so cap it.
const MAX_DIMENSION: u32 = 1 << 15;

#[derive(Error, Debug)]
pub enum ParserError {
    #[error("invalid ppm header: {0}")]
    InvalidFormat(String),

    #[error("image dimensions {0}x{1} are invalid")]
    InvalidDimensions(u32, u32),

    #[error("pixel data is truncated, expected {expected} bytes but only {actual} were available")]
    TruncatedData { expected: usize, actual: usize },

    #[error("image dimensions {width}x{height} exceed the supported maximum")]
    DimensionsTooLarge { width: u32, height: u32 },

    #[error("failed to read from the image stream")]
    Io(#[from] io::Error),
}

#[derive(Debug)]
enum ParserState {
    ProcessMagic,
    ProcessDimensions,
    ProcessMaxColorValue,
    ProcessPixelData,

    Done,
}

#[derive(Debug)]
pub struct Decoder<T: Read> {
    inner: T,
    width: u32,
    height: u32,
    max_color_value: u16,
    pixels: Option<Box<[u8]>>,
}

impl<T: Read> Decoder<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            width: 0,
            height: 0,
            max_color_value: 0,
            pixels: None,
        }
    }

    /// Run the parse to completion and hand the decoded image to the caller.
    ///
    /// Every failure is recoverable at the call site; a rejected stream
    /// leaves nothing to clean up.
    pub fn decode(mut self) -> Result<DecodedImage, ParserError> {
        let mut state = ParserState::ProcessMagic;

        loop {
            debug!("begin parsing state {:?}", state);

            state = self.process_next_state(state)?;
            if let ParserState::Done = state {
                break;
            }
        }

        let pixels = self
            .pixels
            .take()
            .expect("pixel data should be present once parsing is done");

        Ok(DecodedImage {
            width: self.width,
            height: self.height,
            max_color_value: self.max_color_value,
            pixels,
        })
    }

    fn process_next_state(&mut self, next_state: ParserState) -> Result<ParserState, ParserError> {
        use ParserState::*;

        match next_state {
            ProcessMagic => {
                let line = self.read_header_line()?;
                if line != "P6" {
                    return Err(ParserError::InvalidFormat(format!(
                        "expected magic number \"P6\", got \"{line}\""
                    )));
                }
                debug!("processed magic number, got P6");

                Ok(ProcessDimensions)
            }
            ProcessDimensions => {
                // comment and blank lines are only valid here, before any
                // binary data begins
                let line = loop {
                    let line = self.read_header_line()?;
                    if line.is_empty() || line.starts_with('#') {
                        continue;
                    }
                    break line;
                };

                let mut fields = line.split_whitespace();
                let width = parse_dimension_field(fields.next(), "width")?;
                let height = parse_dimension_field(fields.next(), "height")?;
                // anything after the first two fields is ignored

                if width == 0 || height == 0 {
                    return Err(ParserError::InvalidDimensions(width, height));
                }

                if width > MAX_DIMENSION || height > MAX_DIMENSION {
                    return Err(ParserError::DimensionsTooLarge { width, height });
                }

                self.width = width;
                self.height = height;
                debug!("processed dimensions, got {}x{}", width, height);

                Ok(ProcessMaxColorValue)
            }
            ProcessMaxColorValue => {
                let line = self.read_header_line()?;
                let max_color_value = line.parse::<u16>().map_err(|_| {
                    ParserError::InvalidFormat(format!(
                        "max color value \"{line}\" is not an unsigned integer"
                    ))
                })?;

                if max_color_value > 255 {
                    warn!("max color value {max_color_value} exceeds the 8-bit range, pixel values are left unscaled");
                }

                self.max_color_value = max_color_value;
                debug!("processed max color value, got {}", max_color_value);

                Ok(ProcessPixelData)
            }
            ProcessPixelData => {
                // the stream is now positioned exactly at the first pixel
                // byte; this region is binary and must not be scanned for
                // newlines or comments
                let expected = u64::from(self.width) * u64::from(self.height) * 3;
                let expected = usize::try_from(expected).map_err(|_| {
                    ParserError::DimensionsTooLarge {
                        width: self.width,
                        height: self.height,
                    }
                })?;

                let mut pixels = vec![0; expected];
                let actual = self.fill_pixel_buffer(&mut pixels)?;
                if actual != expected {
                    return Err(ParserError::TruncatedData { expected, actual });
                }

                self.pixels = Some(pixels.into_boxed_slice());
                debug!("processed pixel data, got {} bytes", expected);

                Ok(Done)
            }
            Done => Ok(Done),
        }
    }

    /// Read one header line byte by byte, so the stream is left positioned
    /// exactly after the terminating newline, and return it trimmed.
    fn read_header_line(&mut self) -> Result<String, ParserError> {
        let mut line = Vec::new();

        loop {
            match self.read_byte()? {
                Some(b'\n') => break,
                Some(byte) => line.push(byte),
                None if line.is_empty() => {
                    return Err(ParserError::InvalidFormat(
                        "unexpected end of file in header".into(),
                    ));
                }
                None => break,
            }
        }

        let line = String::from_utf8(line)
            .map_err(|_| ParserError::InvalidFormat("header is not valid utf-8".into()))?;

        Ok(line.trim().to_owned())
    }

    fn read_byte(&mut self) -> Result<Option<u8>, ParserError> {
        let mut buffer: [u8; 1] = [0; 1];

        loop {
            match self.inner.read(&mut buffer) {
                Ok(0) => return Ok(None),
                Ok(_) => return Ok(Some(buffer[0])),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            }
        }
    }

    fn fill_pixel_buffer(&mut self, buffer: &mut [u8]) -> Result<usize, ParserError> {
        let mut filled = 0;

        while filled < buffer.len() {
            match self.inner.read(&mut buffer[filled..]) {
                Ok(0) => break,
                Ok(count) => filled += count,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            }
        }

        Ok(filled)
    }
}

fn parse_dimension_field(field: Option<&str>, name: &str) -> Result<u32, ParserError> {
    let field = field.ok_or_else(|| {
        ParserError::InvalidFormat(format!("dimensions line is missing the {name} field"))
    })?;

    field.parse().map_err(|_| {
        ParserError::InvalidFormat(format!("{name} \"{field}\" is not an unsigned integer"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Cursor;

    fn decode(data: Vec<u8>) -> Result<DecodedImage, ParserError> {
        Decoder::new(Cursor::new(data)).decode()
    }

    fn p6(header: &str, pixels: &[u8]) -> Vec<u8> {
        let mut data = header.as_bytes().to_vec();
        data.extend_from_slice(pixels);
        data
    }

    #[test]
    fn decodes_minimal_image() {
        let image = decode(p6("P6\n2 1\n255\n", &[0xff, 0x00, 0x00, 0x00, 0xff, 0x00])).unwrap();

        assert_eq!(image.width, 2);
        assert_eq!(image.height, 1);
        assert_eq!(image.max_color_value, 255);
        assert_eq!(image.pixels(), &[0xff, 0x00, 0x00, 0x00, 0xff, 0x00][..]);
    }

    #[test]
    fn skips_comments_and_blank_lines() {
        let image = decode(p6("P6\n# a comment\n\n3 3\n255\n", &[0x7f; 27])).unwrap();

        assert_eq!(image.width, 3);
        assert_eq!(image.height, 3);
        assert_eq!(image.pixels().len(), 27);
    }

    #[test]
    fn rejects_wrong_magic() {
        let result = decode(p6("P5\n2 2\n255\n", &[0x00; 12]));

        assert!(matches!(result, Err(ParserError::InvalidFormat(_))));
    }

    #[test]
    fn rejects_zero_dimensions() {
        let result = decode(p6("P6\n0 5\n255\n", &[]));

        assert!(matches!(result, Err(ParserError::InvalidDimensions(0, 5))));
    }

    #[test]
    fn rejects_truncated_pixel_data() {
        let result = decode(p6("P6\n2 2\n255\n", &[0x01, 0x02, 0x03, 0x04, 0x05]));

        assert!(matches!(
            result,
            Err(ParserError::TruncatedData {
                expected: 12,
                actual: 5
            })
        ));
    }

    #[test]
    fn ignores_extra_dimension_fields() {
        let image = decode(p6("P6\n2 1 42\n255\n", &[0x00; 6])).unwrap();

        assert_eq!(image.width, 2);
        assert_eq!(image.height, 1);
    }

    #[test]
    fn rejects_missing_height() {
        let result = decode(p6("P6\n2\n255\n", &[0x00; 6]));

        assert!(matches!(result, Err(ParserError::InvalidFormat(_))));
    }

    #[test]
    fn rejects_non_numeric_max_color_value() {
        let result = decode(p6("P6\n2 1\nabc\n", &[0x00; 6]));

        assert!(matches!(result, Err(ParserError::InvalidFormat(_))));
    }

    #[test]
    fn reads_pixel_region_raw() {
        // newline and hash bytes inside the binary region are pixel data,
        // not line structure
        let pixels = [b'\n', b'#', 0xff, b'\n', b'\n', b'#'];
        let image = decode(p6("P6\n2 1\n255\n", &pixels)).unwrap();

        assert_eq!(image.pixels(), &pixels[..]);
    }

    #[test]
    fn accepts_unusual_max_color_value_unscaled() {
        let image = decode(p6("P6\n1 1\n100\n", &[200, 200, 200])).unwrap();

        assert_eq!(image.max_color_value, 100);
        assert_eq!(image.pixels(), &[200, 200, 200][..]);
    }

    #[test]
    fn rejects_oversized_dimensions() {
        let result = decode(p6("P6\n100000 1\n255\n", &[]));

        assert!(matches!(
            result,
            Err(ParserError::DimensionsTooLarge {
                width: 100000,
                height: 1
            })
        ));
    }

    #[test]
    fn rejects_header_ending_early() {
        let result = decode(p6("P6\n# only comments follow\n", &[]));

        assert!(matches!(result, Err(ParserError::InvalidFormat(_))));
    }

    #[test]
    fn trims_carriage_returns() {
        let image = decode(p6("P6\r\n1 1\r\n255\r\n", &[1, 2, 3])).unwrap();

        assert_eq!(image.width, 1);
        assert_eq!(image.height, 1);
        assert_eq!(image.pixels(), &[1, 2, 3][..]);
    }
}
