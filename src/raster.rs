//! In-memory pixel grids. The compass is drawn into one of these, and the
//! weather icon is decoded into one, so the dashboard only has to know how to
//! show a single image type.

use anyhow::Context;
use embedded_graphics::{
    pixelcolor::{Rgb888, RgbColor},
    prelude::{DrawTarget, OriginDimensions, Pixel, Size},
};
use log::trace;
use std::{
    convert::Infallible,
    fmt::{self, Debug, Formatter},
    fs::File,
    io::{self, BufWriter, Write},
    path::Path,
};

/// Alpha values below this are treated as fully transparent. Terminal cells
/// can't blend, so it's all or nothing.
const ALPHA_THRESHOLD: u8 = 128;

/// A fixed-size grid of pixels. `None` is a transparent pixel, which will show
/// whatever is behind the image.
#[derive(Clone, PartialEq)]
pub struct Raster {
    width: u32,
    height: u32,
    pixels: Vec<Option<Rgb888>>,
}

impl Raster {
    /// Create a fully transparent raster
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![None; width as usize * height as usize],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    /// Get the color at a position. Out of bounds is transparent.
    pub fn get(&self, x: u32, y: u32) -> Option<Rgb888> {
        if x < self.width && y < self.height {
            self.pixels[self.index(x, y)]
        } else {
            None
        }
    }

    fn set(&mut self, x: i32, y: i32, color: Rgb888) {
        // Primitives can hang off the edge of the canvas, just drop those
        let in_bounds = x >= 0
            && y >= 0
            && (x as u32) < self.width
            && (y as u32) < self.height;
        if in_bounds {
            let index = self.index(x as u32, y as u32);
            self.pixels[index] = Some(color);
        }
    }

    fn index(&self, x: u32, y: u32) -> usize {
        y as usize * self.width as usize + x as usize
    }

    /// Decode a PNG. Any bit depth and color type is accepted; everything is
    /// normalized down to 8-bit RGB(A).
    pub fn from_png(bytes: &[u8]) -> Result<Self, png::DecodingError> {
        let mut decoder = png::Decoder::new(bytes);
        decoder
            .set_transformations(png::Transformations::normalize_to_color8());
        let mut reader = decoder.read_info()?;
        let mut buffer = vec![0; reader.output_buffer_size()];
        let info = reader.next_frame(&mut buffer)?;
        let data = &buffer[..info.buffer_size()];
        trace!(
            "Decoded {}x{} PNG as {:?}",
            info.width,
            info.height,
            info.color_type
        );

        let pixels: Vec<Option<Rgb888>> = match info.color_type {
            png::ColorType::Rgb => data
                .chunks_exact(3)
                .map(|c| Some(Rgb888::new(c[0], c[1], c[2])))
                .collect(),
            png::ColorType::Rgba => data
                .chunks_exact(4)
                .map(|c| opaque(c[3]).then(|| Rgb888::new(c[0], c[1], c[2])))
                .collect(),
            png::ColorType::Grayscale => data
                .iter()
                .map(|&v| Some(Rgb888::new(v, v, v)))
                .collect(),
            png::ColorType::GrayscaleAlpha => data
                .chunks_exact(2)
                .map(|c| opaque(c[1]).then(|| Rgb888::new(c[0], c[0], c[0])))
                .collect(),
            // The EXPAND transformation turns palettes into RGB(A)
            png::ColorType::Indexed => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "indexed color was not expanded",
                )
                .into());
            }
        };

        Ok(Self {
            width: info.width,
            height: info.height,
            pixels,
        })
    }

    /// Encode as an 8-bit RGBA PNG, with transparent pixels fully transparent
    pub fn to_png(&self) -> Result<Vec<u8>, png::EncodingError> {
        let data: Vec<u8> = self
            .pixels
            .iter()
            .flat_map(|pixel| match pixel {
                Some(color) => [color.r(), color.g(), color.b(), u8::MAX],
                None => [0; 4],
            })
            .collect();

        let mut output = Vec::new();
        let mut encoder =
            png::Encoder::new(&mut output, self.width, self.height);
        encoder.set_color(png::ColorType::Rgba);
        encoder.set_depth(png::BitDepth::Eight);
        let mut writer = encoder.write_header()?;
        writer.write_image_data(&data)?;
        writer.finish()?;
        Ok(output)
    }

    /// Write the raster to disk as a PNG
    pub fn save_png(&self, path: &Path) -> anyhow::Result<()> {
        let bytes = self.to_png().context("Error encoding PNG")?;
        let file = File::create(path)
            .with_context(|| format!("Error creating {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        writer
            .write_all(&bytes)
            .and_then(|()| writer.flush())
            .with_context(|| format!("Error writing {}", path.display()))?;
        Ok(())
    }
}

// Dumping every pixel into the logs helps nobody
impl Debug for Raster {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Raster")
            .field("width", &self.width)
            .field("height", &self.height)
            .finish_non_exhaustive()
    }
}

fn opaque(alpha: u8) -> bool {
    alpha >= ALPHA_THRESHOLD
}

impl OriginDimensions for Raster {
    fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }
}

impl DrawTarget for Raster {
    type Color = Rgb888;
    type Error = Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        for Pixel(point, color) in pixels {
            self.set(point.x, point.y, color);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_graphics::{
        prelude::{Point, Primitive},
        primitives::{PrimitiveStyle, Rectangle},
        Drawable,
    };

    #[test]
    fn test_draw_clips_to_canvas() {
        let mut raster = Raster::new(4, 3);
        Rectangle::new(Point::new(2, 1), Size::new(10, 10))
            .into_styled(PrimitiveStyle::with_fill(Rgb888::RED))
            .draw(&mut raster)
            .unwrap();

        assert_eq!(raster.get(0, 0), None);
        assert_eq!(raster.get(1, 1), None);
        assert_eq!(raster.get(2, 1), Some(Rgb888::RED));
        assert_eq!(raster.get(3, 2), Some(Rgb888::RED));
        assert_eq!(raster.get(4, 2), None);
    }

    #[test]
    fn test_png_round_trip_keeps_transparency() {
        let mut raster = Raster::new(3, 2);
        raster.set(0, 0, Rgb888::new(10, 20, 30));
        raster.set(2, 1, Rgb888::WHITE);

        let bytes = raster.to_png().unwrap();
        assert_eq!(&bytes[1..4], b"PNG");
        let decoded = Raster::from_png(&bytes).unwrap();
        assert_eq!(decoded, raster);
    }

    #[test]
    fn test_wide_raster_indexing() {
        let mut raster = Raster::new(70_000, 2);
        raster.set(69_999, 1, Rgb888::BLUE);
        assert_eq!(raster.get(69_999, 1), Some(Rgb888::BLUE));
        assert_eq!(raster.get(69_999, 0), None);
        assert_eq!(raster.get(70_000, 1), None);
    }

    #[test]
    fn test_garbage_png() {
        assert!(Raster::from_png(b"definitely not a png").is_err());
    }
}
