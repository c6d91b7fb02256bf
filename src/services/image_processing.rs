use image::{
    codecs::png::PngEncoder, io::Reader, ColorType, DynamicImage, ImageResult, Rgb, RgbImage,
    RgbaImage,
};
use std::io::Cursor;
use tracing::{debug, trace};

/// Bytes per pixel of the canonical render layout.
pub const RGBX_BYTES_PER_PIXEL: usize = 4;
const PADDING: u8 = u8::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlphaMode {
    /// No alpha channel, samples are tightly packed.
    None,
    /// No alpha information, but each pixel carries an unused padding byte.
    NoneSkipLast,
    /// Unpremultiplied alpha channel.
    Straight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorSpace {
    Gray,
    Rgb,
}

impl ColorSpace {
    fn channels(self) -> usize {
        match self {
            ColorSpace::Gray => 1,
            ColorSpace::Rgb => 3,
        }
    }
}

/// Raw 8-bit samples of a bitmap, row-major, no row padding.
#[derive(Debug, Clone, Copy)]
pub struct PixelPlane<'a> {
    pub samples: &'a [u8],
    pub width: u32,
    pub height: u32,
    pub channels: usize,
}

#[derive(Debug, Clone)]
enum Pixels {
    Decoded(DynamicImage),
    Rgbx(RgbaImage),
}

/// A decoded image, either as the codec produced it or redrawn into the canonical layout.
#[derive(Debug, Clone)]
pub struct Bitmap {
    pixels: Pixels,
}

impl From<DynamicImage> for Bitmap {
    fn from(image: DynamicImage) -> Self {
        Self {
            pixels: Pixels::Decoded(image),
        }
    }
}

impl Bitmap {
    pub fn width(&self) -> u32 {
        match &self.pixels {
            Pixels::Decoded(image) => image.width(),
            Pixels::Rgbx(buffer) => buffer.width(),
        }
    }

    pub fn height(&self) -> u32 {
        match &self.pixels {
            Pixels::Decoded(image) => image.height(),
            Pixels::Rgbx(buffer) => buffer.height(),
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width(), self.height())
    }

    pub fn bytes_per_pixel(&self) -> usize {
        match &self.pixels {
            Pixels::Decoded(image) => image.color().bytes_per_pixel().into(),
            Pixels::Rgbx(_) => RGBX_BYTES_PER_PIXEL,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match &self.pixels {
            Pixels::Decoded(image) => image.as_bytes(),
            Pixels::Rgbx(buffer) => buffer.as_raw(),
        }
    }

    pub fn alpha_mode(&self) -> AlphaMode {
        match &self.pixels {
            Pixels::Decoded(image) if image.color().has_alpha() => AlphaMode::Straight,
            Pixels::Decoded(_) => AlphaMode::None,
            Pixels::Rgbx(_) => AlphaMode::NoneSkipLast,
        }
    }

    pub fn color_space(&self) -> Option<ColorSpace> {
        match &self.pixels {
            Pixels::Decoded(image) => match image.color() {
                ColorType::L8 | ColorType::La8 | ColorType::L16 | ColorType::La16 => {
                    Some(ColorSpace::Gray)
                }
                ColorType::Rgb8
                | ColorType::Rgba8
                | ColorType::Rgb16
                | ColorType::Rgba16
                | ColorType::Rgb32F
                | ColorType::Rgba32F => Some(ColorSpace::Rgb),
                _ => None,
            },
            Pixels::Rgbx(_) => Some(ColorSpace::Rgb),
        }
    }

    /// Only 8-bit sample layouts expose their plane.
    pub fn pixel_plane(&self) -> Option<PixelPlane<'_>> {
        let (samples, channels) = match &self.pixels {
            Pixels::Decoded(image) => match image.color() {
                ColorType::L8 | ColorType::La8 | ColorType::Rgb8 | ColorType::Rgba8 => {
                    (image.as_bytes(), image.color().channel_count().into())
                }
                _ => return None,
            },
            Pixels::Rgbx(buffer) => (buffer.as_raw().as_slice(), RGBX_BYTES_PER_PIXEL),
        };
        Some(PixelPlane {
            samples,
            width: self.width(),
            height: self.height(),
            channels,
        })
    }

    /// 8-bit copy of a wider decode, so it exposes a pixel plane.
    fn narrowed(&self, color_space: ColorSpace) -> Option<Bitmap> {
        let Pixels::Decoded(image) = &self.pixels else {
            return None;
        };
        let image = match color_space {
            ColorSpace::Gray => DynamicImage::ImageLuma8(image.to_luma8()),
            ColorSpace::Rgb => DynamicImage::ImageRgb8(image.to_rgb8()),
        };
        Some(image.into())
    }

    pub fn is_normalized(&self) -> bool {
        matches!(self.pixels, Pixels::Rgbx(_))
    }

    pub fn to_png(&self) -> ImageResult<Vec<u8>> {
        let mut writer = Vec::new();
        let encoder = PngEncoder::new(&mut writer);
        match &self.pixels {
            Pixels::Decoded(image) if image.color().has_alpha() => {
                image.to_rgba8().write_with_encoder(encoder)?
            }
            Pixels::Decoded(image) => image.to_rgb8().write_with_encoder(encoder)?,
            Pixels::Rgbx(buffer) => {
                let rgb = RgbImage::from_fn(buffer.width(), buffer.height(), |x, y| {
                    let [r, g, b, _] = buffer.get_pixel(x, y).0;
                    Rgb([r, g, b])
                });
                rgb.write_with_encoder(encoder)?
            }
        }
        Ok(writer)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RedrawError {
    #[error("Plane has {channels} channels, {color_space:?} needs {expected}")]
    Layout {
        channels: usize,
        color_space: ColorSpace,
        expected: usize,
    },
    #[error("Buffer holds {actual} bytes, expected {expected}")]
    BufferSize { actual: usize, expected: usize },
}

/// Draws `plane`, interpreted in `color_space`, into `target` as 4-byte RGBX pixels.
pub fn redraw(
    plane: &PixelPlane<'_>,
    target: &mut [u8],
    color_space: ColorSpace,
) -> Result<(), RedrawError> {
    let expected = color_space.channels();
    if plane.channels != expected {
        return Err(RedrawError::Layout {
            channels: plane.channels,
            color_space,
            expected,
        });
    }
    let pixels = plane.width as usize * plane.height as usize;
    if plane.samples.len() != pixels * plane.channels {
        return Err(RedrawError::BufferSize {
            actual: plane.samples.len(),
            expected: pixels * plane.channels,
        });
    }
    if target.len() != pixels * RGBX_BYTES_PER_PIXEL {
        return Err(RedrawError::BufferSize {
            actual: target.len(),
            expected: pixels * RGBX_BYTES_PER_PIXEL,
        });
    }

    let source = plane.samples.chunks_exact(plane.channels);
    for (out, pixel) in target.chunks_exact_mut(RGBX_BYTES_PER_PIXEL).zip(source) {
        match color_space {
            ColorSpace::Gray => out[..3].fill(pixel[0]),
            ColorSpace::Rgb => out[..3].copy_from_slice(pixel),
        }
        out[3] = PADDING;
    }
    Ok(())
}

fn allocate_rgbx(width: u32, height: u32) -> Option<Vec<u8>> {
    let len = (width as usize)
        .checked_mul(height as usize)?
        .checked_mul(RGBX_BYTES_PER_PIXEL)?;
    let mut buffer = Vec::new();
    buffer.try_reserve_exact(len).ok()?;
    buffer.resize(len, 0);
    Some(buffer)
}

pub fn decode(bytes: &[u8]) -> Option<Bitmap> {
    let reader = Reader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| debug!(error = %e, "Failed to read image"))
        .ok()?;
    let image = reader
        .decode()
        .map_err(|e| debug!(error = %e, "Failed to decode image"))
        .ok()?;
    Some(image.into())
}

/// Redraws an opaque bitmap into the RGBX layout, so rendering skips alpha compositing.
/// Wider samples are narrowed to 8 bits first. Bitmaps with alpha, or that fail to
/// redraw, come back untouched.
pub fn normalize(bitmap: Bitmap) -> Bitmap {
    let Some(color_space) = bitmap.color_space() else {
        trace!("No color space, skipping normalization");
        return bitmap;
    };
    if bitmap.alpha_mode() != AlphaMode::None {
        trace!(alpha = ?bitmap.alpha_mode(), "Bitmap carries alpha, skipping normalization");
        return bitmap;
    }
    let narrowed = match bitmap.pixel_plane() {
        Some(_) => None,
        None => bitmap.narrowed(color_space),
    };
    let Some(plane) = narrowed.as_ref().unwrap_or(&bitmap).pixel_plane() else {
        trace!("No pixel plane, skipping normalization");
        return bitmap;
    };

    let (width, height) = bitmap.dimensions();
    let Some(mut buffer) = allocate_rgbx(width, height) else {
        debug!(width, height, "Failed to allocate normalization buffer");
        return bitmap;
    };
    if let Err(e) = redraw(&plane, &mut buffer, color_space) {
        debug!(error = %e, "Failed to redraw bitmap");
        return bitmap;
    }
    match RgbaImage::from_raw(width, height, buffer) {
        Some(buffer) => Bitmap {
            pixels: Pixels::Rgbx(buffer),
        },
        None => bitmap,
    }
}

pub fn decompress(bytes: &[u8]) -> Option<Bitmap> {
    decode(bytes).map(normalize)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::{
        decode, decompress, normalize, redraw, AlphaMode, Bitmap, ColorSpace, PixelPlane,
        RedrawError,
    };
    use image::{
        codecs::png::PngEncoder, DynamicImage, GrayImage, ImageBuffer, Luma, Rgb, RgbImage, Rgba,
        RgbaImage,
    };

    pub fn opaque_png(width: u32, height: u32) -> Vec<u8> {
        let image = RgbImage::from_fn(width, height, |x, y| Rgb([x as u8, y as u8, 7]));
        let mut writer = Vec::new();
        image.write_with_encoder(PngEncoder::new(&mut writer)).unwrap();
        writer
    }

    pub fn translucent_png(width: u32, height: u32) -> Vec<u8> {
        let image = RgbaImage::from_pixel(width, height, Rgba([10, 20, 30, 128]));
        let mut writer = Vec::new();
        image.write_with_encoder(PngEncoder::new(&mut writer)).unwrap();
        writer
    }

    #[test]
    fn garbage_does_not_decode() {
        assert!(decompress(b"definitely not an image").is_none());
        assert!(decompress(&[]).is_none());
    }

    #[test]
    fn opaque_png_is_normalized() {
        let bitmap = decompress(&opaque_png(3, 2)).unwrap();

        assert!(bitmap.is_normalized());
        assert_eq!(bitmap.dimensions(), (3, 2));
        assert_eq!(bitmap.bytes_per_pixel(), 4);
        assert_eq!(bitmap.as_bytes().len(), 3 * 2 * 4);
        assert_eq!(bitmap.alpha_mode(), AlphaMode::NoneSkipLast);
    }

    #[test]
    fn normalized_pixels_match_source() {
        let bitmap = decompress(&opaque_png(3, 2)).unwrap();

        // Pixel (2, 1) is the last one.
        assert_eq!(&bitmap.as_bytes()[20..24], &[2, 1, 7, 255]);
        assert_eq!(&bitmap.as_bytes()[0..4], &[0, 0, 7, 255]);
    }

    #[test]
    fn translucent_png_is_left_alone() {
        let bitmap = decompress(&translucent_png(2, 2)).unwrap();

        assert!(!bitmap.is_normalized());
        assert_eq!(bitmap.alpha_mode(), AlphaMode::Straight);
        assert_eq!(&bitmap.as_bytes()[0..4], &[10, 20, 30, 128]);
    }

    #[test]
    fn bitmap_with_alpha_keeps_its_buffer() {
        let image = DynamicImage::ImageRgba8(RgbaImage::new(4, 4));
        let bitmap = Bitmap::from(image);
        let before = bitmap.as_bytes().as_ptr();

        let after = normalize(bitmap);

        assert_eq!(after.as_bytes().as_ptr(), before);
    }

    #[test]
    fn opaque_bitmap_gets_a_fresh_buffer() {
        let image = DynamicImage::ImageRgb8(RgbImage::new(4, 4));
        let bitmap = Bitmap::from(image);
        let before = bitmap.as_bytes().as_ptr();

        let after = normalize(bitmap);

        assert_ne!(after.as_bytes().as_ptr(), before);
        assert_eq!(after.dimensions(), (4, 4));
        assert_eq!(after.bytes_per_pixel(), 4);
    }

    #[test]
    fn gray_bitmap_is_expanded() {
        let image = DynamicImage::ImageLuma8(GrayImage::from_pixel(1, 1, Luma([42])));

        let bitmap = normalize(Bitmap::from(image));

        assert!(bitmap.is_normalized());
        assert_eq!(bitmap.as_bytes(), &[42, 42, 42, 255]);
    }

    #[test]
    fn wide_rgb_bitmap_is_narrowed_and_normalized() {
        let image: ImageBuffer<Rgb<u16>, Vec<u16>> =
            ImageBuffer::from_pixel(2, 2, Rgb([u16::MAX, 0, u16::MAX]));
        let bitmap = Bitmap::from(DynamicImage::ImageRgb16(image));
        assert!(bitmap.pixel_plane().is_none());

        let bitmap = normalize(bitmap);

        assert!(bitmap.is_normalized());
        assert_eq!(bitmap.bytes_per_pixel(), 4);
        assert_eq!(&bitmap.as_bytes()[0..4], &[255, 0, 255, 255]);
    }

    #[test]
    fn wide_gray_bitmap_is_narrowed_and_normalized() {
        let image: ImageBuffer<Luma<u16>, Vec<u16>> =
            ImageBuffer::from_pixel(1, 1, Luma([u16::MAX]));

        let bitmap = normalize(Bitmap::from(DynamicImage::ImageLuma16(image)));

        assert!(bitmap.is_normalized());
        assert_eq!(bitmap.as_bytes(), &[255, 255, 255, 255]);
    }

    #[test]
    fn float_bitmap_is_normalized() {
        let image: ImageBuffer<Rgb<f32>, Vec<f32>> =
            ImageBuffer::from_pixel(3, 1, Rgb([1.0, 0.0, 0.0]));

        let bitmap = normalize(Bitmap::from(DynamicImage::ImageRgb32F(image)));

        assert!(bitmap.is_normalized());
        assert_eq!(bitmap.dimensions(), (3, 1));
        assert_eq!(&bitmap.as_bytes()[0..4], &[255, 0, 0, 255]);
    }

    #[test]
    fn wide_translucent_bitmap_is_left_alone() {
        let image: ImageBuffer<Rgba<u16>, Vec<u16>> = ImageBuffer::new(2, 2);

        let bitmap = normalize(Bitmap::from(DynamicImage::ImageRgba16(image)));

        assert!(!bitmap.is_normalized());
        assert_eq!(bitmap.bytes_per_pixel(), 8);
    }

    #[test]
    fn opaque_sixteen_bit_png_is_normalized() {
        let image: ImageBuffer<Rgb<u16>, Vec<u16>> =
            ImageBuffer::from_fn(4, 4, |x, _| Rgb([x as u16 * 257, 0, u16::MAX]));
        let mut png = Vec::new();
        image.write_with_encoder(PngEncoder::new(&mut png)).unwrap();

        let bitmap = decompress(&png).unwrap();

        assert!(bitmap.is_normalized());
        assert_eq!(bitmap.bytes_per_pixel(), 4);
        assert_eq!(bitmap.dimensions(), (4, 4));
        assert_eq!(&bitmap.as_bytes()[4..8], &[1, 0, 255, 255]);
    }

    #[test]
    fn normalizing_twice_keeps_the_first_result() {
        let bitmap = decompress(&opaque_png(2, 2)).unwrap();
        let before = bitmap.as_bytes().as_ptr();

        let again = normalize(bitmap);

        assert!(again.is_normalized());
        assert_eq!(again.as_bytes().as_ptr(), before);
    }

    #[test]
    fn redraw_rejects_mismatched_layout() {
        let samples = [0u8; 4 * 2];
        let plane = PixelPlane {
            samples: &samples,
            width: 2,
            height: 1,
            channels: 4,
        };
        let mut target = [0u8; 8];

        let result = redraw(&plane, &mut target, ColorSpace::Rgb);

        assert!(matches!(result, Err(RedrawError::Layout { .. })));
    }

    #[test]
    fn redraw_rejects_short_target() {
        let samples = [0u8; 3 * 2];
        let plane = PixelPlane {
            samples: &samples,
            width: 2,
            height: 1,
            channels: 3,
        };
        let mut target = [0u8; 7];

        let result = redraw(&plane, &mut target, ColorSpace::Rgb);

        assert!(matches!(
            result,
            Err(RedrawError::BufferSize {
                actual: 7,
                expected: 8
            })
        ));
    }

    #[test]
    fn normalized_bitmap_encodes_as_png() {
        let bitmap = decompress(&opaque_png(3, 3)).unwrap();

        let png = bitmap.to_png().unwrap();
        let round = decode(&png).unwrap();

        assert_eq!(round.dimensions(), (3, 3));
        assert_eq!(round.alpha_mode(), AlphaMode::None);
    }
}
