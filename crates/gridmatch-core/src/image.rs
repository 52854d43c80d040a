/// Borrowed 8-bit grayscale image, row-major.
#[derive(Clone, Copy, Debug)]
pub struct GrayImageView<'a> {
    pub width: usize,
    pub height: usize,
    pub data: &'a [u8],
}

impl GrayImageView<'_> {
    /// `data` holds exactly `width * height` bytes.
    pub fn is_consistent(&self) -> bool {
        self.data.len() == self.width * self.height
    }

    /// Pixel at `(x, y)`; outside the image reads as `None`.
    #[inline]
    pub fn get(&self, x: i64, y: i64) -> Option<u8> {
        if x < 0 || y < 0 || x as usize >= self.width || y as usize >= self.height {
            return None;
        }
        self.data.get(y as usize * self.width + x as usize).copied()
    }

    /// Bilinear sample at a subpixel position. Out-of-image taps read as 0,
    /// so content fades to black at the border.
    #[inline]
    pub fn sample(&self, x: f32, y: f32) -> f32 {
        let (x0, y0) = (x.floor(), y.floor());
        let (fx, fy) = (x - x0, y - y0);
        let (ix, iy) = (x0 as i64, y0 as i64);
        let tap = |dx: i64, dy: i64| self.get(ix + dx, iy + dy).unwrap_or(0) as f32;

        let top = tap(0, 0) * (1.0 - fx) + tap(1, 0) * fx;
        let bottom = tap(0, 1) * (1.0 - fx) + tap(1, 1) * fx;
        top * (1.0 - fy) + bottom * fy
    }

    /// [`Self::sample`] rounded to the nearest gray level.
    #[inline]
    pub fn sample_u8(&self, x: f32, y: f32) -> u8 {
        self.sample(x, y).round().clamp(0.0, 255.0) as u8
    }
}

/// Owned grayscale image.
#[derive(Clone, Debug, PartialEq)]
pub struct GrayImage {
    pub width: usize,
    pub height: usize,
    pub data: Vec<u8>,
}

impl GrayImage {
    /// Fill a `width x height` image from a per-pixel function.
    pub fn from_fn(width: usize, height: usize, mut f: impl FnMut(usize, usize) -> u8) -> Self {
        let mut data = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                data.push(f(x, y));
            }
        }
        Self {
            width,
            height,
            data,
        }
    }

    pub fn view(&self) -> GrayImageView<'_> {
        GrayImageView {
            width: self.width,
            height: self.height,
            data: &self.data,
        }
    }
}
