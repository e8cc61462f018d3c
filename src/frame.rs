use ndarray::Array2;

/// Row-major 2D image indexed `[y, x]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame<T> {
    data: Array2<T>,
}

impl<T: Copy + Default> Frame<T> {
    pub fn filled(width: usize, height: usize, value: T) -> Self {
        Self {
            data: Array2::from_elem((height, width), value),
        }
    }

    pub fn from_vec(width: usize, height: usize, pixels: Vec<T>) -> Option<Self> {
        Array2::from_shape_vec((height, width), pixels)
            .ok()
            .map(|data| Self { data })
    }

    pub fn from_fn<F>(width: usize, height: usize, mut f: F) -> Self
    where
        F: FnMut(usize, usize) -> T,
    {
        Self {
            data: Array2::from_shape_fn((height, width), |(y, x)| f(x, y)),
        }
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.data.ncols()
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.data.nrows()
    }

    #[inline]
    pub fn dimensions(&self) -> (usize, usize) {
        (self.width(), self.height())
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> T {
        self.data[[y, x]]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, value: T) {
        self.data[[y, x]] = value;
    }

    /// Signed lookup; `None` outside the image.
    #[inline]
    pub fn fetch(&self, x: i64, y: i64) -> Option<T> {
        if x < 0 || y < 0 {
            return None;
        }
        self.data.get((y as usize, x as usize)).copied()
    }

    pub fn pixels(&self) -> impl Iterator<Item = &T> {
        self.data.iter()
    }

    pub fn pixels_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.data.iter_mut()
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.data.iter().copied().collect()
    }
}

/// Color and linear depth of one source pixel as seen by the kernel.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Texel {
    pub color: [f32; 3],
    pub depth: f32,
}

impl Texel {
    /// Background (non-positive depth) and exactly black pixels carry no energy.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.depth > 0.0 && self.color != [0.0; 3]
    }
}

/// The images bound to one dispatch.
#[derive(Debug, Clone)]
pub struct SceneFrames {
    /// RGB diffuse lighting; alpha carries packed strength and quality.
    pub diffuse: Frame<[f32; 4]>,
    /// Linear view depth in meters.
    pub depth: Frame<f32>,
    /// Per-channel scatter distance in millimetres.
    pub scatter: Frame<[f32; 3]>,
}

impl SceneFrames {
    pub fn new(
        diffuse: Frame<[f32; 4]>,
        depth: Frame<f32>,
        scatter: Frame<[f32; 3]>,
    ) -> Result<Self, String> {
        let size = diffuse.dimensions();
        if depth.dimensions() != size {
            return Err(format!(
                "depth image is {}x{} but diffuse image is {}x{}",
                depth.width(),
                depth.height(),
                size.0,
                size.1
            ));
        }
        if scatter.dimensions() != size {
            return Err(format!(
                "scatter image is {}x{} but diffuse image is {}x{}",
                scatter.width(),
                scatter.height(),
                size.0,
                size.1
            ));
        }
        Ok(Self {
            diffuse,
            depth,
            scatter,
        })
    }

    #[inline]
    pub fn dimensions(&self) -> (usize, usize) {
        self.diffuse.dimensions()
    }

    /// Source texel at an absolute coordinate; zero outside the image.
    #[inline]
    pub fn texel(&self, x: i64, y: i64) -> Texel {
        match (self.diffuse.fetch(x, y), self.depth.fetch(x, y)) {
            (Some(color), Some(depth)) => Texel {
                color: [color[0], color[1], color[2]],
                depth,
            },
            _ => Texel::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_outside_is_none() {
        let frame = Frame::from_fn(3, 2, |x, y| (x + 10 * y) as f32);
        assert_eq!(frame.fetch(2, 1), Some(12.0));
        assert_eq!(frame.fetch(3, 1), None);
        assert_eq!(frame.fetch(-1, 0), None);
        assert_eq!(frame.fetch(0, 2), None);
    }

    #[test]
    fn texel_outside_image_is_invalid() {
        let frames = SceneFrames::new(
            Frame::filled(2, 2, [0.5, 0.5, 0.5, 1.0]),
            Frame::filled(2, 2, 1.0),
            Frame::filled(2, 2, [1.0; 3]),
        )
        .unwrap();
        assert!(frames.texel(1, 1).is_valid());
        assert!(!frames.texel(2, 0).is_valid());
        assert_eq!(frames.texel(-1, 0), Texel::default());
    }

    #[test]
    fn black_or_background_texels_are_invalid() {
        assert!(!Texel { color: [0.0; 3], depth: 1.0 }.is_valid());
        assert!(!Texel { color: [0.1; 3], depth: 0.0 }.is_valid());
        assert!(!Texel { color: [0.1; 3], depth: -2.0 }.is_valid());
    }

    #[test]
    fn mismatched_sizes_are_rejected() {
        let result = SceneFrames::new(
            Frame::filled(2, 2, [0.5; 4]),
            Frame::filled(3, 2, 1.0),
            Frame::filled(2, 2, [1.0; 3]),
        );
        assert!(result.is_err());
    }

    #[test]
    fn from_fn_is_row_major() {
        let frame = Frame::from_fn(3, 2, |x, y| (x + 3 * y) as u32);
        assert_eq!(frame.dimensions(), (3, 2));
        assert_eq!(frame.to_vec(), vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(Frame::from_vec(2, 2, vec![0u32; 3]), None);
    }
}
