//! Row-major 2D buffers used for per-pixel data.

use glam::Vec3;
use std::collections::TryReserveError;

/// A dense row-major 2D buffer.
///
/// Invalid entries are encoded in-band: zero (or non-finite) depth, NaN
/// vectors. This keeps every map a flat, `Copy`-element buffer that can be
/// processed lane-parallel and reused across frames.
#[derive(Debug, Clone, PartialEq)]
pub struct Map2D<T> {
    width: usize,
    height: usize,
    data: Vec<T>,
}

/// Depth in meters; `0.0` marks a missing sample.
pub type DepthMap = Map2D<f32>;
/// Camera-space points; NaN marks a missing vertex.
pub type VertexMap = Map2D<Vec3>;
/// Unit normals; NaN marks a missing normal.
pub type NormalMap = Map2D<Vec3>;

/// Returns true for a usable depth sample.
#[inline]
pub fn is_valid_depth(depth: f32) -> bool {
    depth.is_finite() && depth > 0.0
}

/// Returns true for a usable vertex or normal.
#[inline]
pub fn is_valid_vector(v: Vec3) -> bool {
    v.is_finite()
}

impl<T: Copy> Map2D<T> {
    /// Create a map filled with `fill`.
    pub fn new(width: usize, height: usize, fill: T) -> Self {
        Self {
            width,
            height,
            data: vec![fill; width * height],
        }
    }

    /// Create a map filled with `fill`, reporting allocation failure instead of aborting.
    ///
    /// An element count that overflows `usize` saturates, so the reservation
    /// fails with a capacity overflow.
    pub fn try_new(width: usize, height: usize, fill: T) -> Result<Self, TryReserveError> {
        let len = width.saturating_mul(height);
        let mut data = Vec::new();
        data.try_reserve_exact(len)?;
        data.resize(len, fill);
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Wrap an existing buffer. Returns `None` if the length does not match.
    pub fn from_vec(width: usize, height: usize, data: Vec<T>) -> Option<Self> {
        (width.checked_mul(height) == Some(data.len())).then_some(Self {
            width,
            height,
            data,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// (width, height)
    pub fn dimensions(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Bounds-checked read.
    pub fn get(&self, x: usize, y: usize) -> Option<T> {
        if x < self.width && y < self.height {
            Some(self.data[y * self.width + x])
        } else {
            None
        }
    }

    /// Unchecked-by-contract read; panics when out of bounds.
    #[inline]
    pub fn at(&self, x: usize, y: usize) -> T {
        self.data[y * self.width + x]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, value: T) {
        self.data[y * self.width + x] = value;
    }

    pub fn row(&self, y: usize) -> &[T] {
        &self.data[y * self.width..(y + 1) * self.width]
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }

    pub fn fill(&mut self, value: T) {
        self.data.fill(value);
    }
}

impl DepthMap {
    /// Build a depth map from raw 16-bit millimetre samples, as delivered by
    /// structured-light and time-of-flight sensors.
    pub fn from_millimeters(width: usize, height: usize, raw: &[u16]) -> Option<Self> {
        let data = raw.iter().map(|&mm| mm as f32 * 0.001).collect();
        Self::from_vec(width, height, data)
    }

    /// Number of valid depth samples.
    pub fn valid_count(&self) -> usize {
        self.data.iter().filter(|&&d| is_valid_depth(d)).count()
    }
}

impl Map2D<Vec3> {
    /// Map with every entry invalid.
    pub fn invalid(width: usize, height: usize) -> Self {
        Self::new(width, height, Vec3::NAN)
    }

    /// Number of valid (finite) vectors.
    pub fn valid_count(&self) -> usize {
        self.data.iter().filter(|v| is_valid_vector(**v)).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_indexing_is_row_major() {
        let mut map = Map2D::new(3, 2, 0u8);
        map.set(2, 1, 7);
        assert_eq!(map.as_slice()[5], 7);
        assert_eq!(map.get(2, 1), Some(7));
        assert_eq!(map.get(3, 0), None);
        assert_eq!(map.row(1), &[0, 0, 7]);
    }

    #[test]
    fn test_try_new_reports_overflowing_size() {
        assert!(Map2D::try_new(usize::MAX, 2, 0.0f32).is_err());
        assert!(Map2D::try_new(usize::MAX / 2, 3, Vec3::ZERO).is_err());
        assert!(Map2D::from_vec(usize::MAX, 2, vec![0.0f32; 2]).is_none());
        assert_eq!(Map2D::try_new(4, 3, 1u8).unwrap().len(), 12);
    }

    #[test]
    fn test_from_vec_rejects_wrong_length() {
        assert!(Map2D::from_vec(2, 2, vec![0.0f32; 3]).is_none());
        assert!(Map2D::from_vec(2, 2, vec![0.0f32; 4]).is_some());
    }

    #[test]
    fn test_depth_from_millimeters() {
        let depth = DepthMap::from_millimeters(2, 1, &[1500, 0]).unwrap();
        assert!((depth.at(0, 0) - 1.5).abs() < 1e-6);
        assert_eq!(depth.at(1, 0), 0.0);
        assert_eq!(depth.valid_count(), 1);
    }

    #[test]
    fn test_invalid_vector_map() {
        let mut map = VertexMap::invalid(4, 4);
        assert_eq!(map.valid_count(), 0);
        map.set(1, 1, Vec3::ONE);
        assert_eq!(map.valid_count(), 1);
        assert!(!is_valid_vector(map.at(0, 0)));
    }
}
