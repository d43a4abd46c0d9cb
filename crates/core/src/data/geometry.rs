//! Bounding boxes and points
//!
//! Boxes can be built from corners or from a center plus size, in either
//! width/height or height/width order. All of them are stored as corners, and
//! equality compares those corners with an absolute tolerance.

use crate::{Error, Result};

/// Absolute tolerance for coordinate comparisons
pub const COORD_EPSILON: f64 = 1e-6;

fn approx_eq(a: f64, b: f64) -> bool {
    (a - b).abs() <= COORD_EPSILON
}

fn approx_eq_opt(a: Option<f64>, b: Option<f64>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => approx_eq(a, b),
        (None, None) => true,
        _ => false,
    }
}

/// Axis-aligned bounding box
#[derive(Debug, Clone)]
pub struct BoundingBox {
    x1: f64,
    x2: f64,
    y1: f64,
    y2: f64,
    label: Option<String>,
    probability: Option<f64>,
}

impl BoundingBox {
    /// Create from corner coordinates; corners are normalized so `x1 <= x2`, `y1 <= y2`
    pub fn from_corners(x1: f64, x2: f64, y1: f64, y2: f64) -> Self {
        Self {
            x1: x1.min(x2),
            x2: x1.max(x2),
            y1: y1.min(y2),
            y2: y1.max(y2),
            label: None,
            probability: None,
        }
    }

    /// Create from center, width and height
    pub fn from_center(cx: f64, cy: f64, width: f64, height: f64) -> Self {
        Self::from_corners(
            cx - width / 2.0,
            cx + width / 2.0,
            cy - height / 2.0,
            cy + height / 2.0,
        )
    }

    /// Create from center, height and width
    pub fn from_center_hw(cx: f64, cy: f64, height: f64, width: f64) -> Self {
        Self::from_center(cx, cy, width, height)
    }

    /// Attach a class label
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Attach a confidence
    pub fn with_probability(mut self, probability: f64) -> Self {
        self.probability = Some(probability);
        self
    }

    pub fn x1(&self) -> f64 {
        self.x1
    }

    pub fn x2(&self) -> f64 {
        self.x2
    }

    pub fn y1(&self) -> f64 {
        self.y1
    }

    pub fn y2(&self) -> f64 {
        self.y2
    }

    pub fn cx(&self) -> f64 {
        (self.x1 + self.x2) / 2.0
    }

    pub fn cy(&self) -> f64 {
        (self.y1 + self.y2) / 2.0
    }

    pub fn width(&self) -> f64 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f64 {
        self.y2 - self.y1
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn probability(&self) -> Option<f64> {
        self.probability
    }

    /// Scale relative `[0, 1]` coordinates to an image of `width x height` pixels
    pub fn to_absolute(&self, width: u32, height: u32) -> Self {
        let (w, h) = (width as f64, height as f64);
        Self {
            x1: self.x1 * w,
            x2: self.x2 * w,
            y1: self.y1 * h,
            y2: self.y2 * h,
            label: self.label.clone(),
            probability: self.probability,
        }
    }
}

impl PartialEq for BoundingBox {
    fn eq(&self, other: &Self) -> bool {
        approx_eq(self.x1, other.x1)
            && approx_eq(self.x2, other.x2)
            && approx_eq(self.y1, other.y1)
            && approx_eq(self.y2, other.y2)
            && self.label == other.label
            && approx_eq_opt(self.probability, other.probability)
    }
}

/// N-dimensional point (usually 2D or 3D)
#[derive(Debug, Clone)]
pub struct Point {
    coords: Vec<f64>,
    label: Option<String>,
    probability: Option<f64>,
}

impl Point {
    /// 2D point
    pub fn new(x: f64, y: f64) -> Self {
        Self {
            coords: vec![x, y],
            label: None,
            probability: None,
        }
    }

    /// 3D point
    pub fn new_3d(x: f64, y: f64, z: f64) -> Self {
        Self {
            coords: vec![x, y, z],
            label: None,
            probability: None,
        }
    }

    /// Point with arbitrary dimensionality (at least one coordinate)
    pub fn from_coords(coords: Vec<f64>) -> Result<Self> {
        if coords.is_empty() {
            return Err(Error::InvalidData(
                "Point needs at least one coordinate".to_string(),
            ));
        }
        Ok(Self {
            coords,
            label: None,
            probability: None,
        })
    }

    /// Attach a class label
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Attach a confidence
    pub fn with_probability(mut self, probability: f64) -> Self {
        self.probability = Some(probability);
        self
    }

    /// Number of coordinates
    pub fn dimensions(&self) -> usize {
        self.coords.len()
    }

    /// Coordinate `i`, if present
    pub fn coord(&self, i: usize) -> Option<f64> {
        self.coords.get(i).copied()
    }

    /// All coordinates
    pub fn coords(&self) -> &[f64] {
        &self.coords
    }

    /// First coordinate
    pub fn x(&self) -> f64 {
        self.coords[0]
    }

    /// Second coordinate; 0 for 1D points
    pub fn y(&self) -> f64 {
        self.coord(1).unwrap_or(0.0)
    }

    /// Third coordinate; 0 for points with fewer dimensions
    pub fn z(&self) -> f64 {
        self.coord(2).unwrap_or(0.0)
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn probability(&self) -> Option<f64> {
        self.probability
    }

    /// Scale relative x/y coordinates to an image of `width x height` pixels
    pub fn to_absolute(&self, width: u32, height: u32) -> Self {
        let mut coords = self.coords.clone();
        coords[0] *= width as f64;
        if let Some(y) = coords.get_mut(1) {
            *y *= height as f64;
        }
        Self {
            coords,
            label: self.label.clone(),
            probability: self.probability,
        }
    }
}

impl PartialEq for Point {
    fn eq(&self, other: &Self) -> bool {
        self.coords.len() == other.coords.len()
            && self
                .coords
                .iter()
                .zip(&other.coords)
                .all(|(a, b)| approx_eq(*a, *b))
            && self.label == other.label
            && approx_eq_opt(self.probability, other.probability)
    }
}
