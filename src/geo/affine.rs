//! The pixel-space to model-space affine transform derived from `ModelPixelScale`/
//! `ModelTiepoint`.

/// A 6-parameter affine transform: `(col, row) -> (a*col + b*row + c, d*col + e*row + f)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineTransform(f64, f64, f64, f64, f64, f64);

impl AffineTransform {
    pub fn new(a: f64, b: f64, c: f64, d: f64, e: f64, f: f64) -> Self {
        Self(a, b, c, d, e, f)
    }

    pub fn a(&self) -> f64 {
        self.0
    }

    pub fn b(&self) -> f64 {
        self.1
    }

    pub fn c(&self) -> f64 {
        self.2
    }

    pub fn d(&self) -> f64 {
        self.3
    }

    pub fn e(&self) -> f64 {
        self.4
    }

    pub fn f(&self) -> f64 {
        self.5
    }

    /// Build the transform from a resolved `ModelPixelScale` and `ModelTiepoint` tag value.
    ///
    /// `scale` must carry at least the X/Y resolution and `tiepoint` must have length 6 (a
    /// single tiepoint); returns `None` otherwise.
    pub fn from_tags(scale: &[f64], tiepoint: &[f64]) -> Option<Self> {
        if scale.len() < 2 || tiepoint.len() != 6 {
            return None;
        }
        Some(Self::new(
            scale[0],
            0.0,
            tiepoint[3],
            0.0,
            -scale[1],
            tiepoint[4],
        ))
    }

    /// Map a pixel-space coordinate to model space.
    pub fn apply(&self, col: f64, row: f64) -> (f64, f64) {
        (
            self.a() * col + self.b() * row + self.c(),
            self.d() * col + self.e() * row + self.f(),
        )
    }
}
