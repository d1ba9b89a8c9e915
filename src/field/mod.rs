//! Magnetic-field lookup, injected as a strategy.
//!
//! The field is process-wide configuration, not per-particle state.
//! Implementations must be cheap to call (the transport engine samples
//! three points per step) and either stateless or externally synchronized
//! when shared across threads.

/// Conversion constant between momentum, field and curvature:
/// GeV/c per kG per cm.
pub const CLIGHT: f64 = 0.000299792458;

/// Position -> field strategy. Positions in cm, field in kG.
pub trait FieldProvider {
    /// Field vector (Bx, By, Bz) at a point.
    fn field(&self, xyz: &[f64; 3]) -> [f64; 3];
}

/// Constant field, adequate near a vertex where the field is locally smooth.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UniformField {
    pub b: [f64; 3],
}

impl UniformField {
    pub fn new(bx: f64, by: f64, bz: f64) -> Self {
        Self { b: [bx, by, bz] }
    }
}

impl FieldProvider for UniformField {
    #[inline]
    fn field(&self, _xyz: &[f64; 3]) -> [f64; 3] {
        self.b
    }
}

/// No field; charged trajectories degrade to straight lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ZeroField;

impl FieldProvider for ZeroField {
    #[inline]
    fn field(&self, _xyz: &[f64; 3]) -> [f64; 3] {
        [0.0; 3]
    }
}

impl<F: FieldProvider + ?Sized> FieldProvider for &F {
    #[inline]
    fn field(&self, xyz: &[f64; 3]) -> [f64; 3] {
        (**self).field(xyz)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_field_everywhere() {
        let f = UniformField::new(0.0, -5.0, 0.1);
        assert_eq!(f.field(&[0.0, 0.0, 0.0]), [0.0, -5.0, 0.1]);
        assert_eq!(f.field(&[100.0, -3.0, 7.0]), [0.0, -5.0, 0.1]);
    }

    #[test]
    fn test_zero_field() {
        assert_eq!(ZeroField.field(&[1.0, 2.0, 3.0]), [0.0; 3]);
    }
}
