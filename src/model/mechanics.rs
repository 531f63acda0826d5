//! Steady flow: thinning function and vertical velocity.
//!
//! The horizontal flux shape function blends a deformation profile of
//! curvature `p` with a plug (sliding) profile weighted by `s`:
//!
//! ```text
//! omega_D = 1 - (p+2)/(p+1) (1 - zetaie) + (1 - zetaie)^(p+2) / (p+1)
//! omega   = s zetaie + (1 - s) omega_D
//! tau     = (1 - mu) omega + mu,    mu = m / a
//! uz      = -a tau / seconds_per_year
//! ```

use super::physics::SECONDS_PER_YEAR;

/// Shape parameter from its unconstrained transform `p' = ln(1 + p)`.
pub fn shape_from_pprime(pprime: f64) -> f64 {
    pprime.exp() - 1.0
}

/// Flux shape `omega` at each ice-equivalent reduced height.
pub fn flux_shape(zetaie: &[f64], p: f64, sliding: f64) -> Vec<f64> {
    zetaie
        .iter()
        .map(|&z| {
            let depth_frac = 1.0 - z;
            let omega_d = 1.0 - (p + 2.0) / (p + 1.0) * depth_frac
                + depth_frac.powf(p + 2.0) / (p + 1.0);
            sliding * z + (1.0 - sliding) * omega_d
        })
        .collect()
}

/// Velocity state for a given melt rate.
#[derive(Debug, Clone)]
pub struct FlowState {
    pub mu: f64,
    pub tau: Vec<f64>,
    /// Vertical velocity (m/s, negative downwards).
    pub uz: Vec<f64>,
}

impl FlowState {
    pub fn new(omega: &[f64], accumulation: f64, melt: f64) -> Self {
        let mu = melt / accumulation;
        let tau: Vec<f64> = omega.iter().map(|w| (1.0 - mu) * w + mu).collect();
        let uz = tau
            .iter()
            .map(|t| -accumulation / SECONDS_PER_YEAR * t)
            .collect();
        Self { mu, tau, uz }
    }
}
