//! Dimensionless vertical grid and per-column geometry.
//!
//! `zeta` runs from 1 at the surface to 0 at the bed with a uniform step, so
//! index 0 is the surface node and the last index is the bed node. Every
//! column shares the same `zeta` nodes; depths scale with local thickness.

use crate::agescale::ReferenceAgeScale;
use crate::error::AppError;

/// Shared, reversed-order `zeta` grid.
#[derive(Debug, Clone)]
pub struct DepthGrid {
    dzeta: f64,
    zeta: Vec<f64>,
}

impl DepthGrid {
    /// Uniform grid with step `dzeta`; `1/dzeta` must be (close to) an integer.
    pub fn new(dzeta: f64) -> Result<Self, AppError> {
        if !dzeta.is_finite() || dzeta <= 0.0 || dzeta >= 1.0 {
            return Err(AppError::input(format!(
                "dzeta must lie in (0, 1), got {dzeta}."
            )));
        }
        let intervals = (1.0 / dzeta).round();
        if ((intervals * dzeta) - 1.0).abs() > 1e-6 {
            return Err(AppError::input(format!(
                "dzeta = {dzeta} does not divide the unit interval evenly."
            )));
        }
        let intervals = intervals as usize;
        if intervals < 3 {
            return Err(AppError::input(
                "dzeta is too coarse: the thermal solve needs at least two interior nodes.",
            ));
        }
        let zeta: Vec<f64> = (0..=intervals)
            .map(|i| 1.0 - i as f64 / intervals as f64)
            .collect();
        Ok(Self {
            dzeta: 1.0 / intervals as f64,
            zeta,
        })
    }

    pub fn dzeta(&self) -> f64 {
        self.dzeta
    }

    pub fn zeta(&self) -> &[f64] {
        &self.zeta
    }

    pub fn len(&self) -> usize {
        self.zeta.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zeta.is_empty()
    }
}

/// Depth coordinates of one column of thickness `thk`.
#[derive(Debug, Clone)]
pub struct ColumnGeometry {
    pub thk: f64,
    pub thkie: f64,
    pub dzeta: f64,
    pub zeta: Vec<f64>,
    pub depth: Vec<f64>,
    pub depthie: Vec<f64>,
    pub zetaie: Vec<f64>,
    /// Relative density of each layer `[i, i+1]` (length `n - 1`).
    pub density: Vec<f64>,
}

impl ColumnGeometry {
    pub fn new(grid: &DepthGrid, thk: f64, scale: &ReferenceAgeScale) -> Result<Self, AppError> {
        if !thk.is_finite() || thk <= 0.0 {
            return Err(AppError::input(format!(
                "Column thickness must be finite and positive, got {thk}."
            )));
        }
        let thkie = scale.depth_to_iedepth(thk);
        if !thkie.is_finite() || thkie <= 0.0 {
            return Err(AppError::input(format!(
                "Thickness {thk} m has no ice-equivalent counterpart in the reference scale."
            )));
        }

        let zeta = grid.zeta().to_vec();
        let depth: Vec<f64> = zeta.iter().map(|z| thk * (1.0 - z)).collect();
        let depthie: Vec<f64> = depth.iter().map(|&d| scale.depth_to_iedepth(d)).collect();
        if depthie.iter().any(|d| !d.is_finite()) {
            return Err(AppError::input(
                "Reference scale does not cover the column's depth range.",
            ));
        }
        let zetaie: Vec<f64> = depthie.iter().map(|d| (thkie - d) / thkie).collect();
        let density: Vec<f64> = (0..depth.len() - 1)
            .map(|i| (depthie[i + 1] - depthie[i]) / (depth[i + 1] - depth[i]))
            .collect();

        Ok(Self {
            thk,
            thkie,
            dzeta: grid.dzeta(),
            zeta,
            depth,
            depthie,
            zetaie,
            density,
        })
    }

    pub fn len(&self) -> usize {
        self.depth.len()
    }

    pub fn is_empty(&self) -> bool {
        self.depth.is_empty()
    }

    /// Real-depth grid spacing.
    pub fn step(&self) -> f64 {
        self.dzeta * self.thk
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agescale::ReferenceSample;

    fn firn_scale() -> ReferenceAgeScale {
        // 10 m of firn deficit accumulated over the top 100 m, pure ice below.
        let rows = [
            (0.0, 0.0),
            (50.0, 44.0),
            (100.0, 90.0),
            (1000.0, 990.0),
            (4000.0, 3990.0),
        ];
        let samples: Vec<ReferenceSample> = rows
            .iter()
            .enumerate()
            .map(|(i, &(depth, iedepth))| ReferenceSample {
                depth,
                iedepth,
                accumulation: 0.03,
                age: i as f64 * 1000.0,
                sigma_age: 1.0,
            })
            .collect();
        ReferenceAgeScale::new(&samples).unwrap()
    }

    #[test]
    fn zeta_runs_from_surface_to_bed() {
        let grid = DepthGrid::new(0.01).unwrap();
        assert_eq!(grid.len(), 101);
        assert_eq!(grid.zeta()[0], 1.0);
        assert_eq!(*grid.zeta().last().unwrap(), 0.0);
        assert!(grid.zeta().windows(2).all(|w| w[1] < w[0]));
    }

    #[test]
    fn rejects_uneven_or_coarse_steps() {
        assert!(DepthGrid::new(0.3).is_err());
        assert!(DepthGrid::new(0.5).is_err());
        assert!(DepthGrid::new(0.0).is_err());
        assert!(DepthGrid::new(1.0).is_err());
    }

    #[test]
    fn depth_grows_from_surface_to_bed() {
        let grid = DepthGrid::new(0.02).unwrap();
        let col = ColumnGeometry::new(&grid, 2500.0, &firn_scale()).unwrap();
        assert_eq!(col.depth[0], 0.0);
        assert!((col.depth.last().unwrap() - 2500.0).abs() < 1e-9);
        // Increasing zeta (walking the grid backwards) means decreasing depth.
        assert!(col.depth.windows(2).all(|w| w[1] > w[0]));
        assert!(col.depthie.windows(2).all(|w| w[1] > w[0]));
        assert!((col.zetaie[0] - 1.0).abs() < 1e-12);
        assert!(col.zetaie.last().unwrap().abs() < 1e-12);
    }

    #[test]
    fn relative_density_is_below_one_in_firn_only() {
        let grid = DepthGrid::new(0.02).unwrap();
        let col = ColumnGeometry::new(&grid, 2500.0, &firn_scale()).unwrap();
        assert!(col.density[0] < 1.0);
        assert!((col.density.last().unwrap() - 1.0).abs() < 1e-9);
        assert!((col.thkie - 2490.0).abs() < 1e-9);
    }

    #[test]
    fn rejects_missing_thickness() {
        let grid = DepthGrid::new(0.1).unwrap();
        assert!(ColumnGeometry::new(&grid, f64::NAN, &firn_scale()).is_err());
        assert!(ColumnGeometry::new(&grid, 0.0, &firn_scale()).is_err());
    }
}
