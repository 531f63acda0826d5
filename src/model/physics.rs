//! Material properties of ice and physical constants.
//!
//! Temperatures are in kelvin, pressures in pascal, fluxes in W/m².
//! Rates handed in by callers (accumulation, melt) are in metres of ice per year;
//! conversion to SI seconds goes through [`SECONDS_PER_YEAR`].

/// Thermal conductivity prefactor (W/m/K).
pub const KG0: f64 = 9.828;
/// Thermal conductivity temperature coefficient (1/K).
pub const KG1: f64 = -5.7e-3;
/// Latent heat of fusion of ice (J/kg).
pub const LATENT_HEAT: f64 = 333.5e3;
/// Density of ice (kg/m³).
pub const RHO_ICE: f64 = 917.0;
/// Specific heat capacity intercept (J/kg/K).
pub const CG0: f64 = 152.5;
/// Specific heat capacity slope (J/kg/K²).
pub const CG1: f64 = 7.122;
/// Gravitational acceleration (m/s²).
pub const GRAVITY: f64 = 9.81;
/// Melting point at zero overburden (K).
pub const TF0: f64 = 273.16 - 0.024;
/// Pressure dependence of the melting point (K/Pa).
pub const TF1: f64 = -7.4e-8;
/// Tropical year in seconds.
pub const SECONDS_PER_YEAR: f64 = 365.242 * 24.0 * 3600.0;

/// Specific heat capacity of ice at temperature `t`.
pub fn heat_capacity(t: f64) -> f64 {
    CG0 + CG1 * t
}

/// Conductivity of ice at temperature `t`, scaled by the relative density `d`.
///
/// `d` is the ratio of ice-equivalent to real depth increments (1 for pure ice,
/// below 1 in firn); the `2d/(3-d)` factor reduces conductivity in porous firn.
pub fn conductivity(t: f64, d: f64) -> f64 {
    2.0 * KG0 * (KG1 * t).exp() * d / (3.0 - d)
}

/// Pressure-melting point at overburden `pressure`.
pub fn melting_point(pressure: f64) -> f64 {
    TF0 + TF1 * pressure
}

/// Melting point at the base of an ice column of ice-equivalent thickness `thkie`.
pub fn basal_melting_point(thkie: f64) -> f64 {
    melting_point(RHO_ICE * GRAVITY * thkie)
}

/// Basal melt rate (m ice/yr) released by a flux imbalance `g0 - conducted` (W/m²).
pub fn melt_rate(g0: f64, conducted: f64) -> f64 {
    (g0 - conducted) * SECONDS_PER_YEAR / RHO_ICE / LATENT_HEAT
}
