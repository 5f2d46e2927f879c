//! Unit conversions between the engineering units used to describe a model
//! and the SI values the solvers run on.

use crate::constants::{KM, MIO, MPA, SECONDS_PER_YEAR, TO_KELVIN};

/// Converts Celsius to Kelvin.
pub fn celsius_to_kelvin(temp_c: f64) -> f64 {
    temp_c + TO_KELVIN
}

/// Converts Kelvin to Celsius.
pub fn kelvin_to_celsius(temp_k: f64) -> f64 {
    temp_k - TO_KELVIN
}

pub fn years_to_seconds(years: f64) -> f64 {
    years * SECONDS_PER_YEAR
}

pub fn seconds_to_years(seconds: f64) -> f64 {
    seconds / SECONDS_PER_YEAR
}

pub fn myr_to_seconds(myr: f64) -> f64 {
    years_to_seconds(myr * MIO)
}

pub fn seconds_to_myr(seconds: f64) -> f64 {
    seconds_to_years(seconds) / MIO
}

/// Plate velocity in cm/yr to m/s.
///
/// # Examples
/// ```
/// use litho_rift_rust::temp_utils::{cm_per_year_to_m_per_s, m_per_s_to_cm_per_year};
///
/// let v = cm_per_year_to_m_per_s(1.1355);
/// assert!((m_per_s_to_cm_per_year(v) - 1.1355).abs() < 1e-12);
/// ```
pub fn cm_per_year_to_m_per_s(cm_per_year: f64) -> f64 {
    cm_per_year * 0.01 / SECONDS_PER_YEAR
}

pub fn m_per_s_to_cm_per_year(m_per_s: f64) -> f64 {
    m_per_s * SECONDS_PER_YEAR * 100.0
}

pub fn km_to_m(km: f64) -> f64 {
    km * KM
}

pub fn mpa_to_pa(mpa: f64) -> f64 {
    mpa * MPA
}
