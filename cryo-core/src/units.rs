//! Unit conversion constants.
//!
//! Everything inside the crate is SI. These are used at the edges, when
//! parameters are specified in glaciological units.

/// Seconds in a (mean Gregorian) year.
pub const SECONDS_PER_YEAR: f64 = 3.15569259747e7;

/// Convert a speed in m/year to m/s.
pub fn m_per_year_to_m_per_s(value: f64) -> f64 {
    value / SECONDS_PER_YEAR
}

/// Convert a speed in m/s to m/year.
pub fn m_per_s_to_m_per_year(value: f64) -> f64 {
    value * SECONDS_PER_YEAR
}
