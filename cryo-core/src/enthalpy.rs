//! Conversion between enthalpy, temperature and water fraction of ice.
//!
//! Enthalpy is measured relative to the reference temperature `T_0`. Below the
//! pressure-melting enthalpy `E_s(p) = c_i (T_m(p) - T_0)` ice is cold and its
//! temperature is `T = T_0 + E / c_i`; above it ice is temperate, sits at the
//! pressure-melting temperature and holds liquid water fraction `(E - E_s) / L`.

use crate::config::Config;
use crate::errors::CryoResult;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnthalpyConverter {
    /// Specific heat capacity of ice (J kg-1 K-1).
    pub c_i: f64,
    /// Latent heat of fusion (J kg-1).
    pub latent_heat: f64,
    /// Reference temperature (K).
    pub t_0: f64,
    /// Melting temperature at atmospheric pressure (K).
    pub t_melting: f64,
    /// Clausius-Clapeyron constant (K Pa-1).
    pub beta: f64,
    pub ice_density: f64,
    pub standard_gravity: f64,
}

impl Default for EnthalpyConverter {
    fn default() -> Self {
        Self {
            c_i: 2009.0,
            latent_heat: 3.34e5,
            t_0: 223.15,
            t_melting: 273.15,
            beta: 7.9e-8,
            ice_density: 910.0,
            standard_gravity: 9.81,
        }
    }
}

impl EnthalpyConverter {
    pub fn from_config(config: &Config) -> CryoResult<Self> {
        Ok(Self {
            c_i: config.get_number("constants.ice.specific_heat_capacity")?,
            latent_heat: config.get_number("constants.fresh_water.latent_heat_of_fusion")?,
            t_0: config.get_number("enthalpy_converter.reference_temperature")?,
            t_melting: config.get_number("constants.fresh_water.melting_point_temperature")?,
            beta: config.get_number("constants.ice.beta_Clausius_Clapeyron")?,
            ice_density: config.get_number("constants.ice.density")?,
            standard_gravity: config.get_number("constants.standard_gravity")?,
        })
    }

    /// Hydrostatic pressure at `depth` below the ice surface.
    pub fn pressure(&self, depth: f64) -> f64 {
        self.ice_density * self.standard_gravity * depth.max(0.0)
    }

    pub fn melting_temperature(&self, pressure: f64) -> f64 {
        self.t_melting - self.beta * pressure
    }

    /// Enthalpy at the cold-temperate transition.
    pub fn enthalpy_cts(&self, pressure: f64) -> f64 {
        self.c_i * (self.melting_temperature(pressure) - self.t_0)
    }

    pub fn is_temperate(&self, enthalpy: f64, pressure: f64) -> bool {
        enthalpy >= self.enthalpy_cts(pressure)
    }

    pub fn temperature(&self, enthalpy: f64, pressure: f64) -> f64 {
        if enthalpy < self.enthalpy_cts(pressure) {
            self.t_0 + enthalpy / self.c_i
        } else {
            self.melting_temperature(pressure)
        }
    }

    /// Temperature relative to the pressure-melting point, shifted to `t_melting`.
    pub fn pressure_adjusted_temperature(&self, enthalpy: f64, pressure: f64) -> f64 {
        self.temperature(enthalpy, pressure) + self.beta * pressure
    }

    pub fn water_fraction(&self, enthalpy: f64, pressure: f64) -> f64 {
        let e_s = self.enthalpy_cts(pressure);
        if enthalpy <= e_s {
            0.0
        } else {
            (enthalpy - e_s) / self.latent_heat
        }
    }

    /// Enthalpy of ice at `temperature` holding `water_fraction`.
    ///
    /// Temperatures above the melting point are treated as temperate ice; the water
    /// fraction is ignored for cold ice.
    pub fn enthalpy(&self, temperature: f64, water_fraction: f64, pressure: f64) -> f64 {
        let t_m = self.melting_temperature(pressure);
        if temperature < t_m {
            self.c_i * (temperature - self.t_0)
        } else {
            self.enthalpy_cts(pressure) + water_fraction * self.latent_heat
        }
    }
}
