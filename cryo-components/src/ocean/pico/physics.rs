//! Closed-form relations of the box model.
//!
//! Temperatures are in Kelvin, salinities in psu, pressures in dbar and melt
//! rates in m s-1 (ice equivalent). Following Reese et al. (2018) and Olbers &
//! Hellmer (2010), the potential freezing point is linearized as
//!
//! $$ \theta_{pm}(S, p) = a S + b - c p $$
//!
//! and the heat balance of the boundary layer gives
//!
//! $$ m = \frac{\gamma_T}{\nu \lambda} (T - \theta_{pm}) $$
//!
//! with `ν = ρ_i / ρ_sw` and `λ = L / c_p`.

use cryo_core::config::Config;
use cryo_core::errors::CryoResult;
use serde::{Deserialize, Serialize};

/// Linearized potential freezing point coefficients (K/psu, K, K/dbar).
const A_POTENTIAL: f64 = -0.0572;
const B_POTENTIAL: f64 = 0.0788;
const C_POTENTIAL: f64 = 7.77e-4;

/// In-situ freezing point coefficients (K/psu, K, K/dbar).
const A_IN_SITU: f64 = -0.0573;
const B_IN_SITU: f64 = 0.0832;
const C_IN_SITU: f64 = 7.53e-4;

/// Thermal and haline expansion coefficients (1/K, 1/psu).
const ALPHA: f64 = 7.5e-5;
const BETA: f64 = 7.7e-4;

/// Reference density of the equation of state, kg m-3.
const RHO_STAR: f64 = 1033.0;

/// Thermal exchange velocity of the Beckmann-Goosse parameterization, m s-1.
const GAMMA_T_BECKMANN_GOOSSE: f64 = 1.0e-4;

/// Ocean conditions used when a basin has no data on the continental shelf.
const T_DUMMY_CELSIUS: f64 = -1.5;
const S_DUMMY: f64 = 34.7;

/// Temperature of the grounding line box, as returned by
/// [`PicoPhysics::toc_box1`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoxOneTemperature {
    pub value: f64,
    /// The square root argument was negative and has been set to zero.
    pub failed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PicoPhysics {
    /// Heat exchange coefficient `γ_T`, m s-1.
    pub gamma_t: f64,
    /// Overturning coefficient `C`, m6 s-1 kg-1.
    pub overturning_coefficient: f64,
    /// Beckmann-Goosse melt factor.
    pub melt_factor: f64,
    /// Bed elevation separating the continental shelf from the deep ocean, m.
    pub continental_shelf_depth: f64,
    pub ice_density: f64,
    pub sea_water_density: f64,
    pub standard_gravity: f64,
    pub latent_heat: f64,
    /// Specific heat capacity of the ocean mixed layer, J kg-1 K-1.
    pub heat_capacity: f64,
    pub melting_point_temperature: f64,
    pub beta_clausius_clapeyron: f64,
}

impl PicoPhysics {
    pub fn from_config(config: &Config) -> CryoResult<Self> {
        Ok(Self {
            gamma_t: config.get_number("ocean.pico.heat_exchange_coefficent")?,
            overturning_coefficient: config.get_number("ocean.pico.overturning_coefficent")?,
            melt_factor: config.get_number("ocean.pik_melt_factor")?,
            continental_shelf_depth: config.get_number("ocean.pico.continental_shelf_depth")?,
            ice_density: config.get_number("constants.ice.density")?,
            sea_water_density: config.get_number("constants.sea_water.density")?,
            standard_gravity: config.get_number("constants.standard_gravity")?,
            latent_heat: config.get_number("constants.fresh_water.latent_heat_of_fusion")?,
            heat_capacity: config.get_number("constants.sea_water.specific_heat_capacity")?,
            melting_point_temperature: config
                .get_number("constants.fresh_water.melting_point_temperature")?,
            beta_clausius_clapeyron: config.get_number("constants.ice.beta_Clausius_Clapeyron")?,
        })
    }

    pub fn t_dummy(&self) -> f64 {
        self.melting_point_temperature + T_DUMMY_CELSIUS
    }

    pub fn s_dummy(&self) -> f64 {
        S_DUMMY
    }

    /// `ν λ`, in K.
    fn nu_lambda(&self) -> f64 {
        (self.ice_density / self.sea_water_density) * (self.latent_heat / self.heat_capacity)
    }

    /// Pressure at the base of ice of the given thickness, in dbar.
    pub fn pressure(&self, ice_thickness: f64) -> f64 {
        self.ice_density * self.standard_gravity * ice_thickness * 1.0e-4
    }

    /// Potential pressure melting temperature.
    pub fn theta_pm(&self, salinity: f64, pressure: f64) -> f64 {
        A_POTENTIAL * salinity + B_POTENTIAL + self.melting_point_temperature - C_POTENTIAL * pressure
    }

    /// In-situ pressure melting temperature.
    pub fn t_pm(&self, salinity: f64, pressure: f64) -> f64 {
        A_IN_SITU * salinity + B_IN_SITU + self.melting_point_temperature - C_IN_SITU * pressure
    }

    /// `T* = θ_pm(S, p) - T`, negative when the water is above freezing.
    pub fn t_star(&self, salinity: f64, temperature: f64, pressure: f64) -> f64 {
        self.theta_pm(salinity, pressure) - temperature
    }

    /// Temperature in box 1 of a shelf whose box 1 covers `area` (m2).
    ///
    /// Solves the quadratic obtained by combining the melt rate with the
    /// overturning relation. A negative discriminant (possible only for
    /// `T* > p / 4`, i.e. input water close to freezing) is clamped to zero.
    pub fn toc_box1(&self, area: f64, t_star: f64, soc_box0: f64, toc_box0: f64) -> BoxOneTemperature {
        let g1 = area * self.gamma_t;
        let s1 = soc_box0 / self.nu_lambda();
        let p = g1 / (self.overturning_coefficient * RHO_STAR * (BETA * s1 - ALPHA));

        let mut r = 0.25 * p * p - p * t_star;
        let failed = r < 0.0;
        if failed {
            r = 0.0;
        }
        let x = -0.5 * p + r.sqrt();
        BoxOneTemperature {
            value: toc_box0 - x,
            failed,
        }
    }

    /// Salinity in box 1.
    pub fn soc_box1(&self, toc_box0: f64, soc_box0: f64, toc: f64) -> f64 {
        soc_box0 - (soc_box0 / self.nu_lambda()) * (toc_box0 - toc)
    }

    /// Temperature in a box other than box 1, given the averages of the
    /// previous box and the box 1 overturning.
    pub fn toc(&self, box_area: f64, temperature: f64, t_star: f64, overturning: f64, salinity: f64) -> f64 {
        let g1 = box_area * self.gamma_t;
        let g2 = g1 / self.nu_lambda();
        temperature + g1 * t_star / (overturning + g1 - g2 * A_POTENTIAL * salinity)
    }

    pub fn soc(&self, salinity: f64, temperature: f64, toc: f64) -> f64 {
        salinity - salinity * (temperature - toc) / self.nu_lambda()
    }

    /// Overturning flux, m3 s-1.
    pub fn overturning(&self, soc_box0: f64, soc: f64, toc_box0: f64, toc: f64) -> f64 {
        self.overturning_coefficient
            * RHO_STAR
            * (BETA * (soc_box0 - soc) - ALPHA * (toc_box0 - toc))
    }

    /// Melt rate for water at `toc` against ice at the potential freezing point
    /// `theta_pm`, m s-1.
    pub fn melt_rate(&self, theta_pm: f64, toc: f64) -> f64 {
        self.gamma_t / self.nu_lambda() * (toc - theta_pm)
    }

    /// Beckmann & Goosse (2003) melt rate, m s-1.
    pub fn melt_rate_beckmann_goosse(&self, theta_pm: f64, toc: f64) -> f64 {
        let heat_flux = self.melt_factor
            * self.sea_water_density
            * self.heat_capacity
            * GAMMA_T_BECKMANN_GOOSSE
            * (toc - theta_pm);
        heat_flux / (self.latent_heat * self.ice_density)
    }
}
