//! Run-time configuration.
//!
//! Parameters are stored as a flat map from dotted keys (`constants.ice.density`,
//! `ocean.pico.number_of_boxes`, ...) to numbers, flags or strings. Nested TOML
//! tables are flattened on load, so
//!
//! ```toml
//! [ocean.pico]
//! number_of_boxes = 3
//! ```
//!
//! sets the key `ocean.pico.number_of_boxes`.
//!
//! Some parameters exist in several variants distinguished by a prefix, for example
//! `sia_flow_law` and `ssa_flow_law`. The `*_prefixed` getters look up `prefix + name`
//! first and fall back to the bare `name`.
//!
//! All values are stored in SI units.

use crate::errors::{CryoError, CryoResult};
use crate::units::SECONDS_PER_YEAR;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A single configuration value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Flag(bool),
    Number(f64),
    Text(String),
}

impl ConfigValue {
    fn type_name(&self) -> &'static str {
        match self {
            ConfigValue::Flag(_) => "flag",
            ConfigValue::Number(_) => "number",
            ConfigValue::Text(_) => "string",
        }
    }
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigValue::Flag(v) => write!(f, "{}", v),
            ConfigValue::Number(v) => write!(f, "{}", v),
            ConfigValue::Text(v) => write!(f, "\"{}\"", v),
        }
    }
}

/// Key-value parameter store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Config {
    values: BTreeMap<String, ConfigValue>,
}

impl Config {
    /// An empty configuration without any defaults.
    pub fn empty() -> Self {
        Self {
            values: BTreeMap::new(),
        }
    }

    /// Default parameters overridden by the contents of a TOML document.
    pub fn from_toml_str(document: &str) -> CryoResult<Self> {
        let mut config = Self::default();
        config.merge_toml_str(document)?;
        Ok(config)
    }

    /// Merge the contents of a TOML document into this configuration.
    ///
    /// Existing keys are overwritten. Arrays and dates are rejected.
    pub fn merge_toml_str(&mut self, document: &str) -> CryoResult<()> {
        let table: toml::Table = document
            .parse()
            .map_err(|e| CryoError::Configuration(format!("failed to parse TOML: {}", e)))?;
        self.merge_table("", &table)
    }

    fn merge_table(&mut self, prefix: &str, table: &toml::Table) -> CryoResult<()> {
        for (key, value) in table {
            let full_key = if prefix.is_empty() {
                key.clone()
            } else {
                format!("{}.{}", prefix, key)
            };
            match value {
                toml::Value::Table(inner) => self.merge_table(&full_key, inner)?,
                toml::Value::Boolean(v) => self.set_flag(&full_key, *v),
                toml::Value::Integer(v) => self.set_number(&full_key, *v as f64),
                toml::Value::Float(v) => self.set_number(&full_key, *v),
                toml::Value::String(v) => self.set_string(&full_key, v),
                other => {
                    return Err(CryoError::Configuration(format!(
                        "parameter {} has unsupported type {}",
                        full_key,
                        other.type_str()
                    )))
                }
            }
        }
        Ok(())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(|k| k.as_str())
    }

    pub fn set_number(&mut self, key: &str, value: f64) {
        self.values
            .insert(key.to_string(), ConfigValue::Number(value));
    }

    pub fn set_flag(&mut self, key: &str, value: bool) {
        self.values.insert(key.to_string(), ConfigValue::Flag(value));
    }

    pub fn set_string(&mut self, key: &str, value: &str) {
        self.values
            .insert(key.to_string(), ConfigValue::Text(value.to_string()));
    }

    fn lookup(&self, key: &str) -> CryoResult<&ConfigValue> {
        self.values
            .get(key)
            .ok_or_else(|| CryoError::Configuration(format!("parameter {} is not set", key)))
    }

    fn wrong_type(key: &str, expected: &str, found: &ConfigValue) -> CryoError {
        CryoError::Configuration(format!(
            "parameter {} should be a {}, found {} {}",
            key,
            expected,
            found.type_name(),
            found
        ))
    }

    pub fn get_number(&self, key: &str) -> CryoResult<f64> {
        match self.lookup(key)? {
            ConfigValue::Number(v) => Ok(*v),
            other => Err(Self::wrong_type(key, "number", other)),
        }
    }

    /// Get a non-negative integer parameter such as a number of boxes.
    pub fn get_count(&self, key: &str) -> CryoResult<usize> {
        let value = self.get_number(key)?;
        if value < 0.0 || value.fract() != 0.0 {
            return Err(CryoError::Configuration(format!(
                "parameter {} should be a non-negative integer, got {}",
                key, value
            )));
        }
        Ok(value as usize)
    }

    pub fn get_flag(&self, key: &str) -> CryoResult<bool> {
        match self.lookup(key)? {
            ConfigValue::Flag(v) => Ok(*v),
            other => Err(Self::wrong_type(key, "flag", other)),
        }
    }

    pub fn get_string(&self, key: &str) -> CryoResult<&str> {
        match self.lookup(key)? {
            ConfigValue::Text(v) => Ok(v.as_str()),
            other => Err(Self::wrong_type(key, "string", other)),
        }
    }

    fn prefixed_key(&self, prefix: &str, name: &str) -> String {
        let key = format!("{}{}", prefix, name);
        if self.contains(&key) {
            key
        } else {
            name.to_string()
        }
    }

    /// Look up `prefix + name`, falling back to `name`.
    pub fn get_number_prefixed(&self, prefix: &str, name: &str) -> CryoResult<f64> {
        self.get_number(&self.prefixed_key(prefix, name))
    }

    /// Look up `prefix + name`, falling back to `name`.
    pub fn get_string_prefixed(&self, prefix: &str, name: &str) -> CryoResult<&str> {
        self.get_string(&self.prefixed_key(prefix, name))
    }
}

impl Default for Config {
    fn default() -> Self {
        let mut c = Self::empty();

        // physical constants
        c.set_number("constants.standard_gravity", 9.81);
        c.set_number("constants.ice.density", 910.0);
        c.set_number("constants.ice.beta_Clausius_Clapeyron", 7.9e-8);
        c.set_number("constants.ice.specific_heat_capacity", 2009.0);
        c.set_number("constants.sea_water.density", 1028.0);
        c.set_number("constants.sea_water.specific_heat_capacity", 3974.0);
        c.set_number("constants.fresh_water.melting_point_temperature", 273.15);
        c.set_number("constants.fresh_water.latent_heat_of_fusion", 3.34e5);
        c.set_number("constants.ideal_gas_constant", 8.31441);
        c.set_number("enthalpy_converter.reference_temperature", 223.15);

        c.set_number("grid.max_stencil_width", 2.0);
        c.set_number("geometry.ice_free_thickness_standard", 0.01);

        // rheology
        c.set_string("sia_flow_law", "gpbld");
        c.set_string("ssa_flow_law", "gpbld");
        c.set_number("sia_Glen_exponent", 3.0);
        c.set_number("ssa_Glen_exponent", 3.0);
        c.set_number("ice_softness", 3.1689e-24);
        c.set_number("flow_law.Schoof_regularizing_velocity", 1.0 / SECONDS_PER_YEAR);
        c.set_number("flow_law.Schoof_regularizing_length", 1000.0e3);
        c.set_number("flow_law.Paterson_Budd.A_cold", 3.61e-13);
        c.set_number("flow_law.Paterson_Budd.A_warm", 1.73e3);
        c.set_number("flow_law.Paterson_Budd.Q_cold", 6.0e4);
        c.set_number("flow_law.Paterson_Budd.Q_warm", 13.9e4);
        c.set_number("flow_law.Paterson_Budd.T_critical", 263.15);
        c.set_number("flow_law.gpbld.water_frac_coeff", 181.25);
        c.set_number("flow_law.gpbld.water_frac_observed_limit", 0.01);
        c.set_number("flow_law.Hooke.A", 4.42165e-9);
        c.set_number("flow_law.Hooke.Q", 7.88e4);
        c.set_number("flow_law.Hooke.C", 0.16612);
        c.set_number("flow_law.Hooke.k", 1.17);
        c.set_number("flow_law.Hooke.Tr", 273.39);

        // basal resistance
        c.set_flag("basal_resistance.pseudo_plastic.enabled", false);
        c.set_number("basal_resistance.pseudo_plastic.q", 0.25);
        c.set_number(
            "basal_resistance.pseudo_plastic.u_threshold",
            100.0 / SECONDS_PER_YEAR,
        );
        c.set_number(
            "basal_resistance.plastic.regularization",
            0.01 / SECONDS_PER_YEAR,
        );
        c.set_number("basal_resistance.beta_ice_free_bedrock", 1.8e9);

        // stress balance
        c.set_string("stress_balance.model", "none");
        c.set_number("ssa.epsilon", 1.0e13);
        c.set_number("ssa.strength_extension.min_thickness", 50.0);
        c.set_number("ssa.strength_extension.constant_nu", 9.48e14);
        c.set_number("ssafem.dirichlet_scale", 1.0);
        c.set_number("ssafem.newton.max_iterations", 50.0);
        c.set_number("ssafem.newton.rtol", 1.0e-8);
        c.set_number("ssafem.newton.stol", 1.0e-10);
        c.set_number("ssafem.ksp.rtol", 1.0e-10);
        c.set_number("ssafem.ksp.restart", 50.0);
        c.set_number("ssafem.ksp.max_iterations", 5000.0);
        c.set_number("inverse.ssa.ksp_rtol", 1.0e-12);
        c.set_string("inverse.design.param", "ident");
        c.set_number("inverse.design.param_hardav_scale", 1.0e8);
        c.set_number("inverse.design.param_exp_eps", 1.0e-5);

        // ocean
        c.set_string("ocean.models", "pico");
        c.set_number("ocean.pico.heat_exchange_coefficent", 2.0e-5);
        c.set_number("ocean.pico.overturning_coefficent", 1.0e6);
        c.set_number("ocean.pico.number_of_boxes", 5.0);
        c.set_number("ocean.pico.number_of_basins", 20.0);
        c.set_number("ocean.pico.continental_shelf_depth", -800.0);
        c.set_flag("ocean.pico.exclude_icerises", true);
        c.set_number("ocean.pik_melt_factor", 5.0e-3);

        c
    }
}
