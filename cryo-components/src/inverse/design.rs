//! Maps between the design variable `ζ` of an inversion and the physical
//! coefficient it controls (here the vertically averaged hardness).
//!
//! Every parameterization is monotonic and differentiable:
//!
//! | name     | `d(ζ)`       | `d'(ζ)`      |
//! |----------|--------------|--------------|
//! | `ident`  | `s ζ`        | `s`          |
//! | `square` | `s ζ²`       | `2 s ζ`      |
//! | `exp`    | `s exp(ζ)`   | `s exp(ζ)`   |

use cryo_core::config::Config;
use cryo_core::errors::{CryoError, CryoResult};
use cryo_core::field::Field;
use serde::{Deserialize, Serialize};

pub const PARAM_IDENT: &str = "ident";
pub const PARAM_SQUARE: &str = "square";
pub const PARAM_EXP: &str = "exp";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DesignVariableParameterization {
    Identity { scale: f64 },
    Square { scale: f64 },
    /// `epsilon` bounds the physical value from below when inverting.
    Exp { scale: f64, epsilon: f64 },
}

impl DesignVariableParameterization {
    /// Select `inverse.design.param` with the scale
    /// `inverse.design.param_<variable>_scale`.
    pub fn from_config(config: &Config, variable: &str) -> CryoResult<Self> {
        let scale = config.get_number(&format!("inverse.design.param_{}_scale", variable))?;
        let name = config.get_string("inverse.design.param")?;
        match name {
            PARAM_IDENT => Ok(Self::Identity { scale }),
            PARAM_SQUARE => Ok(Self::Square { scale }),
            PARAM_EXP => Ok(Self::Exp {
                scale,
                epsilon: config.get_number("inverse.design.param_exp_eps")?,
            }),
            other => Err(CryoError::Configuration(format!(
                "design variable parameterization \"{}\" is not available",
                other
            ))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Identity { .. } => PARAM_IDENT,
            Self::Square { .. } => PARAM_SQUARE,
            Self::Exp { .. } => PARAM_EXP,
        }
    }

    pub fn value(&self, zeta: f64) -> f64 {
        self.value_with_derivative(zeta).0
    }

    /// Physical value and its derivative with respect to `ζ`.
    pub fn value_with_derivative(&self, zeta: f64) -> (f64, f64) {
        match *self {
            Self::Identity { scale } => (scale * zeta, scale),
            Self::Square { scale } => (scale * zeta * zeta, 2.0 * scale * zeta),
            Self::Exp { scale, .. } => {
                let value = scale * zeta.exp();
                (value, value)
            }
        }
    }

    /// The design variable corresponding to the physical value `d`.
    ///
    /// Non-positive values map to `ζ = 0` for `square`, and values below
    /// `epsilon` are raised to it for `exp`.
    pub fn design(&self, d: f64) -> f64 {
        match *self {
            Self::Identity { scale } => d / scale,
            Self::Square { scale } => {
                if d > 0.0 {
                    (d / scale).sqrt()
                } else {
                    0.0
                }
            }
            Self::Exp { scale, epsilon } => (d.max(epsilon) / scale).ln(),
        }
    }

    /// Physical values of `zeta` at the owned points of `result`. Ghosts of
    /// `result` are refreshed. Collective.
    pub fn convert_to_physical(&self, zeta: &Field, result: &mut Field) -> CryoResult<()> {
        zeta.check_dof(1)?;
        result.check_dof(1)?;
        let grid = zeta.grid().clone();
        for (i, j) in grid.points() {
            result.set(i, j, self.value(zeta.get(i, j)));
        }
        result.update_ghosts();
        Ok(())
    }

    /// Design variable for the physical values in `d`. Collective.
    pub fn convert_to_design(&self, d: &Field, zeta: &mut Field) -> CryoResult<()> {
        d.check_dof(1)?;
        zeta.check_dof(1)?;
        let grid = d.grid().clone();
        for (i, j) in grid.points() {
            zeta.set(i, j, self.design(d.get(i, j)));
        }
        zeta.update_ghosts();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use cryo_core::field::Ghosts;
    use cryo_core::grid::Grid;
    use cryo_core::standard_variables::VAR_HARDAV;

    fn all() -> [DesignVariableParameterization; 3] {
        [
            DesignVariableParameterization::Identity { scale: 1.0e8 },
            DesignVariableParameterization::Square { scale: 1.0e8 },
            DesignVariableParameterization::Exp {
                scale: 1.0e8,
                epsilon: 1.0e-5,
            },
        ]
    }

    #[test]
    fn test_derivatives_match_finite_differences() {
        let h = 1.0e-6;
        for p in all() {
            for zeta in [0.3, 1.0, 1.7] {
                let (_, derivative) = p.value_with_derivative(zeta);
                let fd = (p.value(zeta + h) - p.value(zeta - h)) / (2.0 * h);
                assert_relative_eq!(derivative, fd, max_relative = 1e-6);
            }
        }
    }

    #[test]
    fn test_design_inverts_value() {
        for p in all() {
            let zeta = 1.25;
            assert_relative_eq!(p.design(p.value(zeta)), zeta, max_relative = 1e-12);
        }
        let square = DesignVariableParameterization::Square { scale: 2.0 };
        assert_eq!(square.design(-4.0), 0.0);
        let exp = DesignVariableParameterization::Exp {
            scale: 1.0,
            epsilon: 1.0e-5,
        };
        assert_relative_eq!(exp.design(0.0), 1.0e-5_f64.ln());
    }

    #[test]
    fn test_from_config() {
        let mut config = Config::default();
        assert_eq!(
            DesignVariableParameterization::from_config(&config, "hardav").unwrap(),
            DesignVariableParameterization::Identity { scale: 1.0e8 }
        );

        config.set_string("inverse.design.param", "exp");
        let p = DesignVariableParameterization::from_config(&config, "hardav").unwrap();
        assert_eq!(p.name(), "exp");

        config.set_string("inverse.design.param", "tiktok");
        assert!(matches!(
            DesignVariableParameterization::from_config(&config, "hardav"),
            Err(CryoError::Configuration(_))
        ));
        assert!(DesignVariableParameterization::from_config(&Config::default(), "tauc").is_err());
    }

    #[test]
    fn test_field_conversion() {
        let grid = Grid::serial(3, 3, 1.0, 1.0).unwrap();
        let p = DesignVariableParameterization::Square { scale: 1.0e8 };
        let mut zeta = Field::work(&grid, "zeta", 1, Ghosts::Without);
        zeta.fill(2.0);
        let mut hardness = Field::scalar(&grid, &VAR_HARDAV, Ghosts::With(1));
        p.convert_to_physical(&zeta, &mut hardness).unwrap();
        assert_eq!(hardness.get(1, 1), 4.0e8);
        assert!(hardness.ghosts_fresh());

        let mut back = Field::work(&grid, "zeta", 1, Ghosts::Without);
        p.convert_to_design(&hardness, &mut back).unwrap();
        assert_relative_eq!(back.get(2, 0), 2.0);
    }
}
