//! Basal resistance laws.
//!
//! Both laws express the basal shear stress as `τ_b = -β(τ_c, v) v` with a drag
//! coefficient `β` computed from the yield stress `τ_c` and the sliding velocity.
//! Newton solvers also need `dβ/dα` where `α = ½ |v|²`.

use crate::config::Config;
use crate::errors::CryoResult;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BasalResistanceLaw {
    /// Purely plastic till: `β = τ_c / sqrt(ε² + |v|²)`.
    Plastic { regularization: f64 },
    /// Pseudo-plastic till: `β = τ_c (ε² + |v|²)^{(q-1)/2} / u_th^q`.
    PseudoPlastic {
        regularization: f64,
        q: f64,
        u_threshold: f64,
    },
}

impl BasalResistanceLaw {
    pub fn from_config(config: &Config) -> CryoResult<Self> {
        let regularization = config.get_number("basal_resistance.plastic.regularization")?;
        if config.get_flag("basal_resistance.pseudo_plastic.enabled")? {
            Ok(BasalResistanceLaw::PseudoPlastic {
                regularization,
                q: config.get_number("basal_resistance.pseudo_plastic.q")?,
                u_threshold: config.get_number("basal_resistance.pseudo_plastic.u_threshold")?,
            })
        } else {
            Ok(BasalResistanceLaw::Plastic { regularization })
        }
    }

    fn regularized_speed_squared(&self, u: f64, v: f64) -> f64 {
        let epsilon = match *self {
            BasalResistanceLaw::Plastic { regularization } => regularization,
            BasalResistanceLaw::PseudoPlastic { regularization, .. } => regularization,
        };
        epsilon * epsilon + u * u + v * v
    }

    /// Drag coefficient `β`.
    pub fn drag(&self, tauc: f64, u: f64, v: f64) -> f64 {
        self.drag_with_derivative(tauc, u, v).0
    }

    /// Drag coefficient and its derivative with respect to `½ |v|²`.
    pub fn drag_with_derivative(&self, tauc: f64, u: f64, v: f64) -> (f64, f64) {
        let magreg2 = self.regularized_speed_squared(u, v);
        match *self {
            BasalResistanceLaw::Plastic { .. } => {
                let drag = tauc / magreg2.sqrt();
                (drag, -drag / magreg2)
            }
            BasalResistanceLaw::PseudoPlastic { q, u_threshold, .. } => {
                let drag = tauc * magreg2.powf(0.5 * (q - 1.0)) * u_threshold.powf(-q);
                (drag, (q - 1.0) * drag / magreg2)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::m_per_year_to_m_per_s;
    use approx::assert_relative_eq;

    fn check_derivative(law: BasalResistanceLaw) {
        let tauc = 1.0e5;
        let (u, v) = (m_per_year_to_m_per_s(120.0), m_per_year_to_m_per_s(-35.0));
        let (_, dd) = law.drag_with_derivative(tauc, u, v);

        // perturb alpha = |v|^2 / 2 by scaling the velocity
        let alpha = 0.5 * (u * u + v * v);
        let h = alpha * 1e-6;
        let scale = |a: f64| (a / alpha).sqrt();
        let plus = law.drag(tauc, u * scale(alpha + h), v * scale(alpha + h));
        let minus = law.drag(tauc, u * scale(alpha - h), v * scale(alpha - h));
        assert_relative_eq!(dd, (plus - minus) / (2.0 * h), max_relative = 1e-5);
    }

    #[test]
    fn test_plastic_drag() {
        let law = BasalResistanceLaw::from_config(&Config::default()).unwrap();
        assert!(matches!(law, BasalResistanceLaw::Plastic { .. }));
        let u = m_per_year_to_m_per_s(100.0);
        // basal stress magnitude is close to the yield stress
        assert_relative_eq!(law.drag(5.0e4, u, 0.0) * u, 5.0e4, max_relative = 1e-6);
        check_derivative(law);
    }

    #[test]
    fn test_pseudo_plastic_drag() {
        let mut config = Config::default();
        config.set_flag("basal_resistance.pseudo_plastic.enabled", true);
        let law = BasalResistanceLaw::from_config(&config).unwrap();
        assert!(matches!(law, BasalResistanceLaw::PseudoPlastic { .. }));

        // at the threshold speed the basal stress equals the yield stress
        let u_th = m_per_year_to_m_per_s(100.0);
        assert_relative_eq!(law.drag(5.0e4, 0.0, u_th) * u_th, 5.0e4, max_relative = 1e-6);
        check_derivative(law);
    }

    #[test]
    fn test_linear_sliding_is_independent_of_speed() {
        let law = BasalResistanceLaw::PseudoPlastic {
            regularization: 0.0,
            q: 1.0,
            u_threshold: 2.0,
        };
        assert_relative_eq!(law.drag(10.0, 1.0, 0.0), 5.0);
        assert_relative_eq!(law.drag(10.0, 3.0, 4.0), 5.0);
        assert_eq!(law.drag_with_derivative(10.0, 3.0, 4.0).1, 0.0);
    }
}
