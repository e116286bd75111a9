//! Cell classification.
//!
//! Masks are stored in ordinary floating-point fields and read back with
//! [`Field::as_int`](crate::field::Field::as_int) or
//! [`Field::cell_type`](crate::field::Field::cell_type).

use serde::{Deserialize, Serialize};

/// Classification of a grid cell by ice cover and grounding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum CellType {
    Unknown = -1,
    IceFreeBedrock = 0,
    GroundedIce = 2,
    FloatingIce = 3,
    IceFreeOcean = 4,
}

impl CellType {
    pub fn from_int(value: i32) -> Self {
        match value {
            0 => CellType::IceFreeBedrock,
            2 => CellType::GroundedIce,
            3 => CellType::FloatingIce,
            4 => CellType::IceFreeOcean,
            _ => CellType::Unknown,
        }
    }

    /// Value stored in a mask field.
    pub fn value(self) -> f64 {
        self as i32 as f64
    }

    pub fn ice_free(self) -> bool {
        matches!(self, CellType::IceFreeBedrock | CellType::IceFreeOcean)
    }

    pub fn ocean(self) -> bool {
        matches!(self, CellType::FloatingIce | CellType::IceFreeOcean)
    }

    pub fn grounded(self) -> bool {
        matches!(self, CellType::IceFreeBedrock | CellType::GroundedIce)
    }

    pub fn icy(self) -> bool {
        matches!(self, CellType::GroundedIce | CellType::FloatingIce)
    }

    pub fn grounded_ice(self) -> bool {
        self == CellType::GroundedIce
    }

    pub fn floating_ice(self) -> bool {
        self == CellType::FloatingIce
    }

    pub fn ice_free_land(self) -> bool {
        self == CellType::IceFreeBedrock
    }

    pub fn ice_free_ocean(self) -> bool {
        self == CellType::IceFreeOcean
    }
}
