//! Variable metadata.
//!
//! A [`VariableDefinition`] is the compile-time description of a named quantity
//! (name, units, long name, role). Fields copy it into their per-component
//! [`FieldMetadata`] so that writers can label output without knowing the model.

use serde::{Deserialize, Serialize};

/// Role a variable plays in a model run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VariableKind {
    /// Part of the model state, needed to restart a run.
    ModelState,
    /// Derived quantity, written on request only.
    Diagnostic,
    /// Boundary data read from an input source.
    ClimateForcing,
}

/// Static description of a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VariableDefinition {
    pub name: &'static str,
    pub units: &'static str,
    pub long_name: &'static str,
    pub kind: VariableKind,
}

impl VariableDefinition {
    pub const fn new(
        name: &'static str,
        units: &'static str,
        long_name: &'static str,
        kind: VariableKind,
    ) -> Self {
        Self {
            name,
            units,
            long_name,
            kind,
        }
    }
}

/// Metadata attached to one component of a field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMetadata {
    pub name: String,
    pub long_name: String,
    pub units: String,
    pub kind: VariableKind,
}

impl FieldMetadata {
    pub fn new(name: &str, long_name: &str, units: &str, kind: VariableKind) -> Self {
        Self {
            name: name.to_string(),
            long_name: long_name.to_string(),
            units: units.to_string(),
            kind,
        }
    }

    /// Unnamed metadata for internal work fields.
    pub fn work(name: &str) -> Self {
        Self::new(name, "", "", VariableKind::Diagnostic)
    }
}

impl From<&VariableDefinition> for FieldMetadata {
    fn from(def: &VariableDefinition) -> Self {
        Self::new(def.name, def.long_name, def.units, def.kind)
    }
}

/// Define a `pub const` [`VariableDefinition`].
#[macro_export]
macro_rules! define_variable {
    (
        $var_name:ident,
        name = $name:expr,
        units = $units:expr,
        long_name = $long_name:expr,
        kind = $kind:ident $(,)?
    ) => {
        #[doc = concat!("Definition of `", $name, "`: ", $long_name)]
        pub const $var_name: $crate::variable::VariableDefinition =
            $crate::variable::VariableDefinition::new(
                $name,
                $units,
                $long_name,
                $crate::variable::VariableKind::$kind,
            );
    };
}
