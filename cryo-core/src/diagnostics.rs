//! On-demand diagnostic quantities.
//!
//! A model exposes its diagnostics as a [`DiagnosticRegistry`]: a name-keyed set of
//! [`Diagnostic`]s that borrow the model. Computing a diagnostic never changes the
//! model and allocates a new field on every call.

use crate::errors::CryoResult;
use crate::field::Field;
use crate::variable::FieldMetadata;
use std::collections::BTreeMap;

pub trait Diagnostic {
    /// Metadata of each component of the computed field.
    fn metadata(&self) -> Vec<FieldMetadata>;

    fn compute(&self) -> CryoResult<Field>;
}

/// Diagnostics keyed by name.
pub struct DiagnosticRegistry<'a> {
    entries: BTreeMap<String, Box<dyn Diagnostic + 'a>>,
}

impl<'a> DiagnosticRegistry<'a> {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, name: &str, diagnostic: Box<dyn Diagnostic + 'a>) {
        self.entries.insert(name.to_string(), diagnostic);
    }

    /// Add all entries of `other`, replacing entries with the same name.
    pub fn extend(&mut self, other: DiagnosticRegistry<'a>) {
        self.entries.extend(other.entries);
    }

    pub fn get(&self, name: &str) -> Option<&(dyn Diagnostic + 'a)> {
        self.entries.get(name).map(|d| d.as_ref())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(|k| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Compute the diagnostic called `name`, if registered.
    pub fn compute(&self, name: &str) -> Option<CryoResult<Field>> {
        self.get(name).map(|d| d.compute())
    }
}

impl Default for DiagnosticRegistry<'_> {
    fn default() -> Self {
        Self::new()
    }
}

/// Exposes a copy of a model field.
pub struct FieldDiagnostic<'a> {
    field: &'a Field,
}

impl<'a> FieldDiagnostic<'a> {
    pub fn new(field: &'a Field) -> Self {
        Self { field }
    }

    /// Boxed, ready for [`DiagnosticRegistry::insert`].
    pub fn boxed(field: &'a Field) -> Box<dyn Diagnostic + 'a> {
        Box::new(Self::new(field))
    }
}

impl Diagnostic for FieldDiagnostic<'_> {
    fn metadata(&self) -> Vec<FieldMetadata> {
        self.field.metadata().to_vec()
    }

    fn compute(&self) -> CryoResult<Field> {
        Ok(self.field.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::Ghosts;
    use crate::grid::Grid;
    use crate::standard_variables::VAR_THICKNESS;

    #[test]
    fn test_field_diagnostic_returns_fresh_copy() {
        let grid = Grid::serial(3, 3, 1.0, 1.0).unwrap();
        let mut thickness = Field::scalar(&grid, &VAR_THICKNESS, Ghosts::Without);
        thickness.fill(100.0);

        let mut registry = DiagnosticRegistry::new();
        registry.insert("thk", FieldDiagnostic::boxed(&thickness));
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["thk"]);
        assert_eq!(registry.get("thk").unwrap().metadata()[0].units, "m");

        let mut first = registry.compute("thk").unwrap().unwrap();
        first.set(1, 1, 0.0);
        let second = registry.compute("thk").unwrap().unwrap();
        assert_eq!(second.get(1, 1), 100.0);
        assert!(registry.compute("velbar").is_none());
    }
}
