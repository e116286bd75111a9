//! Reading and writing fields.
//!
//! File formats are outside the scope of this crate: models read their inputs through
//! [`FieldSource`] and write through [`FieldSink`]. A named collection of sources
//! (one per input file) is an [`InputFiles`].
//!
//! [`MemoryStore`] keeps complete, globally indexed 2D arrays and implements both
//! traits. It is what the tests and the examples in the documentation use.

use crate::errors::{CryoError, CryoResult};
use crate::field::{Field, Ghosts};
use crate::grid::Grid;
use crate::variable::{FieldMetadata, VariableDefinition};
use ndarray::{Array2, Array3, Axis};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

pub trait FieldSource {
    fn contains(&self, name: &str) -> bool;

    /// Read the scalar variable described by `definition`.
    fn read(&self, grid: &Arc<Grid>, definition: &VariableDefinition, ghosts: Ghosts)
        -> CryoResult<Field>;

    /// Read a two-component field stored as two scalar variables.
    fn read_vector(
        &self,
        grid: &Arc<Grid>,
        name: &str,
        components: [&VariableDefinition; 2],
        ghosts: Ghosts,
    ) -> CryoResult<Field> {
        let u = self.read(grid, components[0], Ghosts::Without)?;
        let v = self.read(grid, components[1], Ghosts::Without)?;
        let mut result = Field::new_vector(grid, name, components, ghosts);
        for (i, j) in grid.points() {
            result.set_k(i, j, 0, u.get(i, j));
            result.set_k(i, j, 1, v.get(i, j));
        }
        result.update_ghosts();
        Ok(result)
    }
}

pub trait FieldSink {
    /// Write every component of `field` under its metadata name. Collective.
    fn write(&mut self, field: &Field) -> CryoResult<()>;
}

/// Input sources keyed by file name.
pub trait InputFiles {
    fn open(&self, path: &str) -> CryoResult<&dyn FieldSource>;
}

/// In-memory store of global 2D arrays indexed `[j, i]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryStore {
    variables: BTreeMap<String, Array2<f64>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, values: Array2<f64>) {
        self.variables.insert(name.to_string(), values);
    }

    /// Builder-style [`MemoryStore::insert`].
    pub fn with(mut self, name: &str, values: Array2<f64>) -> Self {
        self.insert(name, values);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Array2<f64>> {
        self.variables.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.variables.keys().map(|k| k.as_str())
    }
}

impl FieldSource for MemoryStore {
    fn contains(&self, name: &str) -> bool {
        self.variables.contains_key(name)
    }

    fn read(
        &self,
        grid: &Arc<Grid>,
        definition: &VariableDefinition,
        ghosts: Ghosts,
    ) -> CryoResult<Field> {
        let values = self
            .variables
            .get(definition.name)
            .ok_or_else(|| CryoError::MissingField(definition.name.to_string()))?;
        let global: Array3<f64> = values.clone().insert_axis(Axis(2));
        log::debug!("reading {} ({})", definition.name, definition.long_name);
        Field::from_global(
            grid,
            definition.name,
            vec![FieldMetadata::from(definition)],
            ghosts,
            &global,
        )
    }
}

impl FieldSink for MemoryStore {
    fn write(&mut self, field: &Field) -> CryoResult<()> {
        let global = field.gather_global();
        for (k, metadata) in field.metadata().iter().enumerate() {
            self.variables
                .insert(metadata.name.clone(), global.index_axis(Axis(2), k).to_owned());
        }
        Ok(())
    }
}

impl InputFiles for BTreeMap<String, MemoryStore> {
    fn open(&self, path: &str) -> CryoResult<&dyn FieldSource> {
        self.get(path)
            .map(|store| store as &dyn FieldSource)
            .ok_or_else(|| CryoError::Configuration(format!("cannot open input file {}", path)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::standard_variables::{VAR_THICKNESS, VAR_UBAR, VAR_VBAR};
    use ndarray::array;

    #[test]
    fn test_read_missing_variable() {
        let grid = Grid::serial(3, 3, 1.0, 1.0).unwrap();
        let store = MemoryStore::new();
        assert!(matches!(
            store.read(&grid, &VAR_THICKNESS, Ghosts::Without),
            Err(CryoError::MissingField(name)) if name == "land_ice_thickness"
        ));
    }

    #[test]
    fn test_read_checks_shape() {
        let grid = Grid::serial(3, 4, 1.0, 1.0).unwrap();
        let store = MemoryStore::new().with("land_ice_thickness", Array2::zeros((3, 3)));
        assert!(matches!(
            store.read(&grid, &VAR_THICKNESS, Ghosts::Without),
            Err(CryoError::Grid(_))
        ));
    }

    #[test]
    fn test_write_then_read_vector() {
        let grid = Grid::serial(3, 3, 1.0, 1.0).unwrap();
        let store = MemoryStore::new()
            .with("ubar", array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0], [7.0, 8.0, 9.0]])
            .with("vbar", Array2::from_elem((3, 3), -1.0));
        let velocity = store
            .read_vector(&grid, "bar", [&VAR_UBAR, &VAR_VBAR], Ghosts::With(1))
            .unwrap();
        assert_eq!(velocity.vector(2, 1).u, 6.0);
        assert!(velocity.ghosts_fresh());

        let mut output = MemoryStore::new();
        output.write(&velocity).unwrap();
        assert_eq!(output.names().collect::<Vec<_>>(), vec!["ubar", "vbar"]);
        assert_eq!(output.get("ubar"), store.get("ubar"));

        let mut files = BTreeMap::new();
        files.insert("input.nc".to_string(), output);
        assert!(files.open("input.nc").unwrap().contains("vbar"));
        assert!(files.open("other.nc").is_err());
    }
}
