//! Name-based construction of flow laws.

use super::{
    FlowLaw, ICE_ARR, ICE_ARRWARM, ICE_GOLDSBY_KOHLSTEDT, ICE_GPBLD, ICE_HOOKE,
    ICE_ISOTHERMAL_GLEN, ICE_PB,
};
use crate::config::Config;
use crate::enthalpy::EnthalpyConverter;
use crate::errors::{CryoError, CryoResult};
use std::collections::BTreeMap;

/// Builds a flow law from a parameter prefix, the configuration and an enthalpy
/// converter.
pub type FlowLawCreator = fn(&str, &Config, &EnthalpyConverter) -> CryoResult<FlowLaw>;

fn create_isothermal_glen(prefix: &str, config: &Config, ec: &EnthalpyConverter) -> CryoResult<FlowLaw> {
    FlowLaw::from_config(ICE_ISOTHERMAL_GLEN, prefix, config, ec)
}

fn create_pb(prefix: &str, config: &Config, ec: &EnthalpyConverter) -> CryoResult<FlowLaw> {
    FlowLaw::from_config(ICE_PB, prefix, config, ec)
}

fn create_gpbld(prefix: &str, config: &Config, ec: &EnthalpyConverter) -> CryoResult<FlowLaw> {
    FlowLaw::from_config(ICE_GPBLD, prefix, config, ec)
}

fn create_hooke(prefix: &str, config: &Config, ec: &EnthalpyConverter) -> CryoResult<FlowLaw> {
    FlowLaw::from_config(ICE_HOOKE, prefix, config, ec)
}

fn create_arr(prefix: &str, config: &Config, ec: &EnthalpyConverter) -> CryoResult<FlowLaw> {
    FlowLaw::from_config(ICE_ARR, prefix, config, ec)
}

fn create_arrwarm(prefix: &str, config: &Config, ec: &EnthalpyConverter) -> CryoResult<FlowLaw> {
    FlowLaw::from_config(ICE_ARRWARM, prefix, config, ec)
}

fn create_goldsby_kohlstedt(
    prefix: &str,
    config: &Config,
    ec: &EnthalpyConverter,
) -> CryoResult<FlowLaw> {
    FlowLaw::from_config(ICE_GOLDSBY_KOHLSTEDT, prefix, config, ec)
}

/// Registry of flow law constructors with a selected default.
///
/// The registry starts with every built-in law and selects the one named by
/// `<prefix>flow_law`. Entries can be added or removed at run time.
#[derive(Clone)]
pub struct FlowLawFactory {
    prefix: String,
    config: Config,
    ec: EnthalpyConverter,
    flow_laws: BTreeMap<String, FlowLawCreator>,
    type_name: String,
}

impl FlowLawFactory {
    pub fn new(prefix: &str, config: &Config, ec: &EnthalpyConverter) -> CryoResult<Self> {
        let mut factory = Self {
            prefix: prefix.to_string(),
            config: config.clone(),
            ec: *ec,
            flow_laws: BTreeMap::new(),
            type_name: String::new(),
        };

        factory.add_type(ICE_ISOTHERMAL_GLEN, create_isothermal_glen);
        factory.add_type(ICE_PB, create_pb);
        factory.add_type(ICE_GPBLD, create_gpbld);
        factory.add_type(ICE_HOOKE, create_hooke);
        factory.add_type(ICE_ARR, create_arr);
        factory.add_type(ICE_ARRWARM, create_arrwarm);
        factory.add_type(ICE_GOLDSBY_KOHLSTEDT, create_goldsby_kohlstedt);

        let selected = config.get_string(&format!("{}flow_law", prefix))?.to_string();
        factory.set_default_type(&selected)?;
        Ok(factory)
    }

    pub fn add_type(&mut self, name: &str, creator: FlowLawCreator) {
        self.flow_laws.insert(name.to_string(), creator);
    }

    pub fn remove_type(&mut self, name: &str) {
        self.flow_laws.remove(name);
    }

    pub fn set_default_type(&mut self, name: &str) -> CryoResult<()> {
        if !self.flow_laws.contains_key(name) {
            return Err(CryoError::Configuration(format!(
                "Selected ice flow law \"{}\" is not available (prefix=\"{}\").",
                name, self.prefix
            )));
        }
        self.type_name = name.to_string();
        Ok(())
    }

    pub fn default_type(&self) -> &str {
        &self.type_name
    }

    pub fn types(&self) -> impl Iterator<Item = &str> {
        self.flow_laws.keys().map(|k| k.as_str())
    }

    /// Create an instance of the selected flow law.
    pub fn create(&self) -> CryoResult<FlowLaw> {
        // the selected type may have been removed since it was selected
        let creator = self.flow_laws.get(&self.type_name).ok_or_else(|| {
            CryoError::Configuration(format!(
                "Selected ice flow law \"{}\" is not available (prefix=\"{}\").",
                self.type_name, self.prefix
            ))
        })?;
        let law = creator(&self.prefix, &self.config, &self.ec)?;
        log::debug!("created flow law {} (prefix={})", law.name(), self.prefix);
        Ok(law)
    }
}

impl std::fmt::Debug for FlowLawFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowLawFactory")
            .field("prefix", &self.prefix)
            .field("types", &self.flow_laws.keys().collect::<Vec<_>>())
            .field("type_name", &self.type_name)
            .finish()
    }
}

/// Create the flow law selected by `<prefix>flow_law`.
pub fn create_flow_law(prefix: &str, config: &Config, ec: &EnthalpyConverter) -> CryoResult<FlowLaw> {
    FlowLawFactory::new(prefix, config, ec)?.create()
}
