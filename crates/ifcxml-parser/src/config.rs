// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Ingestion configuration
//!
//! Values come from defaults, a JSON file or `IFCXML_*` environment
//! variables, and can be adjusted with the builder methods.

use ifcxml_model::{IfcVersion, Result, SchemaLocator};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

pub const ENV_XSD_DIR: &str = "IFCXML_XSD_DIR";
pub const ENV_XSD_IFC2X3: &str = "IFCXML_XSD_IFC2X3";
pub const ENV_XSD_IFC4: &str = "IFCXML_XSD_IFC4";
pub const ENV_TEMPLATE: &str = "IFCXML_TEMPLATE";
pub const ENV_TRANSFORM_ENABLED: &str = "IFCXML_TRANSFORM_ENABLED";

/// Pipeline settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Directory holding the dialect schemas
    pub xsd_dir: PathBuf,
    /// Explicit IFC2X3 schema path (defaults to `<xsd_dir>/IFC2X3.xsd`)
    pub xsd_ifc2x3: Option<PathBuf>,
    /// Explicit IFC4 schema path (defaults to `<xsd_dir>/ifcXML4.xsd`)
    pub xsd_ifc4: Option<PathBuf>,
    /// Normalization template
    pub template_path: PathBuf,
    /// Run the normalization step at all
    pub transform_enabled: bool,
    /// Run the per-element assertion tier during the first validation pass
    pub early_assertions: bool,
    /// Cap on early diagnostics kept per document
    pub max_early_diagnostics: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            xsd_dir: PathBuf::from("xsd"),
            xsd_ifc2x3: None,
            xsd_ifc4: None,
            template_path: PathBuf::from("xslt/templates/to-json.json"),
            transform_enabled: true,
            early_assertions: true,
            max_early_diagnostics: 100,
        }
    }
}

impl IngestConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by `IFCXML_*` environment variables
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(dir) = var(ENV_XSD_DIR) {
            config.xsd_dir = PathBuf::from(dir);
        }
        if let Some(path) = var(ENV_XSD_IFC2X3) {
            config.xsd_ifc2x3 = Some(PathBuf::from(path));
        }
        if let Some(path) = var(ENV_XSD_IFC4) {
            config.xsd_ifc4 = Some(PathBuf::from(path));
        }
        if let Some(path) = var(ENV_TEMPLATE) {
            config.template_path = PathBuf::from(path);
        }
        if let Some(flag) = var(ENV_TRANSFORM_ENABLED) {
            config.transform_enabled = parse_flag(&flag).unwrap_or(config.transform_enabled);
        }
        config
    }

    /// Load from a JSON document; missing keys keep their defaults
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let config = serde_json::from_reader(BufReader::new(file)).map_err(std::io::Error::from)?;
        Ok(config)
    }

    /// Set the schema directory
    pub fn with_xsd_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.xsd_dir = dir.into();
        self
    }

    /// Set an explicit schema path for one dialect
    pub fn with_schema(mut self, version: IfcVersion, path: impl Into<PathBuf>) -> Self {
        match version {
            IfcVersion::Ifc2x3 => self.xsd_ifc2x3 = Some(path.into()),
            IfcVersion::Ifc4 => self.xsd_ifc4 = Some(path.into()),
        }
        self
    }

    /// Set the normalization template
    pub fn with_template(mut self, path: impl Into<PathBuf>) -> Self {
        self.template_path = path.into();
        self
    }

    /// Enable or disable the normalization step
    pub fn with_transform(mut self, enabled: bool) -> Self {
        self.transform_enabled = enabled;
        self
    }

    /// Enable or disable the early assertion tier
    pub fn with_early_assertions(mut self, enabled: bool) -> Self {
        self.early_assertions = enabled;
        self
    }
}

impl SchemaLocator for IngestConfig {
    fn schema_path(&self, version: IfcVersion) -> Option<PathBuf> {
        let explicit = match version {
            IfcVersion::Ifc2x3 => &self.xsd_ifc2x3,
            IfcVersion::Ifc4 => &self.xsd_ifc4,
        };
        let default_name = match version {
            IfcVersion::Ifc2x3 => "IFC2X3.xsd",
            IfcVersion::Ifc4 => "ifcXML4.xsd",
        };
        Some(
            explicit
                .clone()
                .unwrap_or_else(|| self.xsd_dir.join(default_name)),
        )
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
