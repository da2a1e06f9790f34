//! Schema Commands

use anyhow::{anyhow, Result};
use clap::Subcommand;
use netbed_common::EngineConfig;
use netbed_engine::attribute::{AttrType, Attribute, DefaultRule, Multiplicity};
use netbed_engine::{Schema, Schemas};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

use crate::output::{print_list, OutputFormat, TableDisplay};

#[derive(Subcommand)]
pub enum SchemaCommands {
    /// List resource kinds and their keys
    List,

    /// Show the attributes of one kind
    Show {
        /// Resource kind, e.g. forwarder_interface
        kind: String,
    },
}

#[derive(Serialize)]
pub struct KindDisplay {
    pub kind: String,
    pub key: Vec<String>,
    pub attributes: usize,
}

impl TableDisplay for KindDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["Kind", "Key", "Attributes"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.kind.clone(),
            self.key.join(", "),
            self.attributes.to_string(),
        ]
    }
}

#[derive(Serialize)]
pub struct AttributeDisplay {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
    pub mandatory: bool,
    pub multiplicity: String,
    pub default: String,
    pub description: String,
}

impl From<&Attribute> for AttributeDisplay {
    fn from(attr: &Attribute) -> Self {
        let ty = match &attr.ty {
            AttrType::String(c) => match c.max_len {
                Some(max) => format!("string({})", max),
                None => "string".to_string(),
            },
            AttrType::Integer => "integer".to_string(),
            AttrType::Bool => "bool".to_string(),
            AttrType::Address => "address".to_string(),
            AttrType::Enum(choices) => choices.join("|"),
            AttrType::Reference(Some(kind)) => format!("-> {}", kind),
            AttrType::Reference(None) => "-> *".to_string(),
        };
        let multiplicity = match attr.multiplicity {
            Multiplicity::One => "1",
            Multiplicity::OneToMany => "1:n",
            Multiplicity::ManyToOne => "n:1",
        };
        let default = match &attr.default {
            DefaultRule::None => String::new(),
            DefaultRule::Literal(value) => value.to_string(),
            DefaultRule::Sibling(name) => format!("= {}", name),
            DefaultRule::Computed(_) => "(computed)".to_string(),
        };

        Self {
            name: attr.name.clone(),
            ty,
            mandatory: attr.mandatory,
            multiplicity: multiplicity.to_string(),
            default,
            description: attr.description.clone().unwrap_or_default(),
        }
    }
}

impl TableDisplay for AttributeDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["Name", "Type", "Mandatory", "Multiplicity", "Default", "Description"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.name.clone(),
            self.ty.clone(),
            self.mandatory.to_string(),
            self.multiplicity.clone(),
            self.default.clone(),
            self.description.clone(),
        ]
    }
}

fn all(schemas: &Schemas) -> [&Arc<Schema>; 6] {
    [
        &schemas.node,
        &schemas.forwarder_host,
        &schemas.container,
        &schemas.net_device,
        &schemas.forwarder,
        &schemas.forwarder_interface,
    ]
}

fn attributes(schema: &Schema) -> Vec<AttributeDisplay> {
    let mut rows: Vec<AttributeDisplay> = schema.attributes().map(AttributeDisplay::from).collect();
    rows.sort_by(|a, b| a.name.cmp(&b.name));
    rows
}

pub fn execute(cmd: SchemaCommands, config_path: &Path, format: OutputFormat) -> Result<()> {
    let config = EngineConfig::load(config_path)?;
    let schemas = Schemas::new(&config)?;

    match cmd {
        SchemaCommands::List => {
            let kinds: Vec<KindDisplay> = all(&schemas)
                .iter()
                .map(|s| KindDisplay {
                    kind: s.kind().to_string(),
                    key: s.key_attributes().to_vec(),
                    attributes: s.attributes().count(),
                })
                .collect();
            print_list(&kinds, format)?;
        }

        SchemaCommands::Show { kind } => {
            let schema = all(&schemas)
                .into_iter()
                .find(|s| s.kind() == kind)
                .ok_or_else(|| anyhow!("unknown resource kind '{}'", kind))?;
            print_list(&attributes(schema), format)?;
        }
    }

    Ok(())
}
