//! Mode catalog: the read-shared library of output and input event
//! templates. Templates are immutable and handed out behind `Arc`; mutable
//! state only exists on instances cloned from them. The catalog also interns
//! mode names to compact ids for pattern-store keys.

pub mod input;
pub mod out;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use input::{InMode, InModeTemplate, OutRule, Rule};
pub use out::{Indexes, OutMode, OutModeTemplate};

/// Compact interned id of an out-mode name; stable for one catalog.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ModeId(pub u16);

pub struct Catalog {
    out_templates: BTreeMap<String, Arc<OutModeTemplate>>,
    in_templates: BTreeMap<String, Arc<InModeTemplate>>,
    ids: BTreeMap<String, ModeId>,
    names: Vec<String>,
}

impl Catalog {
    pub fn new(outs: Vec<OutModeTemplate>, ins: Vec<InModeTemplate>) -> Self {
        let mut out_templates = BTreeMap::new();
        for template in outs {
            out_templates.insert(template.name.clone(), Arc::new(template));
        }
        let mut in_templates = BTreeMap::new();
        for template in ins {
            in_templates.insert(template.name.clone(), Arc::new(template));
        }
        let names: Vec<String> = out_templates.keys().cloned().collect();
        let ids = names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), ModeId(i as u16)))
            .collect();
        Catalog { out_templates, in_templates, ids, names }
    }

    pub fn out(&self, name: &str) -> Option<&Arc<OutModeTemplate>> {
        self.out_templates.get(name)
    }

    pub fn in_(&self, name: &str) -> Option<&Arc<InModeTemplate>> {
        self.in_templates.get(name)
    }

    pub fn mode_id(&self, name: &str) -> Option<ModeId> {
        self.ids.get(name).copied()
    }

    pub fn mode_name(&self, id: ModeId) -> Option<&str> {
        self.names.get(id.0 as usize).map(String::as_str)
    }

    pub fn out_names(&self) -> Vec<String> {
        self.names.clone()
    }

    pub fn in_names(&self) -> Vec<String> {
        self.in_templates.keys().cloned().collect()
    }

    pub fn out_modes(&self) -> impl Iterator<Item = &Arc<OutModeTemplate>> {
        self.out_templates.values()
    }

    pub fn in_modes(&self) -> impl Iterator<Item = &Arc<InModeTemplate>> {
        self.in_templates.values()
    }

    /// Distinct instrument tags advertised by out templates.
    pub fn out_instruments(&self) -> Vec<String> {
        let mut tags: Vec<String> = self
            .out_templates
            .values()
            .flat_map(|t| t.instruments.iter().cloned())
            .collect();
        tags.sort();
        tags.dedup();
        tags
    }

    /// Distinct instrument tags advertised by in templates.
    pub fn in_instruments(&self) -> Vec<String> {
        let mut tags: Vec<String> = self
            .in_templates
            .values()
            .flat_map(|t| t.instruments.iter().cloned())
            .collect();
        tags.sort();
        tags.dedup();
        tags
    }

    /// Out-mode names advertising any of the given instrument tags.
    pub fn out_names_for_instruments(&self, instruments: &[String]) -> Vec<String> {
        self.out_templates
            .values()
            .filter(|t| t.instruments.iter().any(|i| instruments.contains(i)))
            .map(|t| t.name.clone())
            .collect()
    }

    /// In-mode names advertising any of the given instrument tags.
    pub fn in_names_for_instruments(&self, instruments: &[String]) -> Vec<String> {
        self.in_templates
            .values()
            .filter(|t| t.instruments.iter().any(|i| instruments.contains(i)))
            .map(|t| t.name.clone())
            .collect()
    }
}
