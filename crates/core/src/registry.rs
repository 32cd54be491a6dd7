//! Template registry
//!
//! Immutable lookup from `(document type, customer category, vehicle variant)` to the
//! remote template identifier. Built once from configuration and injected into the
//! dispatch orchestrator; a missing entry is a deployment defect, never user error.

use std::collections::HashMap;

use crate::config::TemplatesConfig;
use crate::domain::document::{
    CustomerCategory, DocumentType, TemplateId, TemplateKey, VehicleVariant,
};
use crate::errors::ConfigurationError;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TemplateRegistry {
    entries: HashMap<TemplateKey, TemplateId>,
}

impl TemplateRegistry {
    /// Registers whatever entries are given. Use [`TemplateRegistry::from_config`] for
    /// the complete, validated registry the service runs with.
    pub fn new(entries: impl IntoIterator<Item = (TemplateKey, TemplateId)>) -> Self {
        Self { entries: entries.into_iter().collect() }
    }

    /// Builds the registry and checks that every key is present, non-empty and unique.
    pub fn from_config(config: &TemplatesConfig) -> Result<Self, ConfigurationError> {
        let mut entries = HashMap::with_capacity(TemplateKey::ALL.len());
        let mut seen: HashMap<&str, TemplateKey> = HashMap::new();

        for key in TemplateKey::ALL {
            let raw = config.get(key).trim();
            if raw.is_empty() {
                return Err(ConfigurationError::EmptyTemplateId { key });
            }
            if let Some(first) = seen.insert(raw, key) {
                return Err(ConfigurationError::DuplicateTemplateId {
                    first,
                    second: key,
                    template_id: raw.to_string(),
                });
            }
            entries.insert(key, TemplateId::new(raw));
        }

        Ok(Self { entries })
    }

    /// Quotes ignore `vehicle`; contracts require it.
    pub fn resolve(
        &self,
        document_type: DocumentType,
        category: CustomerCategory,
        vehicle: Option<VehicleVariant>,
    ) -> Result<&TemplateId, ConfigurationError> {
        let key = match document_type {
            DocumentType::Quote => TemplateKey::Quote(category),
            DocumentType::Contract => {
                let variant = vehicle.ok_or(ConfigurationError::MissingVehicleVariant)?;
                TemplateKey::Contract(category, variant)
            }
        };
        self.resolve_key(key)
    }

    pub fn resolve_key(&self, key: TemplateKey) -> Result<&TemplateId, ConfigurationError> {
        self.entries.get(&key).ok_or(ConfigurationError::UnresolvedTemplate { key })
    }

    /// Registered entries in the canonical key order.
    pub fn entries(&self) -> impl Iterator<Item = (TemplateKey, &TemplateId)> + '_ {
        TemplateKey::ALL.into_iter().filter_map(|key| self.entries.get(&key).map(|id| (key, id)))
    }

    pub fn missing_keys(&self) -> Vec<TemplateKey> {
        TemplateKey::ALL.into_iter().filter(|key| !self.entries.contains_key(key)).collect()
    }

    pub fn is_complete(&self) -> bool {
        self.missing_keys().is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
