use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::FieldError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    Quote,
    Contract,
}

impl DocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Quote => "quote",
            Self::Contract => "contract",
        }
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CustomerCategory {
    #[default]
    Private,
    Business,
}

impl CustomerCategory {
    /// Parses the inbound `cliente-tipo` value. Empty input means a private customer.
    pub fn parse(raw: &str) -> Result<Self, FieldError> {
        let normalized = raw.trim().to_lowercase();
        match normalized.as_str() {
            "" | "privato" | "private" => Ok(Self::Private),
            "azienda" | "business" => Ok(Self::Business),
            _ => Err(FieldError::UnknownCustomerCategory(raw.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Private => "private",
            Self::Business => "business",
        }
    }
}

impl fmt::Display for CustomerCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleVariant {
    Car,
    Van,
}

/// Descriptors that are known to mean a van. Anything else that is not `auto`
/// still selects the van contract, but is worth flagging in the logs.
const KNOWN_VAN_DESCRIPTORS: [&str; 3] = ["", "pulmino", "van"];

impl VehicleVariant {
    /// `auto` (any case) selects the car contract; every other value selects the van.
    pub fn from_descriptor(raw: &str) -> Self {
        if raw.eq_ignore_ascii_case("auto") {
            Self::Car
        } else {
            Self::Van
        }
    }

    pub fn is_recognized_descriptor(raw: &str) -> bool {
        raw.eq_ignore_ascii_case("auto")
            || KNOWN_VAN_DESCRIPTORS.iter().any(|known| raw.eq_ignore_ascii_case(known))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Car => "car",
            Self::Van => "van",
        }
    }
}

impl fmt::Display for VehicleVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TemplateId(pub String);

impl TemplateId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TemplateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fully enumerated lookup key for the template registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TemplateKey {
    Quote(CustomerCategory),
    Contract(CustomerCategory, VehicleVariant),
}

impl TemplateKey {
    pub const ALL: [TemplateKey; 6] = [
        TemplateKey::Quote(CustomerCategory::Private),
        TemplateKey::Quote(CustomerCategory::Business),
        TemplateKey::Contract(CustomerCategory::Private, VehicleVariant::Car),
        TemplateKey::Contract(CustomerCategory::Private, VehicleVariant::Van),
        TemplateKey::Contract(CustomerCategory::Business, VehicleVariant::Car),
        TemplateKey::Contract(CustomerCategory::Business, VehicleVariant::Van),
    ];

    pub fn document_type(&self) -> DocumentType {
        match self {
            Self::Quote(_) => DocumentType::Quote,
            Self::Contract(..) => DocumentType::Contract,
        }
    }

    pub fn customer_category(&self) -> CustomerCategory {
        match self {
            Self::Quote(category) | Self::Contract(category, _) => *category,
        }
    }

    /// Dotted path of the configuration entry that holds this key's template id.
    pub fn config_path(&self) -> String {
        match self {
            Self::Quote(category) => format!("templates.quote.{category}"),
            Self::Contract(category, variant) => {
                format!("templates.contract.{category}.{variant}")
            }
        }
    }
}

impl fmt::Display for TemplateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.config_path())
    }
}
