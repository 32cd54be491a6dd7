use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::domain::document::{CustomerCategory, VehicleVariant};
use crate::errors::FieldError;

/// Greeting used when a record carries neither a person nor a company name.
pub const FALLBACK_DISPLAY_NAME: &str = "Cliente";

/// The closed set of placeholders every template may reference.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Field {
    CustomerType,
    QuoteNumber,
    PickupDateDisplay,
    PickupDate,
    PickupTime,
    DeliveryDateDisplay,
    DeliveryDate,
    DeliveryTime,
    Email,
    Mobile,
    VehicleDisplay,
    Vehicle,
    Mileage,
    Price,
    PickupZone,
    FullName,
    TaxCode,
    ResidenceAddress,
    LicenseNumber,
    CompanyName,
    VatNumber,
    CompanyTaxCode,
    HeadquartersAddress,
    FirstDriverName,
    FirstDriverLicense,
    SecondDriverName,
    SecondDriverLicense,
    ResponsibleName,
    ResponsibleTaxCode,
    ResponsibleAddress,
    ResponsibleLicense,
    IssueDate,
    ExtraMileage,
}

impl Field {
    pub const ALL: [Field; 33] = [
        Field::CustomerType,
        Field::QuoteNumber,
        Field::PickupDateDisplay,
        Field::PickupDate,
        Field::PickupTime,
        Field::DeliveryDateDisplay,
        Field::DeliveryDate,
        Field::DeliveryTime,
        Field::Email,
        Field::Mobile,
        Field::VehicleDisplay,
        Field::Vehicle,
        Field::Mileage,
        Field::Price,
        Field::PickupZone,
        Field::FullName,
        Field::TaxCode,
        Field::ResidenceAddress,
        Field::LicenseNumber,
        Field::CompanyName,
        Field::VatNumber,
        Field::CompanyTaxCode,
        Field::HeadquartersAddress,
        Field::FirstDriverName,
        Field::FirstDriverLicense,
        Field::SecondDriverName,
        Field::SecondDriverLicense,
        Field::ResponsibleName,
        Field::ResponsibleTaxCode,
        Field::ResponsibleAddress,
        Field::ResponsibleLicense,
        Field::IssueDate,
        Field::ExtraMileage,
    ];

    /// Wire name of the field, as it appears in request payloads and template tokens.
    pub const fn key(self) -> &'static str {
        match self {
            Self::CustomerType => "cliente-tipo",
            Self::QuoteNumber => "numero-preventivo",
            Self::PickupDateDisplay => "ritiro-data-display",
            Self::PickupDate => "ritiro-data",
            Self::PickupTime => "ritiro-ora",
            Self::DeliveryDateDisplay => "consegna-data-display",
            Self::DeliveryDate => "consegna-data",
            Self::DeliveryTime => "consegna-ora",
            Self::Email => "email",
            Self::Mobile => "cellulare",
            Self::VehicleDisplay => "veicolo-display",
            Self::Vehicle => "veicolo",
            Self::Mileage => "chilometri",
            Self::Price => "preventivo",
            Self::PickupZone => "zona-ritiro",
            Self::FullName => "nome-cognome",
            Self::TaxCode => "codice-fiscale",
            Self::ResidenceAddress => "indirizzo-residenza",
            Self::LicenseNumber => "numero-patente",
            Self::CompanyName => "denominazione",
            Self::VatNumber => "partita-iva",
            Self::CompanyTaxCode => "codice-fiscale-azienda",
            Self::HeadquartersAddress => "indirizzo-sede",
            Self::FirstDriverName => "guidatore1-nome",
            Self::FirstDriverLicense => "guidatore1-patente",
            Self::SecondDriverName => "guidatore2-nome",
            Self::SecondDriverLicense => "guidatore2-patente",
            Self::ResponsibleName => "responsabile-nome",
            Self::ResponsibleTaxCode => "responsabile-cf",
            Self::ResponsibleAddress => "responsabile-indirizzo",
            Self::ResponsibleLicense => "responsabile-patente",
            Self::IssueDate => "data-emissione",
            Self::ExtraMileage => "km-extra",
        }
    }

    /// Literal token substituted in templates, e.g. `{{email}}`.
    pub fn placeholder(self) -> String {
        format!("{{{{{}}}}}", self.key())
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|field| field.key() == key)
    }
}

/// Normalized inbound values for one request. Read-only once built.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FieldRecord {
    values: BTreeMap<String, String>,
}

impl FieldRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a record from a JSON object payload.
    ///
    /// Strings are kept verbatim, numbers and booleans become their textual form and
    /// `null` counts as absent. Nested values are rejected for known fields and
    /// ignored for unknown keys.
    pub fn from_json(payload: &Value) -> Result<Self, FieldError> {
        let object = payload.as_object().ok_or(FieldError::NotAnObject)?;
        let mut values = BTreeMap::new();

        for (key, value) in object {
            let text = match value {
                Value::Null => continue,
                Value::String(text) => text.clone(),
                Value::Number(number) => number.to_string(),
                Value::Bool(flag) => flag.to_string(),
                Value::Array(_) | Value::Object(_) => {
                    if Field::from_key(key).is_some() {
                        return Err(FieldError::UnsupportedValue { key: key.clone() });
                    }
                    continue;
                }
            };
            values.insert(key.clone(), text);
        }

        Ok(Self { values })
    }

    pub fn with(mut self, field: Field, value: impl Into<String>) -> Self {
        self.values.insert(field.key().to_string(), value.into());
        self
    }

    /// Value for `field`, or the empty string when the request omitted it.
    pub fn get(&self, field: Field) -> &str {
        self.values.get(field.key()).map(String::as_str).unwrap_or_default()
    }

    pub fn contains(&self, field: Field) -> bool {
        self.values.contains_key(field.key())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn customer_category(&self) -> Result<CustomerCategory, FieldError> {
        CustomerCategory::parse(self.get(Field::CustomerType))
    }

    pub fn vehicle_variant(&self) -> VehicleVariant {
        VehicleVariant::from_descriptor(self.get(Field::Vehicle))
    }

    /// Person name, then company name, then the generic fallback.
    pub fn display_name(&self) -> &str {
        [Field::FullName, Field::CompanyName]
            .into_iter()
            .map(|field| self.get(field))
            .find(|value| !value.is_empty())
            .unwrap_or(FALLBACK_DISPLAY_NAME)
    }
}

impl<'de> Deserialize<'de> for FieldRecord {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let payload = Value::deserialize(deserializer)?;
        Self::from_json(&payload).map_err(serde::de::Error::custom)
    }
}

impl<K, V> FromIterator<(K, V)> for FieldRecord
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self { values: iter.into_iter().map(|(key, value)| (key.into(), value.into())).collect() }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use serde_json::json;

    use super::{Field, FieldRecord, FALLBACK_DISPLAY_NAME};
    use crate::domain::document::{CustomerCategory, VehicleVariant};
    use crate::errors::FieldError;

    #[test]
    fn placeholder_set_is_closed_and_unique() {
        let keys: HashSet<_> = Field::ALL.iter().map(|field| field.key()).collect();
        assert_eq!(keys.len(), Field::ALL.len());
        assert_eq!(Field::ALL.len(), 33);
        assert_eq!(Field::from_key("km-extra"), Some(Field::ExtraMileage));
        assert_eq!(Field::from_key("unknown"), None);
    }

    #[test]
    fn placeholder_wraps_key_in_double_braces() {
        assert_eq!(Field::QuoteNumber.placeholder(), "{{numero-preventivo}}");
    }

    #[test]
    fn absent_fields_read_as_empty() {
        let record = FieldRecord::new().with(Field::Email, "a@x.test");
        assert_eq!(record.get(Field::Email), "a@x.test");
        assert_eq!(record.get(Field::Price), "");
        assert!(!record.contains(Field::Price));
    }

    #[test]
    fn json_scalars_are_normalized_to_text() {
        let record = FieldRecord::from_json(&json!({
            "preventivo": 500,
            "chilometri": 1250.5,
            "email": "a@x.test",
            "km-extra": null,
            "privacy": true,
        }))
        .expect("object payload");

        assert_eq!(record.get(Field::Price), "500");
        assert_eq!(record.get(Field::Mileage), "1250.5");
        assert_eq!(record.get(Field::ExtraMileage), "");
        assert!(!record.contains(Field::ExtraMileage));
        assert_eq!(record.len(), 4);
    }

    #[test]
    fn non_object_payloads_are_rejected() {
        assert_eq!(FieldRecord::from_json(&json!(["email"])), Err(FieldError::NotAnObject));
    }

    #[test]
    fn nested_values_are_rejected_only_for_known_fields() {
        assert_eq!(
            FieldRecord::from_json(&json!({ "email": { "primary": "a@x.test" } })),
            Err(FieldError::UnsupportedValue { key: "email".to_string() })
        );

        let record = FieldRecord::from_json(&json!({ "meta": { "source": "web" } }))
            .expect("unknown nested keys are ignored");
        assert!(record.is_empty());
    }

    #[test]
    fn deserializes_through_serde() {
        let record: FieldRecord =
            serde_json::from_str(r#"{"cliente-tipo":"Azienda","veicolo":"Auto"}"#).expect("json");
        assert_eq!(record.customer_category(), Ok(CustomerCategory::Business));
        assert_eq!(record.vehicle_variant(), VehicleVariant::Car);
    }

    #[test]
    fn category_defaults_to_private_and_vehicle_to_van() {
        let record = FieldRecord::new();
        assert_eq!(record.customer_category(), Ok(CustomerCategory::Private));
        assert_eq!(record.vehicle_variant(), VehicleVariant::Van);
    }

    #[test]
    fn display_name_falls_back_through_company_to_generic() {
        let person = FieldRecord::new()
            .with(Field::FullName, "Mario Rossi")
            .with(Field::CompanyName, "Rossi Srl");
        assert_eq!(person.display_name(), "Mario Rossi");

        let company = FieldRecord::new().with(Field::CompanyName, "Rossi Srl");
        assert_eq!(company.display_name(), "Rossi Srl");

        let anonymous = FieldRecord::new().with(Field::FullName, "");
        assert_eq!(anonymous.display_name(), FALLBACK_DISPLAY_NAME);
    }
}
