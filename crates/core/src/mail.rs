//! Outbound messages
//!
//! Message model, the `MailSender` capability, and composition of the customer and
//! internal messages from a field record and the rendered documents. HTML bodies are
//! rendered with Tera from the templates embedded at build time.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tera::{Context, Tera};

use crate::domain::fields::{Field, FieldRecord};
use crate::errors::{ConfigurationError, DispatchError, MailError};
use crate::render::RenderedDocument;

pub const CUSTOMER_SUBJECT: &str = "Il tuo preventivo";
pub const INTERNAL_SUBJECT_PREFIX: &str = "Preventivo e contratto";
pub const PDF_CONTENT_TYPE: &str = "application/pdf";

// `.html` suffixes keep Tera's autoescaping on for request-supplied values.
const CUSTOMER_TEMPLATE: &str = "customer.html";
const INTERNAL_TEMPLATE: &str = "internal.html";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Audience {
    Customer,
    Internal,
}

impl Audience {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Customer => "customer",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for Audience {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub content_type: &'static str,
    pub content: Vec<u8>,
}

impl Attachment {
    pub fn pdf(filename: impl Into<String>, content: Vec<u8>) -> Self {
        Self { filename: filename.into(), content_type: PDF_CONTENT_TYPE, content }
    }
}

impl fmt::Debug for Attachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attachment")
            .field("filename", &self.filename)
            .field("content_type", &self.content_type)
            .field("size", &self.content.len())
            .finish()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundMessage {
    pub audience: Audience,
    pub to: String,
    pub subject: String,
    pub html_body: String,
    pub attachments: Vec<Attachment>,
}

/// Mail delivery capability. The sender address and any credentials belong to the
/// implementation.
#[async_trait]
pub trait MailSender: Send + Sync {
    async fn send(&self, message: &OutboundMessage) -> Result<(), MailError>;
}

pub struct MessageComposer {
    tera: Tera,
    internal_recipient: String,
}

impl MessageComposer {
    pub fn new(internal_recipient: impl Into<String>) -> Result<Self, ConfigurationError> {
        let mut tera = Tera::default();
        tera.add_raw_templates(vec![
            (CUSTOMER_TEMPLATE, include_str!("../../../templates/mail/customer.html.tera")),
            (INTERNAL_TEMPLATE, include_str!("../../../templates/mail/internal.html.tera")),
        ])
        .map_err(|error| ConfigurationError::MailTemplate(error.to_string()))?;

        Ok(Self { tera, internal_recipient: internal_recipient.into() })
    }

    pub fn internal_recipient(&self) -> &str {
        &self.internal_recipient
    }

    /// Customer message: fixed subject, one attachment with the quote.
    pub fn customer_message(
        &self,
        fields: &FieldRecord,
        quote: &RenderedDocument,
        timestamp_ms: i64,
    ) -> Result<OutboundMessage, DispatchError> {
        let audience = Audience::Customer;
        let to = recipient(audience, fields.get(Field::Email))?;

        let mut context = Context::new();
        context.insert("name", fields.display_name());
        context.insert("vehicle", fields.get(Field::VehicleDisplay));
        context.insert("amount", fields.get(Field::Price));
        let html_body = self.render(audience, CUSTOMER_TEMPLATE, &context)?;

        Ok(OutboundMessage {
            audience,
            to,
            subject: CUSTOMER_SUBJECT.to_string(),
            html_body,
            attachments: vec![Attachment::pdf(
                format!("{}_{timestamp_ms}.pdf", quote.document_type),
                quote.pdf.clone(),
            )],
        })
    }

    /// Internal message: subject carries the quote number (or the customer name),
    /// attachments are the quote and the contract, index-suffixed.
    pub fn internal_message(
        &self,
        fields: &FieldRecord,
        documents: [&RenderedDocument; 2],
        timestamp_ms: i64,
    ) -> Result<OutboundMessage, DispatchError> {
        let audience = Audience::Internal;
        let to = recipient(audience, &self.internal_recipient)?;

        let quote_number = fields.get(Field::QuoteNumber).trim();
        let reference = if quote_number.is_empty() { fields.display_name() } else { quote_number };
        let category = fields.customer_category().unwrap_or_default();

        let mut context = Context::new();
        context.insert("quote_number", quote_number);
        context.insert("name", fields.display_name());
        context.insert("category", category.as_str());
        context.insert("email", fields.get(Field::Email));
        context.insert("mobile", fields.get(Field::Mobile));
        context.insert("vehicle", &vehicle_summary(fields));
        context.insert(
            "pickup",
            &schedule_summary(
                fields,
                [Field::PickupDateDisplay, Field::PickupDate],
                Field::PickupTime,
                Some(Field::PickupZone),
            ),
        );
        context.insert(
            "delivery",
            &schedule_summary(
                fields,
                [Field::DeliveryDateDisplay, Field::DeliveryDate],
                Field::DeliveryTime,
                None,
            ),
        );
        context.insert("amount", fields.get(Field::Price));
        let html_body = self.render(audience, INTERNAL_TEMPLATE, &context)?;

        let attachments = documents
            .iter()
            .enumerate()
            .map(|(index, document)| {
                Attachment::pdf(
                    format!("{}_{timestamp_ms}_{index}.pdf", document.document_type),
                    document.pdf.clone(),
                )
            })
            .collect();

        Ok(OutboundMessage {
            audience,
            to,
            subject: format!("{INTERNAL_SUBJECT_PREFIX} - {reference}"),
            html_body,
            attachments,
        })
    }

    fn render(
        &self,
        audience: Audience,
        template: &str,
        context: &Context,
    ) -> Result<String, DispatchError> {
        self.tera
            .render(template, context)
            .map_err(|error| DispatchError::Compose { audience, reason: error.to_string() })
    }
}

fn recipient(audience: Audience, raw: &str) -> Result<String, DispatchError> {
    let address = raw.trim();
    if address.is_empty() {
        return Err(DispatchError::MissingRecipient { audience });
    }
    Ok(address.to_string())
}

fn vehicle_summary(fields: &FieldRecord) -> String {
    let display = fields.get(Field::VehicleDisplay);
    let label = if display.is_empty() { fields.get(Field::Vehicle) } else { display };
    match fields.get(Field::Mileage) {
        "" => label.to_string(),
        km => format!("{label}, {km} km"),
    }
}

fn schedule_summary(
    fields: &FieldRecord,
    dates: [Field; 2],
    time: Field,
    place: Option<Field>,
) -> String {
    let date = dates.into_iter().map(|field| fields.get(field)).find(|value| !value.is_empty());
    let parts: Vec<&str> = [date, Some(fields.get(time)), place.map(|field| fields.get(field))]
        .into_iter()
        .flatten()
        .filter(|value| !value.is_empty())
        .collect();
    parts.join(" ")
}
