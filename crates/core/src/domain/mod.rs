pub mod document;
pub mod fields;
