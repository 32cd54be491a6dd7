//! Google Workspace adapters: access tokens and the Drive/Docs template store.

pub mod auth;
pub mod drive;

pub use auth::{
    AuthError, MetadataTokenSource, RefreshTokenSource, StaticTokenSource, TokenSource,
};
pub use drive::{GoogleApiError, GoogleTemplateStore};
