//! Utility functions shared by the adapters and the registration path.
//!
//! - **URL validation**: rejects unsafe source URLs and insecure API base URLs
//! - **Text processing**: HTML to plain-text previews and control-char stripping

mod text;
mod url_validator;

pub use text::{html_to_text, strip_control_chars};
pub use url_validator::{validate_api_base, validate_source_url, UrlValidationError};
