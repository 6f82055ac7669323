//! Small helpers shared by storage and the command-line front end.
//!
//! - **URL validation**: channel URLs must be public http(s) endpoints
//! - **Text**: control-character stripping for user and feed supplied text,
//!   and width-aware truncation for terminal listings

mod text;
mod url_validator;

pub use text::{display_width, strip_control_chars, truncate_to_width};
pub use url_validator::{validate_url, UrlValidationError};
