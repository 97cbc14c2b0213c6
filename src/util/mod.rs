//! Shared helpers.
//!
//! - **Durations**: parsing and canonical formatting of `1h30m`-style strings
//! - **URL validation**: rejecting feed URLs that point at internal hosts

mod duration;
mod url_validator;

pub use duration::{format_duration, parse_duration, DurationError};
pub use url_validator::{validate_feed_url, UrlValidationError};
