//! Text helpers shared by the sync engine and the store.
//!
//! - **Sanitizing**: allow-list HTML cleaning for stored article content
//! - **Text processing**: tag stripping, snippets and search tokens
//!
//! # Examples
//!
//! ```
//! use vesper::util::{snippet, AllowListSanitizer, Sanitizer};
//!
//! let clean = AllowListSanitizer::default().sanitize("<p onclick=\"x()\">Hi</p><script>1</script>");
//! assert_eq!(clean, "<p>Hi</p>");
//! assert_eq!(snippet(&clean, 150), "Hi");
//! ```

mod sanitize;
mod text;

pub use sanitize::{AllowListSanitizer, Sanitizer};
pub use text::{snippet, strip_tags, tokenize, MIN_WORD_LENGTH};
