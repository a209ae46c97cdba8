//! Codec module - tag-value encoding of header and context frames.
//!
//! Every structured frame of a CMW-light message (header, request context,
//! data context, exception) is a map from short string tags to typed values:
//!
//! - [`FieldValue`] / [`FieldMap`] - the value model
//! - [`encode_map`] / [`decode_map`] - MessagePack encoding using `rmp`
//!
//! Body frames (application payload) are opaque bytes and never pass
//! through this module.
//!
//! # Example
//!
//! ```
//! use cmwlight_client::codec::{decode_map, encode_map, FieldMap, FieldValue};
//!
//! let mut filters = FieldMap::new();
//! filters.insert("threshold".into(), FieldValue::Int(3));
//!
//! let bytes = encode_map(&filters).unwrap();
//! assert_eq!(decode_map(&bytes).unwrap(), filters);
//! ```

mod msgpack;
mod value;

pub use msgpack::{decode_map, encode_map, MAX_NESTING_DEPTH};
pub use value::{FieldMap, FieldValue, ValueKind};
