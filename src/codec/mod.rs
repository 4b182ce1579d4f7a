//! Tagged-value codec: self-describing values with a runtime-extensible
//! type registry.
//!
//! # Wire form
//! Every encoded value is `<tag>/<payload>`.  The tag is a short ASCII name
//! that selects the codec; the payload carries no length of its own because
//! the enclosing length-prefixed record already does.
//!
//! # Registry
//! A [`TypeRegistry`] maps each tag to a pair of plain function pointers
//! ([`EncodeFn`], [`DecodeFn`]).  Built-in types are installed at
//! construction.  Registering a tag that already exists fails with
//! [`BakedError::DuplicateType`]; the first registration always wins.
//!
//! `bytes` is not in the table at all: it is matched before the lookup on
//! both paths and can never be overridden.
//!
//! The module-level [`encode`], [`decode`] and [`register`] functions use one
//! process-wide registry.  Codec functions must recurse through the registry
//! they are handed, never through the module-level functions, which would
//! take the lock a second time.

mod builtin;
mod decimal;
mod value;

use std::cell::Cell;
use std::collections::HashMap;

use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::error::{BakedError, FormatError, Result};

pub use value::{Dict, Value};

// ── Tags ─────────────────────────────────────────────────────────────────────

pub const TAG_INT:      &str = "int";
pub const TAG_BOOL:     &str = "bool";
pub const TAG_STR:      &str = "str";
pub const TAG_FLOAT:    &str = "float";
pub const TAG_BYTES:    &str = "bytes";
pub const TAG_DATETIME: &str = "datetime";
pub const TAG_LIST:     &str = "list";
pub const TAG_DICT:     &str = "dict";

/// Separates the tag from the payload.
pub const TAG_SEPARATOR: u8 = b'/';

/// Deepest nesting of lists, dicts and extension values accepted by
/// [`TypeRegistry::decode`].
pub const MAX_DEPTH: usize = 128;

/// Encode a value of the registered type into its payload bytes.
pub type EncodeFn = fn(&TypeRegistry, &Value) -> Result<Vec<u8>>;
/// Decode payload bytes into a value of the registered type.
pub type DecodeFn = fn(&TypeRegistry, &[u8]) -> Result<Value>;

// ── Registry ─────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct TypeRegistry {
    codecs: HashMap<String, (EncodeFn, DecodeFn)>,
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeRegistry {
    /// A registry holding only the built-in types.
    pub fn new() -> Self {
        let mut codecs: HashMap<String, (EncodeFn, DecodeFn)> = HashMap::new();
        codecs.insert(TAG_INT.into(),      (builtin::encode_int,      builtin::decode_int));
        codecs.insert(TAG_BOOL.into(),     (builtin::encode_bool,     builtin::decode_bool));
        codecs.insert(TAG_STR.into(),      (builtin::encode_str,      builtin::decode_str));
        codecs.insert(TAG_FLOAT.into(),    (builtin::encode_float,    builtin::decode_float));
        codecs.insert(TAG_DATETIME.into(), (builtin::encode_datetime, builtin::decode_datetime));
        codecs.insert(TAG_LIST.into(),     (builtin::encode_list,     builtin::decode_list));
        codecs.insert(TAG_DICT.into(),     (builtin::encode_dict,     builtin::decode_dict));
        Self { codecs }
    }

    /// Add a codec for `tag`.
    ///
    /// Values of the new type are written as [`Value::Ext`]; `encode` receives
    /// the inner value and `decode` returns it, the registry does the wrapping.
    pub fn register(&mut self, tag: &str, encode: EncodeFn, decode: DecodeFn) -> Result<()> {
        validate_tag(tag)?;
        if tag == TAG_BYTES || self.codecs.contains_key(tag) {
            return Err(BakedError::DuplicateType(tag.to_owned()));
        }
        self.codecs.insert(tag.to_owned(), (encode, decode));
        Ok(())
    }

    pub fn is_registered(&self, tag: &str) -> bool {
        tag == TAG_BYTES || self.codecs.contains_key(tag)
    }

    pub fn encode(&self, value: &Value) -> Result<Vec<u8>> {
        let (tag, target) = match value {
            Value::Bytes(data) => return Ok(pack_type(TAG_BYTES, data)),
            Value::Ext { tag, .. } if is_builtin(tag) => {
                return Err(BakedError::UnsupportedType(format!("{tag} (built-in tag on an extension value)")));
            }
            Value::Ext { tag, value } => (tag.as_str(), value.as_ref()),
            other => (other.type_tag(), other),
        };
        let (encode, _) = self
            .codecs
            .get(tag)
            .ok_or_else(|| BakedError::UnsupportedType(tag.to_owned()))?;
        Ok(pack_type(tag, &encode(self, target)?))
    }

    /// Decode one tagged value.  Nesting beyond [`MAX_DEPTH`] is rejected
    /// with [`FormatError::InvalidPayload`].
    pub fn decode(&self, data: &[u8]) -> Result<Value> {
        let _depth = DepthGuard::enter()?;
        let (tag, payload) = unpack_type(data)?;
        if tag == TAG_BYTES {
            return Ok(Value::Bytes(payload.to_vec()));
        }
        let (_, decode) = self
            .codecs
            .get(tag)
            .ok_or_else(|| BakedError::UnsupportedType(tag.to_owned()))?;
        let value = decode(self, payload)?;
        Ok(if is_builtin(tag) { value } else { Value::ext(tag, value) })
    }
}

thread_local! {
    static DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Nesting level of the `decode` calls active on this thread.  Codecs recurse
/// through plain function pointers, so the count lives beside them.
struct DepthGuard;

impl DepthGuard {
    fn enter() -> std::result::Result<Self, FormatError> {
        DEPTH.with(|depth| {
            let current = depth.get();
            if current >= MAX_DEPTH {
                return Err(FormatError::InvalidPayload {
                    kind:   "value",
                    reason: format!("nested deeper than {MAX_DEPTH} levels"),
                });
            }
            depth.set(current + 1);
            Ok(DepthGuard)
        })
    }
}

impl Drop for DepthGuard {
    fn drop(&mut self) {
        DEPTH.with(|depth| depth.set(depth.get() - 1));
    }
}

fn is_builtin(tag: &str) -> bool {
    matches!(
        tag,
        TAG_INT | TAG_BOOL | TAG_STR | TAG_FLOAT | TAG_BYTES | TAG_DATETIME | TAG_LIST | TAG_DICT
    )
}

fn validate_tag(tag: &str) -> std::result::Result<(), FormatError> {
    let valid = !tag.is_empty()
        && tag.bytes().all(|b| b.is_ascii_graphic() && b != TAG_SEPARATOR);
    if valid { Ok(()) } else { Err(FormatError::MalformedTag) }
}

// ── Tag framing ──────────────────────────────────────────────────────────────

pub fn pack_type(tag: &str, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(tag.len() + 1 + payload.len());
    out.extend_from_slice(tag.as_bytes());
    out.push(TAG_SEPARATOR);
    out.extend_from_slice(payload);
    out
}

/// Split at the first separator.  A missing separator or a tag that is not
/// printable ASCII is [`FormatError::MalformedTag`].
pub fn unpack_type(data: &[u8]) -> std::result::Result<(&str, &[u8]), FormatError> {
    let split = data
        .iter()
        .position(|&b| b == TAG_SEPARATOR)
        .ok_or(FormatError::MalformedTag)?;
    let tag = std::str::from_utf8(&data[..split]).map_err(|_| FormatError::MalformedTag)?;
    validate_tag(tag)?;
    Ok((tag, &data[split + 1..]))
}

// ── Process-wide registry ────────────────────────────────────────────────────

static REGISTRY: Lazy<RwLock<TypeRegistry>> = Lazy::new(|| RwLock::new(TypeRegistry::new()));

/// Encode with the process-wide registry.
pub fn encode(value: &Value) -> Result<Vec<u8>> {
    REGISTRY.read().encode(value)
}

/// Decode with the process-wide registry.
pub fn decode(data: &[u8]) -> Result<Value> {
    REGISTRY.read().decode(data)
}

/// Register a type in the process-wide registry.
pub fn register(tag: &str, encode: EncodeFn, decode: DecodeFn) -> Result<()> {
    REGISTRY.write().register(tag, encode, decode)
}
