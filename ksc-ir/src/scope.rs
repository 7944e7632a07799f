//! Nested type definitions.
//!
//! A type declared inside another one is stored as a whole serialized spec, base64-encoded into
//! the user type name of a [`TypeDef`](crate::TypeDef) named after the scope path
//! (`outer::inner`). This keeps every IR file a single flat spec.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::error::Error;
use crate::model::{Spec, TypeRef};
use crate::wire::{deserialize_unchecked, serialize};

/// Prefix of the user type names holding an embedded scope.
pub const SCOPE_PREFIX: &str = "__scope_b64__:";

impl TypeRef {
    /// A reference holding the whole `scope` spec.
    pub fn embedded(scope: &Spec) -> Self {
        TypeRef::User(format!("{SCOPE_PREFIX}{}", STANDARD.encode(serialize(scope))))
    }

    /// The base64 payload of an embedded scope reference.
    pub fn embedded_payload(&self) -> Option<&str> {
        match self {
            TypeRef::User(name) => name.strip_prefix(SCOPE_PREFIX).filter(|p| !p.is_empty()),
            TypeRef::Primitive(_) => None,
        }
    }
}

/// Decode the embedded scope `name`. The decoded spec is not validated.
pub fn decode_embedded(name: &str, payload: &str) -> Result<Spec, Error> {
    let scope_error = |message: String| Error::EmbeddedScope {
        name: name.to_string(),
        message,
    };
    let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = STANDARD
        .decode(compact)
        .map_err(|e| scope_error(e.to_string()))?;
    let text = String::from_utf8(bytes).map_err(|e| scope_error(e.to_string()))?;
    deserialize_unchecked(&text).map_err(|e| scope_error(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Attr, Endian, PrimitiveType};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_embedded_scope() {
        let mut inner = Spec::new("inner", Endian::Be);
        inner.attrs.push(Attr::new("x", PrimitiveType::U2));
        let ty = TypeRef::embedded(&inner);
        let payload = ty.embedded_payload().unwrap();
        assert_eq!(decode_embedded("outer::inner", payload).unwrap(), inner);
    }

    #[test]
    fn test_not_embedded() {
        assert!(TypeRef::user("plain").embedded_payload().is_none());
        assert!(TypeRef::user(SCOPE_PREFIX).embedded_payload().is_none());
        assert!(TypeRef::Primitive(PrimitiveType::U1).embedded_payload().is_none());
    }

    #[test]
    fn test_bad_payload() {
        let err = decode_embedded("a::b", "!!!").unwrap_err();
        assert!(err.to_string().starts_with("invalid embedded scope a::b: "));
    }
}
