//! Deterministic canonical serialization.
//!
//! Two implementations of this format must agree byte-for-byte on the same
//! logical value: fields are written in the order the type's `recipe`
//! declares (never alphabetical, never serde's derive order), integers as
//! decimal ASCII, binary as lowercase hex, no insignificant whitespace.
//! The hash of these bytes is an object's identity across peers, so the
//! encoder intentionally avoids any serde derive magic that could silently
//! reorder fields between crate versions.

use crate::hash::Hash;

/// A value in the canonical recipe representation. `Map` entries are an
/// ordered list (the type's declared recipe order), not a sorted map.
#[derive(Debug, Clone, PartialEq)]
pub enum CanonicalValue {
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<CanonicalValue>),
    Map(Vec<(&'static str, CanonicalValue)>),
}

impl CanonicalValue {
    fn write(&self, out: &mut Vec<u8>) {
        match self {
            CanonicalValue::Null => out.extend_from_slice(b"null"),
            CanonicalValue::Bool(b) => out.extend_from_slice(if *b { b"true" } else { b"false" }),
            CanonicalValue::Int(i) => out.extend_from_slice(i.to_string().as_bytes()),
            CanonicalValue::Str(s) => write_quoted(s, out),
            CanonicalValue::Bytes(b) => write_quoted(&hex::encode(b), out),
            CanonicalValue::List(items) => {
                out.push(b'[');
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        out.push(b',');
                    }
                    item.write(out);
                }
                out.push(b']');
            }
            CanonicalValue::Map(fields) => {
                out.push(b'{');
                for (idx, (name, value)) in fields.iter().enumerate() {
                    if idx > 0 {
                        out.push(b',');
                    }
                    write_quoted(name, out);
                    out.push(b':');
                    value.write(out);
                }
                out.push(b'}');
            }
        }
    }
}

fn write_quoted(s: &str, out: &mut Vec<u8>) {
    out.push(b'"');
    for ch in s.chars() {
        match ch {
            '"' => out.extend_from_slice(b"\\\""),
            '\\' => out.extend_from_slice(b"\\\\"),
            '\n' => out.extend_from_slice(b"\\n"),
            c => {
                let mut buf = [0u8; 4];
                out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            }
        }
    }
    out.push(b'"');
}

/// Encodes a canonical value to its deterministic byte form.
pub fn to_canonical_bytes(value: &CanonicalValue) -> Vec<u8> {
    let mut out = Vec::new();
    value.write(&mut out);
    out
}

/// Types whose identity across peers is defined by a declared field recipe
/// rather than a runtime registry. `canonical_fields` must list every
/// field in stable, declared order; `id_field_names` names the subset that
/// forms the id hash for versioned types (ignored for unversioned types).
pub trait Identified {
    const TYPE_NAME: &'static str;

    fn canonical_fields(&self) -> CanonicalValue;

    /// Names of the fields that determine identity for versioned objects.
    /// Unversioned objects return an empty slice; their content hash is
    /// their only hash.
    fn id_field_names() -> &'static [&'static str] {
        &[]
    }
}

/// Prefixes a type's declared fields with its type name, so that two
/// unrelated types that happen to declare identically-named fields never
/// collide in hash space.
fn with_type_tag<T: Identified>(fields: Vec<(&'static str, CanonicalValue)>) -> CanonicalValue {
    let mut tagged = Vec::with_capacity(fields.len() + 1);
    tagged.push(("_type", CanonicalValue::Str(T::TYPE_NAME.to_string())));
    tagged.extend(fields);
    CanonicalValue::Map(tagged)
}

/// Hash over every declared field: an object's content hash.
pub fn content_hash<T: Identified>(obj: &T) -> Hash {
    let CanonicalValue::Map(fields) = obj.canonical_fields() else {
        panic!("{}::canonical_fields must return a Map", T::TYPE_NAME);
    };
    Hash::of(&to_canonical_bytes(&with_type_tag::<T>(fields)))
}

/// Hash over only the identity-declared fields: stable across versions.
pub fn id_hash<T: Identified>(obj: &T) -> Hash {
    let CanonicalValue::Map(fields) = obj.canonical_fields() else {
        panic!("{}::canonical_fields must return a Map", T::TYPE_NAME);
    };
    let id_fields = T::id_field_names();
    let filtered: Vec<_> = fields
        .into_iter()
        .filter(|(name, _)| id_fields.contains(name))
        .collect();
    Hash::of(&to_canonical_bytes(&with_type_tag::<T>(filtered)))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Widget {
        id: String,
        content: String,
        count: i64,
    }

    impl Identified for Widget {
        const TYPE_NAME: &'static str = "Widget";

        fn canonical_fields(&self) -> CanonicalValue {
            CanonicalValue::Map(vec![
                ("id", CanonicalValue::Str(self.id.clone())),
                ("content", CanonicalValue::Str(self.content.clone())),
                ("count", CanonicalValue::Int(self.count)),
            ])
        }

        fn id_field_names() -> &'static [&'static str] {
            &["id"]
        }
    }

    #[test]
    fn id_hash_ignores_non_identity_fields() {
        let a = Widget {
            id: "same".into(),
            content: "v1".into(),
            count: 1,
        };
        let b = Widget {
            id: "same".into(),
            content: "v2".into(),
            count: 2,
        };
        assert_eq!(id_hash(&a), id_hash(&b));
        assert_ne!(content_hash(&a), content_hash(&b));
    }

    #[test]
    fn content_hash_is_deterministic_across_instances() {
        let a = Widget {
            id: "x".into(),
            content: "y".into(),
            count: 7,
        };
        let b = Widget {
            id: "x".into(),
            content: "y".into(),
            count: 7,
        };
        assert_eq!(content_hash(&a), content_hash(&b));
    }

    #[test]
    fn binary_renders_as_lowercase_hex() {
        let v = CanonicalValue::Bytes(vec![0xAB, 0xCD]);
        assert_eq!(to_canonical_bytes(&v), b"\"abcd\"".to_vec());
    }

    #[test]
    fn no_insignificant_whitespace() {
        let v = CanonicalValue::Map(vec![("a", CanonicalValue::Int(1))]);
        assert_eq!(to_canonical_bytes(&v), br#"{"a":1}"#.to_vec());
    }
}
