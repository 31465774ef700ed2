//! Validation of the merged configuration
//!
//! A [`SettingsValidator`] turns a [`MergedConfig`] into typed settings or
//! rejects it. Closures of the form `Fn(&MergedConfig) -> Result<S, E>`
//! implement the trait directly; [`SerdeValidator`] deserializes into any
//! `DeserializeOwned` type.
//!
//! Every merged value is a string. `SerdeValidator` coerces leaves to the
//! type the target asks for:
//!
//! - `bool`: `true/false`, `1/0`, `yes/no`, `on/off` (any case)
//! - integers and floats: parsed from the trimmed string
//! - `Option<T>`: the empty string is `None`
//! - sequences: a JSON array (`["a","b"]`) or a comma-separated list
//! - enums: unit variants by name
//!
//! Coercion errors never echo the offending value.
//!
//! Coercion follows the type the target asks for. Targets that buffer input
//! before deciding on a type, namely `#[serde(flatten)]` fields and
//! `#[serde(untagged)]` enums, receive leaves as plain strings; `bool` or
//! number fields behind them fail to deserialize. Use `String` fields there,
//! or a closure validator.

use crate::merge::{MergedConfig, NestedValue};
use serde::de::value::{MapAccessDeserializer, MapDeserializer, SeqDeserializer, StrDeserializer};
use serde::de::{self, DeserializeOwned, Deserializer as _, Error as _, IntoDeserializer, Unexpected, Visitor};
use serde::forward_to_deserialize_any;
use std::marker::PhantomData;
use thiserror::Error;

type DeError = de::value::Error;

/// Validates a merged configuration into typed settings
pub trait SettingsValidator: Send + Sync {
    type Settings;
    type Error: std::error::Error + Send + Sync + 'static;

    fn validate(&self, merged: &MergedConfig) -> Result<Self::Settings, Self::Error>;
}

impl<F, S, E> SettingsValidator for F
where
    F: Fn(&MergedConfig) -> Result<S, E> + Send + Sync,
    E: std::error::Error + Send + Sync + 'static,
{
    type Settings = S;
    type Error = E;

    fn validate(&self, merged: &MergedConfig) -> Result<S, E> {
        self(merged)
    }
}

/// The merged configuration does not fit the target type
#[derive(Error, Debug, Clone, PartialEq)]
#[error("settings do not match schema: {0}")]
pub struct SchemaError(#[from] DeError);

/// Validator that deserializes into `T`
pub struct SerdeValidator<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> SerdeValidator<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for SerdeValidator<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for SerdeValidator<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for SerdeValidator<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerdeValidator")
            .field("target", &std::any::type_name::<T>())
            .finish()
    }
}

impl<T: DeserializeOwned> SettingsValidator for SerdeValidator<T> {
    type Settings = T;
    type Error = SchemaError;

    fn validate(&self, merged: &MergedConfig) -> Result<T, SchemaError> {
        from_nested(merged.root())
    }
}

/// Deserialize `T` from a tree, coercing string leaves
pub fn from_nested<T: DeserializeOwned>(value: &NestedValue) -> Result<T, SchemaError> {
    Ok(T::deserialize(ValueDeserializer { value })?)
}

// ============================================================================
// Tree deserializer
// ============================================================================

struct ValueDeserializer<'a> {
    value: &'a NestedValue,
}

impl<'a> ValueDeserializer<'a> {
    fn visit_tree<'de, V: Visitor<'de>>(
        map: &'a std::collections::BTreeMap<String, NestedValue>,
        visitor: V,
    ) -> Result<V::Value, DeError> {
        let mut access: MapDeserializer<'de, _, DeError> = MapDeserializer::new(
            map.iter()
                .map(|(k, v)| (k.as_str(), ValueDeserializer { value: v })),
        );
        let value = visitor.visit_map(&mut access)?;
        access.end()?;
        Ok(value)
    }
}

macro_rules! leaf_or_any {
    ($($method:ident)*) => {$(
        fn $method<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
            match self.value {
                NestedValue::Leaf(s) => LeafDeserializer { value: s }.$method(visitor),
                NestedValue::Map(_) => self.deserialize_any(visitor),
            }
        }
    )*};
}

impl<'de, 'a> de::Deserializer<'de> for ValueDeserializer<'a> {
    type Error = DeError;

    fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DeError> {
        match self.value {
            NestedValue::Leaf(s) => visitor.visit_str(s),
            NestedValue::Map(map) => Self::visit_tree(map, visitor),
        }
    }

    leaf_or_any! {
        deserialize_bool deserialize_i8 deserialize_i16 deserialize_i32 deserialize_i64
        deserialize_i128 deserialize_u8 deserialize_u16 deserialize_u32 deserialize_u64
        deserialize_u128 deserialize_f32 deserialize_f64 deserialize_char deserialize_str
        deserialize_string deserialize_bytes deserialize_byte_buf deserialize_unit
        deserialize_seq
    }

    fn deserialize_option<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DeError> {
        match self.value {
            NestedValue::Leaf(s) if s.is_empty() => visitor.visit_none(),
            _ => visitor.visit_some(self),
        }
    }

    fn deserialize_unit_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value, DeError> {
        self.deserialize_unit(visitor)
    }

    fn deserialize_newtype_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value, DeError> {
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_tuple<V: Visitor<'de>>(self, _len: usize, visitor: V) -> Result<V::Value, DeError> {
        self.deserialize_seq(visitor)
    }

    fn deserialize_tuple_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _len: usize,
        visitor: V,
    ) -> Result<V::Value, DeError> {
        self.deserialize_seq(visitor)
    }

    fn deserialize_map<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DeError> {
        match self.value {
            NestedValue::Map(map) => Self::visit_tree(map, visitor),
            NestedValue::Leaf(s) => LeafDeserializer { value: s }.deserialize_map(visitor),
        }
    }

    fn deserialize_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, DeError> {
        self.deserialize_map(visitor)
    }

    fn deserialize_enum<V: Visitor<'de>>(
        self,
        name: &'static str,
        variants: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, DeError> {
        match self.value {
            NestedValue::Leaf(s) => {
                LeafDeserializer { value: s }.deserialize_enum(name, variants, visitor)
            }
            NestedValue::Map(map) => {
                let access: MapDeserializer<'de, _, DeError> = MapDeserializer::new(
                    map.iter()
                        .map(|(k, v)| (k.as_str(), ValueDeserializer { value: v })),
                );
                visitor.visit_enum(MapAccessDeserializer::new(access))
            }
        }
    }

    fn deserialize_identifier<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DeError> {
        self.deserialize_any(visitor)
    }

    fn deserialize_ignored_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DeError> {
        visitor.visit_unit()
    }
}

impl<'de, 'a> IntoDeserializer<'de, DeError> for ValueDeserializer<'a> {
    type Deserializer = Self;

    fn into_deserializer(self) -> Self {
        self
    }
}

// ============================================================================
// Leaf deserializer
// ============================================================================

#[derive(Clone, Copy)]
struct LeafDeserializer<'a> {
    value: &'a str,
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

macro_rules! parse_number {
    ($($method:ident => $ty:ty, $visit:ident, $what:literal;)*) => {$(
        fn $method<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
            match self.value.trim().parse::<$ty>() {
                Ok(n) => visitor.$visit(n),
                Err(_) => Err(DeError::invalid_value(Unexpected::Other($what), &visitor)),
            }
        }
    )*};
}

impl<'a> LeafDeserializer<'a> {
    fn from_json<'de, V: Visitor<'de>>(self, visitor: V, as_seq: bool) -> Result<V::Value, DeError> {
        let value: serde_json::Value = serde_json::from_str(self.value)
            .map_err(|e| DeError::custom(format!("invalid JSON at column {}", e.column())))?;
        let result = if as_seq {
            de::Deserializer::deserialize_seq(value, visitor)
        } else {
            de::Deserializer::deserialize_map(value, visitor)
        };
        result.map_err(DeError::custom)
    }
}

impl<'de, 'a> de::Deserializer<'de> for LeafDeserializer<'a> {
    type Error = DeError;

    fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DeError> {
        visitor.visit_str(self.value)
    }

    fn deserialize_bool<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DeError> {
        match parse_bool(self.value) {
            Some(b) => visitor.visit_bool(b),
            None => Err(DeError::invalid_value(Unexpected::Other("non-boolean string"), &visitor)),
        }
    }

    parse_number! {
        deserialize_i8 => i64, visit_i64, "non-integer string";
        deserialize_i16 => i64, visit_i64, "non-integer string";
        deserialize_i32 => i64, visit_i64, "non-integer string";
        deserialize_i64 => i64, visit_i64, "non-integer string";
        deserialize_i128 => i128, visit_i128, "non-integer string";
        deserialize_u8 => u64, visit_u64, "non-integer string";
        deserialize_u16 => u64, visit_u64, "non-integer string";
        deserialize_u32 => u64, visit_u64, "non-integer string";
        deserialize_u64 => u64, visit_u64, "non-integer string";
        deserialize_u128 => u128, visit_u128, "non-integer string";
        deserialize_f32 => f64, visit_f64, "non-numeric string";
        deserialize_f64 => f64, visit_f64, "non-numeric string";
    }

    fn deserialize_option<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DeError> {
        if self.value.is_empty() {
            visitor.visit_none()
        } else {
            visitor.visit_some(self)
        }
    }

    fn deserialize_unit<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DeError> {
        if self.value.is_empty() {
            visitor.visit_unit()
        } else {
            Err(DeError::invalid_value(Unexpected::Other("non-empty string"), &visitor))
        }
    }

    fn deserialize_unit_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value, DeError> {
        self.deserialize_unit(visitor)
    }

    fn deserialize_newtype_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value, DeError> {
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_seq<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DeError> {
        let trimmed = self.value.trim();
        if trimmed.starts_with('[') {
            return self.from_json(visitor, true);
        }

        let items: Vec<LeafDeserializer<'a>> = if trimmed.is_empty() {
            Vec::new()
        } else {
            trimmed
                .split(',')
                .map(|item| LeafDeserializer { value: item.trim() })
                .collect()
        };

        let mut access: SeqDeserializer<_, DeError> = SeqDeserializer::new(items.into_iter());
        let value = visitor.visit_seq(&mut access)?;
        access.end()?;
        Ok(value)
    }

    fn deserialize_tuple<V: Visitor<'de>>(self, _len: usize, visitor: V) -> Result<V::Value, DeError> {
        self.deserialize_seq(visitor)
    }

    fn deserialize_tuple_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _len: usize,
        visitor: V,
    ) -> Result<V::Value, DeError> {
        self.deserialize_seq(visitor)
    }

    fn deserialize_map<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DeError> {
        if self.value.trim().starts_with('{') {
            self.from_json(visitor, false)
        } else {
            Err(DeError::invalid_type(Unexpected::Other("plain string"), &visitor))
        }
    }

    fn deserialize_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, DeError> {
        self.deserialize_map(visitor)
    }

    fn deserialize_enum<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _variants: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, DeError> {
        let variant: StrDeserializer<'a, DeError> = self.value.trim().into_deserializer();
        visitor.visit_enum(variant)
    }

    fn deserialize_ignored_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DeError> {
        visitor.visit_unit()
    }

    forward_to_deserialize_any! {
        char str string bytes byte_buf identifier
    }
}

impl<'de, 'a> IntoDeserializer<'de, DeError> for LeafDeserializer<'a> {
    type Deserializer = Self;

    fn into_deserializer(self) -> Self {
        self
    }
}
