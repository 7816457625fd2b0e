// Copyright (c) 2015-2021 Georg Brandl.  Licensed under the Apache License,
// Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at
// your option. This file may not be copied, modified, or distributed except
// according to those terms.

//! Serializer/Deserializer implementations for `value::Value`.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use std::vec;
use num_bigint::BigInt;
use num_traits::ToPrimitive;
use serde::{ser, de};
use serde::ser::{Serialize, Serializer as _};
use serde::de::{Deserializer as _, DeserializeOwned, DeserializeSeed, Visitor};

use crate::value::{Value, HashableValue};
use crate::error::{Error, ErrorCode, Result};

impl<'de> de::Deserialize<'de> for Value {
    #[inline]
    fn deserialize<D: de::Deserializer<'de>>(deser: D) -> std::result::Result<Value, D::Error> {
        struct ValueVisitor;

        impl<'de> Visitor<'de> for ValueVisitor {
            type Value = Value;

            fn expecting(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
                fmt.write_str("any valid value")
            }

            #[inline]
            fn visit_bool<E>(self, value: bool) -> std::result::Result<Value, E> {
                Ok(Value::Bool(value))
            }

            #[inline]
            fn visit_i64<E>(self, value: i64) -> std::result::Result<Value, E> {
                Ok(Value::I64(value))
            }

            #[inline]
            fn visit_u64<E>(self, value: u64) -> std::result::Result<Value, E> {
                Ok(u64_value(value))
            }

            #[inline]
            fn visit_f64<E>(self, value: f64) -> std::result::Result<Value, E> {
                Ok(Value::F64(value))
            }

            #[inline]
            fn visit_str<E: de::Error>(self, value: &str) -> std::result::Result<Value, E> {
                self.visit_string(String::from(value))
            }

            #[inline]
            fn visit_string<E>(self, value: String) -> std::result::Result<Value, E> {
                Ok(Value::String(value))
            }

            #[inline]
            fn visit_bytes<E: de::Error>(self, value: &[u8]) -> std::result::Result<Value, E> {
                self.visit_byte_buf(value.to_vec())
            }

            #[inline]
            fn visit_byte_buf<E: de::Error>(self, value: Vec<u8>) -> std::result::Result<Value, E> {
                Ok(Value::Bytes(value))
            }

            #[inline]
            fn visit_none<E>(self) -> std::result::Result<Value, E> {
                Ok(Value::None)
            }

            #[inline]
            fn visit_some<D: de::Deserializer<'de>>(self, deser: D)
                                                    -> std::result::Result<Value, D::Error> {
                de::Deserialize::deserialize(deser)
            }

            #[inline]
            fn visit_unit<E>(self) -> std::result::Result<Value, E> {
                Ok(Value::None)
            }

            #[inline]
            fn visit_seq<A: de::SeqAccess<'de>>(self, mut visitor: A)
                                                -> std::result::Result<Value, A::Error> {
                let mut values = Vec::with_capacity(visitor.size_hint().unwrap_or(0));
                while let Some(elem) = visitor.next_element()? {
                    values.push(elem);
                }
                Ok(Value::list(values))
            }

            #[inline]
            fn visit_map<A: de::MapAccess<'de>>(self, mut visitor: A)
                                                -> std::result::Result<Value, A::Error> {
                let mut values = BTreeMap::new();
                while let Some((key, value)) = visitor.next_entry::<HashableValue, Value>()? {
                    values.insert(key, value);
                }
                Ok(Value::Dict(Rc::new(RefCell::new(values))))
            }
        }

        deser.deserialize_any(ValueVisitor)
    }
}

impl<'de> de::Deserialize<'de> for HashableValue {
    #[inline]
    fn deserialize<D: de::Deserializer<'de>>(deser: D)
                                             -> std::result::Result<HashableValue, D::Error> {
        struct ValueVisitor;

        impl<'de> Visitor<'de> for ValueVisitor {
            type Value = HashableValue;

            fn expecting(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
                fmt.write_str("a hashable value")
            }

            #[inline]
            fn visit_bool<E>(self, value: bool) -> std::result::Result<HashableValue, E> {
                Ok(HashableValue::Bool(value))
            }

            #[inline]
            fn visit_i64<E>(self, value: i64) -> std::result::Result<HashableValue, E> {
                Ok(HashableValue::I64(value))
            }

            #[inline]
            fn visit_u64<E>(self, value: u64) -> std::result::Result<HashableValue, E> {
                if value <= i64::MAX as u64 {
                    Ok(HashableValue::I64(value as i64))
                } else {
                    Ok(HashableValue::Int(BigInt::from(value)))
                }
            }

            #[inline]
            fn visit_f64<E>(self, value: f64) -> std::result::Result<HashableValue, E> {
                Ok(HashableValue::F64(value))
            }

            #[inline]
            fn visit_str<E: de::Error>(self, value: &str) -> std::result::Result<HashableValue, E> {
                self.visit_string(String::from(value))
            }

            #[inline]
            fn visit_string<E>(self, value: String) -> std::result::Result<HashableValue, E> {
                Ok(HashableValue::String(value))
            }

            #[inline]
            fn visit_bytes<E: de::Error>(self, value: &[u8])
                                         -> std::result::Result<HashableValue, E> {
                Ok(HashableValue::Bytes(value.to_vec()))
            }

            #[inline]
            fn visit_byte_buf<E>(self, value: Vec<u8>) -> std::result::Result<HashableValue, E> {
                Ok(HashableValue::Bytes(value))
            }

            #[inline]
            fn visit_none<E>(self) -> std::result::Result<HashableValue, E> {
                Ok(HashableValue::None)
            }

            #[inline]
            fn visit_some<D: de::Deserializer<'de>>(self, deser: D)
                                                    -> std::result::Result<HashableValue, D::Error> {
                de::Deserialize::deserialize(deser)
            }

            #[inline]
            fn visit_unit<E>(self) -> std::result::Result<HashableValue, E> {
                Ok(HashableValue::None)
            }

            #[inline]
            fn visit_seq<A: de::SeqAccess<'de>>(self, mut visitor: A)
                                                -> std::result::Result<HashableValue, A::Error> {
                let mut values = Vec::new();
                while let Some(elem) = visitor.next_element()? {
                    values.push(elem);
                }
                Ok(HashableValue::Tuple(values))
            }
        }

        deser.deserialize_any(ValueVisitor)
    }
}

fn u64_value(value: u64) -> Value {
    if value <= i64::MAX as u64 {
        Value::I64(value as i64)
    } else {
        Value::Int(BigInt::from(value))
    }
}

/// Deserializes from a Value graph.
///
/// Shared subobjects are visited once per reference.  A container reached
/// again while it is being deserialized is an `ErrorCode::Recursive` error,
/// since serde data types are trees.
struct Deserializer<'a> {
    value: Value,
    /// Identities of the containers currently being visited.
    active: &'a mut Vec<usize>,
}

fn guarded<T, F>(active: &mut Vec<usize>, addr: Option<usize>, f: F) -> Result<T>
    where F: FnOnce(&mut Vec<usize>) -> Result<T>
{
    let addr = match addr {
        Some(addr) => addr,
        None => return f(active),
    };
    if active.contains(&addr) {
        return Err(Error::Syntax(ErrorCode::Recursive));
    }
    active.push(addr);
    let result = f(active);
    active.pop();
    result
}

fn visit_items<'de, V: Visitor<'de>>(items: Vec<Value>, active: &mut Vec<usize>, visitor: V)
                                     -> Result<V::Value> {
    let len = items.len();
    let mut seq = SeqDeserializer { iter: items.into_iter(), active };
    let result = visitor.visit_seq(&mut seq)?;
    if seq.iter.len() == 0 {
        Ok(result)
    } else {
        Err(de::Error::invalid_length(len, &"fewer elements in sequence"))
    }
}

fn visit_pairs<'de, V: Visitor<'de>>(pairs: Vec<(Value, Value)>, active: &mut Vec<usize>,
                                     visitor: V) -> Result<V::Value> {
    let len = pairs.len();
    let mut map = MapDeserializer { iter: pairs.into_iter(), value: None, active };
    let result = visitor.visit_map(&mut map)?;
    if map.iter.len() == 0 {
        Ok(result)
    } else {
        Err(de::Error::invalid_length(len, &"fewer elements in map"))
    }
}

impl<'de, 'a> de::Deserializer<'de> for Deserializer<'a> {
    type Error = Error;

    fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        let addr = self.value.identity();
        let active = self.active;
        match self.value {
            Value::None => visitor.visit_unit(),
            Value::Bool(v) => visitor.visit_bool(v),
            Value::I64(v) => visitor.visit_i64(v),
            Value::Int(v) => {
                if let Some(i) = v.to_i64() {
                    visitor.visit_i64(i)
                } else if let Some(u) = v.to_u64() {
                    visitor.visit_u64(u)
                } else {
                    Err(de::Error::custom("integer too large"))
                }
            }
            Value::F64(v) => visitor.visit_f64(v),
            Value::Bytes(v) => visitor.visit_byte_buf(v),
            Value::String(v) => visitor.visit_string(v),
            Value::List(v) => {
                let items = v.borrow().clone();
                guarded(active, addr, |active| visit_items(items, active, visitor))
            }
            Value::Tuple(v) => {
                let items = v.to_vec();
                guarded(active, addr, |active| visit_items(items, active, visitor))
            }
            Value::Set(v) => {
                let items: Vec<Value> = v.borrow().iter().cloned().map(HashableValue::into_value).collect();
                guarded(active, addr, |active| visit_items(items, active, visitor))
            }
            Value::FrozenSet(v) => {
                let items: Vec<Value> = v.iter().cloned().map(HashableValue::into_value).collect();
                guarded(active, addr, |active| visit_items(items, active, visitor))
            }
            Value::Dict(v) => {
                let pairs: Vec<(Value, Value)> = v.borrow().iter()
                             .map(|(k, v)| (k.clone().into_value(), v.clone()))
                             .collect();
                guarded(active, addr, |active| visit_pairs(pairs, active, visitor))
            }
            Value::Global(g) => visitor.visit_string(g.qualified_name()),
            Value::Object(o) => {
                // Instances are replaced by their state.
                let obj = o.borrow().clone();
                guarded(active, addr, |active| match obj.state {
                    Some(state) => Deserializer { value: state, active }.deserialize_any(visitor),
                    None if !obj.dict_items.is_empty() => visit_pairs(obj.dict_items, active, visitor),
                    None => visit_items(obj.list_items, active, visitor),
                })
            }
            Value::Host(h) => {
                let (module, name) = h.class_name();
                Err(de::Error::custom(format!("cannot deserialize {}.{} object", module, name)))
            }
        }
    }

    #[inline]
    fn deserialize_option<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        match self.value {
            Value::None => visitor.visit_none(),
            _ => visitor.visit_some(self),
        }
    }

    #[inline]
    fn deserialize_unit<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        match self.value {
            Value::Tuple(ref t) if t.is_empty() => visitor.visit_unit(),
            _ => self.deserialize_any(visitor),
        }
    }

    #[inline]
    fn deserialize_unit_struct<V: Visitor<'de>>(self, _name: &'static str, visitor: V)
                                                -> Result<V::Value> {
        self.deserialize_unit(visitor)
    }

    #[inline]
    fn deserialize_newtype_struct<V: Visitor<'de>>(self, _name: &'static str, visitor: V)
                                                   -> Result<V::Value> {
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_enum<V: Visitor<'de>>(self, _name: &'static str,
                                         _variants: &'static [&'static str],
                                         visitor: V) -> Result<V::Value> {
        // Accept ("Variant", data), ("Variant",), "Variant" and {"Variant": data}.
        let (variant, data) = match self.value {
            Value::Tuple(ref t) if t.len() == 1 || t.len() == 2 =>
                (t[0].clone(), t.get(1).cloned()),
            Value::String(_) => (self.value.clone(), None),
            Value::Dict(ref d) if d.borrow().len() == 1 => {
                let entry = d.borrow().iter().next()
                             .map(|(k, v)| (k.clone().into_value(), Some(v.clone())));
                match entry {
                    Some(entry) => entry,
                    None => return Err(de::Error::custom("enums must be tuples")),
                }
            }
            _ => return Err(de::Error::custom("enums must be tuples")),
        };
        visitor.visit_enum(EnumDeserializer { variant, data, active: self.active })
    }

    serde::forward_to_deserialize_any! {
        bool i8 i16 i32 i64 i128 u8 u16 u32 u64 u128 f32 f64 char str string
        bytes byte_buf seq tuple tuple_struct map struct identifier ignored_any
    }
}

struct SeqDeserializer<'a> {
    iter: vec::IntoIter<Value>,
    active: &'a mut Vec<usize>,
}

impl<'de, 'a, 'b> de::SeqAccess<'de> for &'b mut SeqDeserializer<'a> {
    type Error = Error;

    fn next_element_seed<T: DeserializeSeed<'de>>(&mut self, seed: T) -> Result<Option<T::Value>> {
        match self.iter.next() {
            Some(value) => seed.deserialize(Deserializer { value, active: &mut *self.active })
                               .map(Some),
            None => Ok(None),
        }
    }

    fn size_hint(&self) -> Option<usize> {
        Some(self.iter.len())
    }
}

struct MapDeserializer<'a> {
    iter: vec::IntoIter<(Value, Value)>,
    value: Option<Value>,
    active: &'a mut Vec<usize>,
}

impl<'de, 'a, 'b> de::MapAccess<'de> for &'b mut MapDeserializer<'a> {
    type Error = Error;

    fn next_key_seed<T: DeserializeSeed<'de>>(&mut self, seed: T) -> Result<Option<T::Value>> {
        match self.iter.next() {
            Some((key, value)) => {
                self.value = Some(value);
                seed.deserialize(Deserializer { value: key, active: &mut *self.active }).map(Some)
            }
            None => Ok(None),
        }
    }

    fn next_value_seed<T: DeserializeSeed<'de>>(&mut self, seed: T) -> Result<T::Value> {
        match self.value.take() {
            Some(value) => seed.deserialize(Deserializer { value, active: &mut *self.active }),
            None => Err(de::Error::custom("value requested before key")),
        }
    }

    fn size_hint(&self) -> Option<usize> {
        Some(self.iter.len())
    }
}

struct EnumDeserializer<'a> {
    variant: Value,
    data: Option<Value>,
    active: &'a mut Vec<usize>,
}

impl<'de, 'a> de::EnumAccess<'de> for EnumDeserializer<'a> {
    type Error = Error;
    type Variant = VariantDeserializer<'a>;

    fn variant_seed<V: DeserializeSeed<'de>>(self, seed: V)
                                             -> Result<(V::Value, VariantDeserializer<'a>)> {
        let active = self.active;
        let variant = seed.deserialize(Deserializer { value: self.variant, active: &mut *active })?;
        Ok((variant, VariantDeserializer { data: self.data, active }))
    }
}

struct VariantDeserializer<'a> {
    data: Option<Value>,
    active: &'a mut Vec<usize>,
}

impl<'a> VariantDeserializer<'a> {
    fn into_data(self) -> Result<Deserializer<'a>> {
        match self.data {
            Some(value) => Ok(Deserializer { value, active: self.active }),
            None => Err(de::Error::invalid_type(de::Unexpected::UnitVariant, &"variant data")),
        }
    }
}

impl<'de, 'a> de::VariantAccess<'de> for VariantDeserializer<'a> {
    type Error = Error;

    fn unit_variant(self) -> Result<()> {
        Ok(())
    }

    fn newtype_variant_seed<T: DeserializeSeed<'de>>(self, seed: T) -> Result<T::Value> {
        seed.deserialize(self.into_data()?)
    }

    fn tuple_variant<V: Visitor<'de>>(self, _len: usize, visitor: V) -> Result<V::Value> {
        de::Deserializer::deserialize_any(self.into_data()?, visitor)
    }

    fn struct_variant<V: Visitor<'de>>(self, _fields: &'static [&'static str], visitor: V)
                                       -> Result<V::Value> {
        de::Deserializer::deserialize_any(self.into_data()?, visitor)
    }
}

/// Serializes into a Value graph.
struct Serializer;

enum SeqKind {
    List,
    Tuple,
    Variant(&'static str),
}

struct SerializeVec {
    items: Vec<Value>,
    kind: SeqKind,
}

struct SerializeDict {
    map: BTreeMap<HashableValue, Value>,
    key: Option<HashableValue>,
    variant: Option<&'static str>,
}

fn variant(name: &str, data: Value) -> Value {
    Value::tuple(vec![Value::String(name.into()), data])
}

impl ser::Serializer for Serializer {
    type Ok = Value;
    type Error = Error;

    type SerializeSeq = SerializeVec;
    type SerializeTuple = SerializeVec;
    type SerializeTupleStruct = SerializeVec;
    type SerializeTupleVariant = SerializeVec;
    type SerializeMap = SerializeDict;
    type SerializeStruct = SerializeDict;
    type SerializeStructVariant = SerializeDict;

    #[inline]
    fn serialize_bool(self, value: bool) -> Result<Value> {
        Ok(Value::Bool(value))
    }

    #[inline]
    fn serialize_i8(self, v: i8) -> Result<Value> {
        self.serialize_i64(v as i64)
    }

    #[inline]
    fn serialize_i16(self, v: i16) -> Result<Value> {
        self.serialize_i64(v as i64)
    }

    #[inline]
    fn serialize_i32(self, v: i32) -> Result<Value> {
        self.serialize_i64(v as i64)
    }

    #[inline]
    fn serialize_i64(self, value: i64) -> Result<Value> {
        Ok(Value::I64(value))
    }

    fn serialize_i128(self, value: i128) -> Result<Value> {
        match value.to_i64() {
            Some(v) => Ok(Value::I64(v)),
            None => Ok(Value::Int(BigInt::from(value))),
        }
    }

    #[inline]
    fn serialize_u8(self, v: u8) -> Result<Value> {
        self.serialize_u64(v as u64)
    }

    #[inline]
    fn serialize_u16(self, v: u16) -> Result<Value> {
        self.serialize_u64(v as u64)
    }

    #[inline]
    fn serialize_u32(self, v: u32) -> Result<Value> {
        self.serialize_u64(v as u64)
    }

    #[inline]
    fn serialize_u64(self, value: u64) -> Result<Value> {
        Ok(u64_value(value))
    }

    fn serialize_u128(self, value: u128) -> Result<Value> {
        match value.to_i64() {
            Some(v) => Ok(Value::I64(v)),
            None => Ok(Value::Int(BigInt::from(value))),
        }
    }

    #[inline]
    fn serialize_f32(self, value: f32) -> Result<Value> {
        self.serialize_f64(value as f64)
    }

    #[inline]
    fn serialize_f64(self, value: f64) -> Result<Value> {
        Ok(Value::F64(value))
    }

    #[inline]
    fn serialize_char(self, value: char) -> Result<Value> {
        Ok(Value::String(value.to_string()))
    }

    #[inline]
    fn serialize_str(self, value: &str) -> Result<Value> {
        Ok(Value::String(String::from(value)))
    }

    #[inline]
    fn serialize_bytes(self, value: &[u8]) -> Result<Value> {
        Ok(Value::Bytes(value.to_vec()))
    }

    #[inline]
    fn serialize_none(self) -> Result<Value> {
        self.serialize_unit()
    }

    #[inline]
    fn serialize_some<T: Serialize + ?Sized>(self, value: &T) -> Result<Value> {
        value.serialize(self)
    }

    #[inline]
    fn serialize_unit(self) -> Result<Value> {
        Ok(Value::None)
    }

    #[inline]
    fn serialize_unit_struct(self, _name: &'static str) -> Result<Value> {
        Ok(Value::tuple(vec![]))
    }

    #[inline]
    fn serialize_unit_variant(self, _name: &'static str, _variant_index: u32,
                              variant: &'static str) -> Result<Value> {
        Ok(Value::tuple(vec![Value::String(variant.into())]))
    }

    #[inline]
    fn serialize_newtype_struct<T: Serialize + ?Sized>(self, _name: &'static str, value: &T)
                                                       -> Result<Value> {
        value.serialize(self)
    }

    #[inline]
    fn serialize_newtype_variant<T: Serialize + ?Sized>(self, _name: &'static str,
                                                        _variant_index: u32,
                                                        name: &'static str,
                                                        value: &T) -> Result<Value> {
        Ok(variant(name, to_value(value)?))
    }

    #[inline]
    fn serialize_seq(self, len: Option<usize>) -> Result<SerializeVec> {
        Ok(SerializeVec { items: Vec::with_capacity(len.unwrap_or(0)), kind: SeqKind::List })
    }

    #[inline]
    fn serialize_tuple(self, len: usize) -> Result<SerializeVec> {
        Ok(SerializeVec { items: Vec::with_capacity(len), kind: SeqKind::Tuple })
    }

    #[inline]
    fn serialize_tuple_struct(self, _name: &'static str, len: usize) -> Result<SerializeVec> {
        self.serialize_tuple(len)
    }

    #[inline]
    fn serialize_tuple_variant(self, _name: &'static str, _variant_index: u32,
                               name: &'static str, len: usize) -> Result<SerializeVec> {
        Ok(SerializeVec { items: Vec::with_capacity(len), kind: SeqKind::Variant(name) })
    }

    #[inline]
    fn serialize_map(self, _len: Option<usize>) -> Result<SerializeDict> {
        Ok(SerializeDict { map: BTreeMap::new(), key: None, variant: None })
    }

    #[inline]
    fn serialize_struct(self, _name: &'static str, len: usize) -> Result<SerializeDict> {
        self.serialize_map(Some(len))
    }

    #[inline]
    fn serialize_struct_variant(self, _name: &'static str, _variant_index: u32,
                                name: &'static str, _len: usize) -> Result<SerializeDict> {
        Ok(SerializeDict { map: BTreeMap::new(), key: None, variant: Some(name) })
    }
}

impl SerializeVec {
    fn push<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        self.items.push(to_value(value)?);
        Ok(())
    }

    fn finish(self) -> Value {
        match self.kind {
            SeqKind::List => Value::list(self.items),
            SeqKind::Tuple => Value::tuple(self.items),
            SeqKind::Variant(name) => variant(name, Value::list(self.items)),
        }
    }
}

impl ser::SerializeSeq for SerializeVec {
    type Ok = Value;
    type Error = Error;

    fn serialize_element<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        self.push(value)
    }

    fn end(self) -> Result<Value> {
        Ok(self.finish())
    }
}

impl ser::SerializeTuple for SerializeVec {
    type Ok = Value;
    type Error = Error;

    fn serialize_element<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        self.push(value)
    }

    fn end(self) -> Result<Value> {
        Ok(self.finish())
    }
}

impl ser::SerializeTupleStruct for SerializeVec {
    type Ok = Value;
    type Error = Error;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        self.push(value)
    }

    fn end(self) -> Result<Value> {
        Ok(self.finish())
    }
}

impl ser::SerializeTupleVariant for SerializeVec {
    type Ok = Value;
    type Error = Error;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        self.push(value)
    }

    fn end(self) -> Result<Value> {
        Ok(self.finish())
    }
}

impl SerializeDict {
    fn insert<T: Serialize + ?Sized>(&mut self, key: &'static str, value: &T) -> Result<()> {
        self.map.insert(HashableValue::String(key.into()), to_value(value)?);
        Ok(())
    }

    fn finish(self) -> Value {
        let dict = Value::Dict(Rc::new(RefCell::new(self.map)));
        match self.variant {
            Some(name) => variant(name, dict),
            None => dict,
        }
    }
}

impl ser::SerializeMap for SerializeDict {
    type Ok = Value;
    type Error = Error;

    fn serialize_key<T: Serialize + ?Sized>(&mut self, key: &T) -> Result<()> {
        self.key = Some(to_value(key)?.into_hashable()?);
        Ok(())
    }

    fn serialize_value<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        match self.key.take() {
            Some(key) => {
                self.map.insert(key, to_value(value)?);
                Ok(())
            }
            None => Err(ser::Error::custom("map value serialized before its key")),
        }
    }

    fn end(self) -> Result<Value> {
        Ok(self.finish())
    }
}

impl ser::SerializeStruct for SerializeDict {
    type Ok = Value;
    type Error = Error;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, key: &'static str, value: &T)
                                              -> Result<()> {
        self.insert(key, value)
    }

    fn end(self) -> Result<Value> {
        Ok(self.finish())
    }
}

impl ser::SerializeStructVariant for SerializeDict {
    type Ok = Value;
    type Error = Error;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, key: &'static str, value: &T)
                                              -> Result<()> {
        self.insert(key, value)
    }

    fn end(self) -> Result<Value> {
        Ok(self.finish())
    }
}

/// Serialize any serde serializable object into a `value::Value`.
pub fn to_value<T: Serialize + ?Sized>(value: &T) -> Result<Value> {
    value.serialize(Serializer)
}

/// Deserialize a `value::Value` into any serde deserializable object.
pub fn from_value<T: DeserializeOwned>(value: Value) -> Result<T> {
    let mut active = Vec::new();
    T::deserialize(Deserializer { value, active: &mut active })
}
