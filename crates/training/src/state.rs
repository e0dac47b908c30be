//! Parameter name -> shape view of a burn record.
//!
//! Burn records serialize tensors as `{ bytes, shape, dtype }` and parameters as `{ id, param }`.
//! Serializing an item into a `Node` tree that keeps structure, small integers and strings but
//! drops byte payloads gives a name-keyed view (`encoder.0.weight`) that can be compared across a
//! stored checkpoint and a freshly built module before any state is applied.

use std::collections::BTreeMap;
use std::fmt::Display;

use burn::module::Module;
use burn::record::{FullPrecisionSettings, Record};
use burn::tensor::backend::Backend;
use serde::ser::{self, Serialize};
use thiserror::Error;

use crate::error::{TrainingError, TrainingResult};

/// Numeric sequences longer than this are kept as [`Node::Opaque`].
const MAX_INLINE_SCALARS: usize = 32;

#[derive(Debug, Error)]
#[error("{0}")]
pub struct SignatureError(String);

impl ser::Error for SignatureError {
    fn custom<T: Display>(msg: T) -> Self {
        SignatureError(msg.to_string())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateSignature {
    shapes: BTreeMap<String, Vec<usize>>,
}

impl StateSignature {
    /// Signature of any serialized record item.
    pub fn from_item<T: Serialize + ?Sized>(item: &T) -> Result<Self, SignatureError> {
        let node = item.serialize(NodeSerializer)?;
        let mut shapes = BTreeMap::new();
        collect(&node, "", &mut shapes);
        Ok(Self { shapes })
    }

    /// Signature of a live module's current parameters.
    pub fn of_module<B: Backend, M: Module<B>>(model: &M) -> Result<Self, SignatureError> {
        let item = model
            .clone()
            .into_record()
            .into_item::<FullPrecisionSettings>();
        Self::from_item(&item)
    }

    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }

    pub fn shape(&self, name: &str) -> Option<&[usize]> {
        self.shapes.get(name).map(Vec::as_slice)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.shapes.keys().map(String::as_str)
    }

    /// Check that `stored` carries exactly this signature's names, each with the same shape.
    pub fn ensure_matches(&self, stored: &StateSignature) -> TrainingResult<()> {
        let missing: Vec<String> = self
            .shapes
            .keys()
            .filter(|k| !stored.shapes.contains_key(*k))
            .cloned()
            .collect();
        let unexpected: Vec<String> = stored
            .shapes
            .keys()
            .filter(|k| !self.shapes.contains_key(*k))
            .cloned()
            .collect();
        if !missing.is_empty() || !unexpected.is_empty() {
            return Err(TrainingError::KeyMismatch {
                missing,
                unexpected,
            });
        }
        for (name, expected) in &self.shapes {
            let found = &stored.shapes[name];
            if expected != found {
                return Err(TrainingError::ShapeMismatch {
                    name: name.clone(),
                    expected: expected.clone(),
                    found: found.clone(),
                });
            }
        }
        Ok(())
    }
}

fn join(prefix: &str, segment: &str) -> String {
    if prefix.is_empty() {
        segment.to_string()
    } else {
        format!("{prefix}.{segment}")
    }
}

/// Structure of a serialized value with payloads dropped.
#[derive(Debug, Clone, PartialEq)]
enum Node {
    Scalar,
    Uint(u64),
    Text(String),
    /// Byte buffers and long numeric runs.
    Opaque,
    Seq(Vec<Node>),
    Fields(Vec<(String, Node)>),
}

impl Node {
    fn is_scalar(&self) -> bool {
        matches!(self, Node::Scalar | Node::Uint(_))
    }

    fn field(&self, name: &str) -> Option<&Node> {
        match self {
            Node::Fields(fields) => fields.iter().find(|(k, _)| k == name).map(|(_, v)| v),
            _ => None,
        }
    }

    #[cfg(test)]
    fn count(&self) -> usize {
        match self {
            Node::Seq(items) => 1 + items.iter().map(Node::count).sum::<usize>(),
            Node::Fields(fields) => 1 + fields.iter().map(|(_, v)| v.count()).sum::<usize>(),
            _ => 1,
        }
    }

    /// `{ shape, dtype, .. }` with an integer shape.
    fn tensor_shape(&self) -> Option<Vec<usize>> {
        self.field("dtype")?;
        match self.field("shape")? {
            Node::Seq(dims) => dims
                .iter()
                .map(|d| match d {
                    Node::Uint(d) => Some(*d as usize),
                    _ => None,
                })
                .collect(),
            _ => None,
        }
    }

    /// Tensor inside a `{ id: String, param: <tensor> }` parameter wrapper.
    fn param_payload(&self) -> Option<&Node> {
        let Node::Fields(fields) = self else {
            return None;
        };
        if fields.len() != 2 || !matches!(self.field("id"), Some(Node::Text(_))) {
            return None;
        }
        let param = self.field("param")?;
        param.tensor_shape().map(|_| param)
    }
}

fn collect(node: &Node, path: &str, out: &mut BTreeMap<String, Vec<usize>>) {
    if let Some(shape) = node.tensor_shape() {
        out.insert(path.to_string(), shape);
        return;
    }
    if let Some(inner) = node.param_payload() {
        collect(inner, path, out);
        return;
    }
    match node {
        Node::Fields(fields) => {
            for (key, child) in fields {
                collect(child, &join(path, key), out);
            }
        }
        Node::Seq(items) => {
            for (i, child) in items.iter().enumerate() {
                collect(child, &join(path, &i.to_string()), out);
            }
        }
        _ => {}
    }
}

struct NodeSerializer;

#[derive(Default)]
struct SeqBuilder {
    items: Vec<Node>,
    opaque: bool,
}

impl SeqBuilder {
    fn push(&mut self, node: Node) {
        if node.is_scalar() {
            if self.opaque {
                return;
            }
            if self.items.len() >= MAX_INLINE_SCALARS && self.items.iter().all(Node::is_scalar) {
                self.items.clear();
                self.opaque = true;
                return;
            }
        }
        self.items.push(node);
    }

    fn finish(self) -> Node {
        if self.opaque && self.items.is_empty() {
            Node::Opaque
        } else {
            Node::Seq(self.items)
        }
    }
}

#[derive(Default)]
struct FieldsBuilder {
    fields: Vec<(String, Node)>,
    key: Option<String>,
}

fn map_key(node: Node) -> Result<String, SignatureError> {
    match node {
        Node::Text(key) => Ok(key),
        Node::Uint(key) => Ok(key.to_string()),
        other => Err(SignatureError(format!("unsupported map key {other:?}"))),
    }
}

macro_rules! scalar {
    ($($method:ident: $ty:ty),*) => {
        $(fn $method(self, _v: $ty) -> Result<Node, SignatureError> {
            Ok(Node::Scalar)
        })*
    };
}

macro_rules! unsigned {
    ($($method:ident: $ty:ty),*) => {
        $(fn $method(self, v: $ty) -> Result<Node, SignatureError> {
            Ok(Node::Uint(v as u64))
        })*
    };
}

macro_rules! signed {
    ($($method:ident: $ty:ty),*) => {
        $(fn $method(self, v: $ty) -> Result<Node, SignatureError> {
            Ok(if v >= 0 { Node::Uint(v as u64) } else { Node::Scalar })
        })*
    };
}

impl ser::Serializer for NodeSerializer {
    type Ok = Node;
    type Error = SignatureError;
    type SerializeSeq = SeqBuilder;
    type SerializeTuple = SeqBuilder;
    type SerializeTupleStruct = SeqBuilder;
    type SerializeTupleVariant = SeqBuilder;
    type SerializeMap = FieldsBuilder;
    type SerializeStruct = FieldsBuilder;
    type SerializeStructVariant = FieldsBuilder;

    scalar!(serialize_bool: bool, serialize_f32: f32, serialize_f64: f64, serialize_char: char);
    unsigned!(serialize_u8: u8, serialize_u16: u16, serialize_u32: u32, serialize_u64: u64);
    signed!(serialize_i8: i8, serialize_i16: i16, serialize_i32: i32, serialize_i64: i64);

    fn serialize_str(self, v: &str) -> Result<Node, SignatureError> {
        Ok(Node::Text(v.to_string()))
    }

    fn serialize_bytes(self, _v: &[u8]) -> Result<Node, SignatureError> {
        Ok(Node::Opaque)
    }

    fn serialize_none(self) -> Result<Node, SignatureError> {
        Ok(Node::Scalar)
    }

    fn serialize_some<T: ?Sized + Serialize>(self, value: &T) -> Result<Node, SignatureError> {
        value.serialize(self)
    }

    fn serialize_unit(self) -> Result<Node, SignatureError> {
        Ok(Node::Scalar)
    }

    fn serialize_unit_struct(self, _name: &'static str) -> Result<Node, SignatureError> {
        Ok(Node::Scalar)
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _index: u32,
        _variant: &'static str,
    ) -> Result<Node, SignatureError> {
        Ok(Node::Scalar)
    }

    fn serialize_newtype_struct<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        value: &T,
    ) -> Result<Node, SignatureError> {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
        value: &T,
    ) -> Result<Node, SignatureError> {
        Ok(Node::Fields(vec![(
            variant.to_string(),
            value.serialize(NodeSerializer)?,
        )]))
    }

    fn serialize_seq(self, _len: Option<usize>) -> Result<SeqBuilder, SignatureError> {
        Ok(SeqBuilder::default())
    }

    fn serialize_tuple(self, _len: usize) -> Result<SeqBuilder, SignatureError> {
        Ok(SeqBuilder::default())
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> Result<SeqBuilder, SignatureError> {
        Ok(SeqBuilder::default())
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<SeqBuilder, SignatureError> {
        Ok(SeqBuilder::default())
    }

    fn serialize_map(self, _len: Option<usize>) -> Result<FieldsBuilder, SignatureError> {
        Ok(FieldsBuilder::default())
    }

    fn serialize_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> Result<FieldsBuilder, SignatureError> {
        Ok(FieldsBuilder::default())
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<FieldsBuilder, SignatureError> {
        Ok(FieldsBuilder::default())
    }
}

macro_rules! seq_impl {
    ($($trait:ident :: $method:ident),*) => {
        $(impl ser::$trait for SeqBuilder {
            type Ok = Node;
            type Error = SignatureError;

            fn $method<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), SignatureError> {
                self.push(value.serialize(NodeSerializer)?);
                Ok(())
            }

            fn end(self) -> Result<Node, SignatureError> {
                Ok(self.finish())
            }
        })*
    };
}

seq_impl!(
    SerializeSeq::serialize_element,
    SerializeTuple::serialize_element,
    SerializeTupleStruct::serialize_field,
    SerializeTupleVariant::serialize_field
);

impl ser::SerializeMap for FieldsBuilder {
    type Ok = Node;
    type Error = SignatureError;

    fn serialize_key<T: ?Sized + Serialize>(&mut self, key: &T) -> Result<(), SignatureError> {
        self.key = Some(map_key(key.serialize(NodeSerializer)?)?);
        Ok(())
    }

    fn serialize_value<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), SignatureError> {
        let key = self
            .key
            .take()
            .ok_or_else(|| SignatureError("map value without a key".to_string()))?;
        self.fields.push((key, value.serialize(NodeSerializer)?));
        Ok(())
    }

    fn end(self) -> Result<Node, SignatureError> {
        Ok(Node::Fields(self.fields))
    }
}

macro_rules! struct_impl {
    ($($trait:ident),*) => {
        $(impl ser::$trait for FieldsBuilder {
            type Ok = Node;
            type Error = SignatureError;

            fn serialize_field<T: ?Sized + Serialize>(
                &mut self,
                key: &'static str,
                value: &T,
            ) -> Result<(), SignatureError> {
                self.fields.push((key.to_string(), value.serialize(NodeSerializer)?));
                Ok(())
            }

            fn end(self) -> Result<Node, SignatureError> {
                Ok(Node::Fields(self.fields))
            }
        })*
    };
}

struct_impl!(SerializeStruct, SerializeStructVariant);

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::TensorData;
    use serde::Serialize;
    use serde_json::json;

    #[test]
    fn walks_params_and_nested_modules() {
        let item = json!({
            "stem": { "weight": { "id": "abc", "param": { "bytes": [0, 0], "shape": [2, 3], "dtype": "F32" } },
                      "bias": null },
            "blocks": [
                { "weight": { "id": "d", "param": { "bytes": [], "shape": [4], "dtype": "F32" } } }
            ],
            "max_boxes": 8
        });
        let sig = StateSignature::from_item(&item).unwrap();
        assert_eq!(sig.len(), 2);
        assert_eq!(sig.shape("stem.weight"), Some(&[2usize, 3][..]));
        assert_eq!(sig.shape("blocks.0.weight"), Some(&[4usize][..]));
    }

    #[test]
    fn reports_missing_and_unexpected_names() {
        let a = StateSignature::from_item(&json!({
            "w": { "shape": [1], "dtype": "F32" }
        }))
        .unwrap();
        let b = StateSignature::from_item(&json!({
            "v": { "shape": [1], "dtype": "F32" }
        }))
        .unwrap();
        match a.ensure_matches(&b) {
            Err(TrainingError::KeyMismatch {
                missing,
                unexpected,
            }) => {
                assert_eq!(missing, vec!["w".to_string()]);
                assert_eq!(unexpected, vec!["v".to_string()]);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn tensor_payloads_are_not_materialized() {
        #[derive(Serialize)]
        struct Wrapped<T> {
            id: String,
            param: T,
        }
        #[derive(Serialize)]
        struct Layer {
            weight: Wrapped<TensorData>,
        }

        let data = TensorData::new(vec![0.5f32; 1 << 20], [1024, 1024]);
        assert!(data.serialize(NodeSerializer).unwrap().count() < 16);

        let layer = Layer {
            weight: Wrapped {
                id: "w0".to_string(),
                param: data,
            },
        };
        let sig = StateSignature::from_item(&layer).unwrap();
        assert_eq!(sig.shape("weight"), Some(&[1024usize, 1024][..]));
    }

    #[test]
    fn long_numeric_sequences_collapse() {
        let node = vec![7u8; 1 << 16].serialize(NodeSerializer).unwrap();
        assert_eq!(node, Node::Opaque);
        let shape = vec![2usize, 3, 4].serialize(NodeSerializer).unwrap();
        assert_eq!(shape, Node::Seq(vec![Node::Uint(2), Node::Uint(3), Node::Uint(4)]));
    }

    #[test]
    fn submodule_fields_named_id_and_param_keep_their_names() {
        let tensor = |n: u64| json!({ "bytes": [], "shape": [n], "dtype": "F32" });
        let item = json!({
            "head": {
                "id": { "id": "a", "param": tensor(2) },
                "param": { "id": "b", "param": tensor(3) }
            }
        });
        let sig = StateSignature::from_item(&item).unwrap();
        assert_eq!(sig.len(), 2);
        assert_eq!(sig.shape("head.id"), Some(&[2usize][..]));
        assert_eq!(sig.shape("head.param"), Some(&[3usize][..]));
    }
}
