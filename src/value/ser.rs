use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};

use crate::Value;

#[cfg_attr(docsrs, doc(cfg(feature = "serde")))]
impl Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Value::None => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Integer(n) => serializer.serialize_i64(*n),
            Value::Float(n) => serializer.serialize_f64(*n),
            Value::String(s) => serializer.serialize_str(s),
            Value::List(list) => {
                let mut seq = serializer.serialize_seq(Some(list.len()))?;
                for item in list {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Map(map) => {
                let mut m = serializer.serialize_map(Some(map.len()))?;
                for (k, v) in map {
                    m.serialize_entry(k, v)?;
                }
                m.end()
            }
            Value::Node(node) => serializer.collect_str(&format_args!("<node {}>", node.index())),
            Value::Func(f) => serializer.collect_str(&format_args!("<function {}>", f.name())),
            Value::Object(obj) => serializer.collect_str(&format_args!("<object {obj:?}>")),
            // Serializing is for diagnostics so it must not record a dependency.
            Value::Cell(cell) => cell.peek().serialize(serializer),
        }
    }
}
