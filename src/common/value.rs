use errors::Result;

/// An immediate value passed into and produced by thunk functions.
///
/// Chunk stores keep values in serialized form; this enum is the in-memory
/// face used on both sides of that boundary.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Unit,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
}

impl Value {
    pub fn as_int(&self) -> Result<i64> {
        match *self {
            Value::Int(i) => Ok(i),
            ref other => bail!("expected Int, got {:?}", other),
        }
    }

    pub fn as_str(&self) -> Result<&str> {
        match *self {
            Value::Str(ref s) => Ok(s),
            ref other => bail!("expected Str, got {:?}", other),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl<'a> From<&'a str> for Value {
    fn from(v: &'a str) -> Self {
        Value::Str(v.to_string())
    }
}
