//! Runtime values flowing along workflow edges.
use indexmap::IndexMap;

use crate::fileref::{FileKind, FileRef};
use crate::schema::{ParameterType, Primitive};

/// A runtime value, mirroring [`ParameterType`] shape for shape.
///
/// Values are cheap to clone relative to the data they stand for: file and
/// directory payloads stay behind a [`FileRef`] and are never loaded into a
/// `Value`.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    List(Vec<Value>),
    Record(IndexMap<String, Value>),
    File(FileRef),
    Dir(FileRef),
}

impl Value {
    /// Short name of the value's shape, for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Bool(_) => "bool",
            Value::List(_) => "list",
            Value::Record(_) => "record",
            Value::File(_) => "file",
            Value::Dir(_) => "dir",
        }
    }

    /// Whether this value fits the declared type.
    ///
    /// Conformance is structural. An empty list conforms to every list type,
    /// since there is no element to contradict it.
    pub fn conforms_to(&self, ty: &ParameterType) -> bool {
        match (self, ty) {
            (Value::Int(_), ParameterType::Primitive(Primitive::Int)) => true,
            (Value::Float(_), ParameterType::Primitive(Primitive::Float)) => true,
            (Value::Str(_), ParameterType::Primitive(Primitive::Str)) => true,
            (Value::Bool(_), ParameterType::Primitive(Primitive::Bool)) => true,
            (Value::List(items), ParameterType::List(item)) => {
                items.iter().all(|value| value.conforms_to(item))
            }
            (Value::Record(fields), ParameterType::Record(tys)) => {
                fields.len() == tys.len()
                    && tys
                        .iter()
                        .all(|(name, ty)| fields.get(name).is_some_and(|v| v.conforms_to(ty)))
            }
            (Value::File(_), ParameterType::File) => true,
            (Value::Dir(_), ParameterType::Dir) => true,
            _ => false,
        }
    }

    /// Rebuilds the value tree, passing every file reference through `f`.
    /// Used by executors to rehome or publish file payloads after a task
    /// completes.
    pub(crate) fn try_map_files<F>(self, f: &mut F) -> anyhow::Result<Value>
    where
        F: FnMut(FileRef, FileKind) -> anyhow::Result<FileRef>,
    {
        Ok(match self {
            Value::File(file) => Value::File(f(file, FileKind::File)?),
            Value::Dir(file) => Value::Dir(f(file, FileKind::Dir)?),
            Value::List(items) => {
                let mut mapped = Vec::with_capacity(items.len());
                for item in items {
                    mapped.push(item.try_map_files(f)?);
                }
                Value::List(mapped)
            }
            Value::Record(fields) => {
                let mut mapped = IndexMap::with_capacity(fields.len());
                for (name, item) in fields {
                    mapped.insert(name, item.try_map_files(f)?);
                }
                Value::Record(mapped)
            }
            other => other,
        })
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_string())
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Value::List(value)
    }
}

impl From<IndexMap<String, Value>> for Value {
    fn from(value: IndexMap<String, Value>) -> Self {
        Value::Record(value)
    }
}

/// The named inputs handed to a task body, one entry per declared input.
///
/// Inputs are validated against the signature before the body runs, so the
/// typed accessors below only fail if a body asks for something its own
/// signature never declared.
#[derive(Debug, Clone, Default)]
pub struct Args {
    values: IndexMap<String, Value>,
}

impl Args {
    pub(crate) fn new(values: IndexMap<String, Value>) -> Self {
        Self { values }
    }

    pub fn get(&self, name: &str) -> anyhow::Result<&Value> {
        self.values
            .get(name)
            .ok_or_else(|| anyhow::anyhow!("no input named '{name}'"))
    }

    pub fn int(&self, name: &str) -> anyhow::Result<i64> {
        match self.get(name)? {
            Value::Int(value) => Ok(*value),
            other => anyhow::bail!("input '{name}' is {}, expected int", other.kind()),
        }
    }

    pub fn float(&self, name: &str) -> anyhow::Result<f64> {
        match self.get(name)? {
            Value::Float(value) => Ok(*value),
            other => anyhow::bail!("input '{name}' is {}, expected float", other.kind()),
        }
    }

    pub fn str(&self, name: &str) -> anyhow::Result<&str> {
        match self.get(name)? {
            Value::Str(value) => Ok(value),
            other => anyhow::bail!("input '{name}' is {}, expected str", other.kind()),
        }
    }

    pub fn bool(&self, name: &str) -> anyhow::Result<bool> {
        match self.get(name)? {
            Value::Bool(value) => Ok(*value),
            other => anyhow::bail!("input '{name}' is {}, expected bool", other.kind()),
        }
    }

    pub fn list(&self, name: &str) -> anyhow::Result<&[Value]> {
        match self.get(name)? {
            Value::List(items) => Ok(items),
            other => anyhow::bail!("input '{name}' is {}, expected list", other.kind()),
        }
    }

    pub fn record(&self, name: &str) -> anyhow::Result<&IndexMap<String, Value>> {
        match self.get(name)? {
            Value::Record(fields) => Ok(fields),
            other => anyhow::bail!("input '{name}' is {}, expected record", other.kind()),
        }
    }

    pub fn file(&self, name: &str) -> anyhow::Result<&FileRef> {
        match self.get(name)? {
            Value::File(file) => Ok(file),
            other => anyhow::bail!("input '{name}' is {}, expected file", other.kind()),
        }
    }

    pub fn dir(&self, name: &str) -> anyhow::Result<&FileRef> {
        match self.get(name)? {
            Value::Dir(dir) => Ok(dir),
            other => anyhow::bail!("input '{name}' is {}, expected dir", other.kind()),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(name, value)| (name.as_str(), value))
    }
}

/// Values returned from a task body, one per declared output slot.
#[derive(Debug, Clone, Default)]
pub struct Outputs(pub(crate) Vec<Value>);

impl Outputs {
    pub fn new(values: Vec<Value>) -> Self {
        Outputs(values)
    }

    /// Single-output convenience.
    pub fn one(value: impl Into<Value>) -> Self {
        Outputs(vec![value.into()])
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub(crate) fn into_values(self) -> Vec<Value> {
        self.0
    }
}

macro_rules! impl_outputs_from {
    ($($ty:ty),+ $(,)?) => {
        $(impl From<$ty> for Outputs {
            fn from(value: $ty) -> Self {
                Outputs(vec![value.into()])
            }
        })+
    };
}

impl_outputs_from!(i64, f64, bool, String, &str, Value);

macro_rules! impl_outputs_tuple {
    ($($T:ident),+) => {
        #[allow(non_snake_case)]
        impl<$($T: Into<Value>),+> From<($($T,)+)> for Outputs {
            fn from(($($T,)+): ($($T,)+)) -> Self {
                Outputs(vec![$($T.into()),+])
            }
        }
    };
}

impl_outputs_tuple!(A);
impl_outputs_tuple!(A, B);
impl_outputs_tuple!(A, B, C);
impl_outputs_tuple!(A, B, C, D);
impl_outputs_tuple!(A, B, C, D, E);
impl_outputs_tuple!(A, B, C, D, E, F);

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn primitives_conform() {
        assert!(Value::Int(5).conforms_to(&ParameterType::INT));
        assert!(!Value::Int(5).conforms_to(&ParameterType::FLOAT));
        assert!(Value::Str("a".into()).conforms_to(&ParameterType::STR));
    }

    #[test]
    fn empty_list_conforms_to_any_list() {
        let empty = Value::List(vec![]);
        assert!(empty.conforms_to(&ParameterType::list(ParameterType::INT)));
        assert!(empty.conforms_to(&ParameterType::list(ParameterType::File)));
        assert!(!empty.conforms_to(&ParameterType::INT));
    }

    #[test]
    fn list_elements_are_checked() {
        let mixed = Value::List(vec![Value::Int(1), Value::Str("x".into())]);
        assert!(!mixed.conforms_to(&ParameterType::list(ParameterType::INT)));
    }

    #[test]
    fn record_fields_are_checked() {
        let ty = ParameterType::record([("x", ParameterType::INT), ("y", ParameterType::STR)]);
        let mut fields = IndexMap::new();
        fields.insert("y".to_string(), Value::Str("a".into()));
        fields.insert("x".to_string(), Value::Int(1));
        assert!(Value::Record(fields.clone()).conforms_to(&ty));

        fields.swap_remove("y");
        assert!(!Value::Record(fields).conforms_to(&ty));
    }

    #[test]
    fn args_typed_accessors() {
        let mut values = IndexMap::new();
        values.insert("count".to_string(), Value::Int(3));
        values.insert("label".to_string(), Value::Str("run".into()));
        let args = Args::new(values);

        assert_eq!(args.int("count").unwrap(), 3);
        assert_eq!(args.str("label").unwrap(), "run");
        assert!(args.int("label").is_err());
        assert!(args.get("missing").is_err());
    }

    #[test]
    fn outputs_from_tuple() {
        let outputs = Outputs::from((1i64, "two"));
        assert_eq!(outputs.len(), 2);
        let values = outputs.into_values();
        assert_eq!(values[0], Value::Int(1));
        assert_eq!(values[1], Value::Str("two".into()));
    }

    #[test]
    fn outputs_one() {
        let outputs = Outputs::one(42i64);
        assert_eq!(outputs.into_values(), vec![Value::Int(42)]);
    }
}
