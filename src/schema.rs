//! Declared parameter types and task signatures.
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Scalar payload kinds carried between tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Primitive {
    Int,
    Float,
    Str,
    Bool,
}

/// The declared type of a task input, task output, or workflow source.
///
/// Types are structural: two records with the same field names and field
/// types are the same type, regardless of where they were written down.
/// Nesting is by value, so a type can never refer to itself.
///
/// `File` and `Dir` are deliberately opaque. They say nothing about where
/// the bytes live; that is the business of [`FileRef`](crate::FileRef).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterType {
    Primitive(Primitive),
    List(Box<ParameterType>),
    Record(IndexMap<String, ParameterType>),
    File,
    Dir,
}

impl ParameterType {
    pub const INT: ParameterType = ParameterType::Primitive(Primitive::Int);
    pub const FLOAT: ParameterType = ParameterType::Primitive(Primitive::Float);
    pub const STR: ParameterType = ParameterType::Primitive(Primitive::Str);
    pub const BOOL: ParameterType = ParameterType::Primitive(Primitive::Bool);

    /// A homogeneous list of `item`.
    pub fn list(item: ParameterType) -> Self {
        ParameterType::List(Box::new(item))
    }

    /// A record with the given named fields. Field order is preserved for
    /// display and serialization, but carries no meaning for assignability.
    pub fn record<S>(fields: impl IntoIterator<Item = (S, ParameterType)>) -> Self
    where
        S: Into<String>,
    {
        ParameterType::Record(
            fields
                .into_iter()
                .map(|(name, ty)| (name.into(), ty))
                .collect(),
        )
    }

    /// Whether a value produced as `source` may bind to a slot declared as
    /// `self`.
    ///
    /// Assignability is structural and exact: primitives, `File` and `Dir`
    /// must match literally, lists recurse into their element type, and
    /// records must carry exactly the same field names with assignable
    /// types. There is no numeric coercion and no record width subtyping.
    pub fn accepts(&self, source: &ParameterType) -> bool {
        match (self, source) {
            (ParameterType::Primitive(a), ParameterType::Primitive(b)) => a == b,
            (ParameterType::List(a), ParameterType::List(b)) => a.accepts(b),
            (ParameterType::Record(a), ParameterType::Record(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .all(|(name, ty)| b.get(name).is_some_and(|other| ty.accepts(other)))
            }
            (ParameterType::File, ParameterType::File) => true,
            (ParameterType::Dir, ParameterType::Dir) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for Primitive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Primitive::Int => "int",
            Primitive::Float => "float",
            Primitive::Str => "str",
            Primitive::Bool => "bool",
        };
        write!(f, "{name}")
    }
}

impl std::fmt::Display for ParameterType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParameterType::Primitive(p) => write!(f, "{p}"),
            ParameterType::List(item) => write!(f, "list<{item}>"),
            ParameterType::Record(fields) => {
                write!(f, "record{{")?;
                for (i, (name, ty)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{name}: {ty}")?;
                }
                write!(f, "}}")
            }
            ParameterType::File => write!(f, "file"),
            ParameterType::Dir => write!(f, "dir"),
        }
    }
}

/// The declared interface of a task: named, ordered inputs and positional
/// outputs.
///
/// The signature is the single source of truth for typing; nothing is ever
/// inferred from runtime values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signature {
    pub inputs: IndexMap<String, ParameterType>,
    pub outputs: Vec<ParameterType>,
}
