use std::fmt;
use std::sync::Arc;

use apollo_compiler::collections::HashMap;

use crate::graphql;
use crate::json_ext::Object;
use crate::json_ext::PathElement;
use crate::json_ext::Value;
use crate::subschema::Subschema;

/// An object value together with what is known about where it came from.
///
/// The annotations never reach the client: only [`ExternalObject::data`] is serialized.
#[derive(Clone, Default)]
pub struct ExternalObject {
    /// The object's fields, keyed by response key.
    pub data: Object,

    /// Errors for positions below this object. The first element of each path is a response
    /// key of [`ExternalObject::data`].
    pub errors: Vec<graphql::Error>,

    /// The subschema the object was fetched from.
    pub subschema: Option<Arc<Subschema>>,

    /// Subschemas that contributed individual fields while the object was merged.
    pub field_subschemas: HashMap<String, Arc<Subschema>>,
}

impl ExternalObject {
    pub fn new(data: Object) -> Self {
        Self {
            data,
            ..Default::default()
        }
    }

    pub fn with_errors(mut self, errors: Vec<graphql::Error>) -> Self {
        self.errors = errors;
        self
    }

    pub fn with_subschema(mut self, subschema: Arc<Subschema>) -> Self {
        self.subschema = Some(subschema);
        self
    }

    /// The errors located at or below `response_key`.
    pub fn errors_for(&self, response_key: &str) -> Vec<graphql::Error> {
        self.errors
            .iter()
            .filter(|error| {
                error
                    .path
                    .as_ref()
                    .and_then(|path| path.first())
                    .is_some_and(|first| first.as_key() == Some(response_key))
            })
            .cloned()
            .collect()
    }

    /// The subschema the value at `response_key` came from.
    pub fn subschema_for(&self, response_key: &str) -> Option<&Arc<Subschema>> {
        self.field_subschemas
            .get(response_key)
            .or(self.subschema.as_ref())
    }

    /// The `__typename` discriminator, if the object carries one.
    pub fn typename(&self) -> Option<&str> {
        self.data.get("__typename").and_then(Value::as_str)
    }
}

impl From<Object> for ExternalObject {
    fn from(data: Object) -> Self {
        Self::new(data)
    }
}

impl fmt::Debug for ExternalObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExternalObject")
            .field("data", &self.data)
            .field("errors", &self.errors)
            .field(
                "subschema",
                &self.subschema.as_ref().map(|subschema| subschema.name()),
            )
            .finish()
    }
}

/// The value a field resolver produced, before it is completed against the field's type.
#[derive(Clone, Debug)]
pub enum Resolved {
    /// A plain JSON value: a leaf, `null`, or an object or list without annotations.
    Value(Value),
    /// An annotated object.
    Object(ExternalObject),
    /// A list whose items are resolved independently.
    List(Vec<Resolved>),
    /// A field error. The executor locates it at the field's path.
    Error(graphql::Error),
}

impl Resolved {
    pub fn null() -> Self {
        Resolved::Value(Value::Null)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Resolved::Value(Value::Null))
    }

    /// Converts back to plain JSON, dropping annotations. Errors become `null`.
    pub fn into_value(self) -> Value {
        match self {
            Resolved::Value(value) => value,
            Resolved::Object(object) => Value::Object(object.data),
            Resolved::List(items) => Value::Array(items.into_iter().map(Resolved::into_value).collect()),
            Resolved::Error(_) => Value::Null,
        }
    }
}

impl From<Value> for Resolved {
    fn from(value: Value) -> Self {
        Resolved::Value(value)
    }
}

impl From<ExternalObject> for Resolved {
    fn from(object: ExternalObject) -> Self {
        Resolved::Object(object)
    }
}

impl From<graphql::Error> for Resolved {
    fn from(error: graphql::Error) -> Self {
        Resolved::Error(error)
    }
}

pub(crate) fn first_index(error: &graphql::Error, position: usize) -> Option<usize> {
    error
        .path
        .as_ref()
        .and_then(|path| path.get(position))
        .and_then(PathElement::as_index)
}
