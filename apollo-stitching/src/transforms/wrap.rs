//! Transforms that move fields between levels of the schema.
//!
//! Both rewrite requests into flat, aliased selections the subschema understands, and use the
//! aliases to restore the expected nesting in results and error paths.

use std::sync::Arc;

use apollo_compiler::Name;
use apollo_compiler::Node;
use apollo_compiler::Schema;
use apollo_compiler::ast;
use apollo_compiler::collections::IndexMap;
use apollo_compiler::schema::Component;
use apollo_compiler::schema::ExtendedType;
use apollo_compiler::schema::FieldDefinition;
use apollo_compiler::schema::ObjectType;

use super::DelegationRequest;
use super::Transform;
use super::rewrite_fields;
use crate::context::Context;
use crate::error::DelegationError;
use crate::error::StitchingError;
use crate::graphql;
use crate::json_ext::Object;
use crate::json_ext::Path;
use crate::json_ext::PathElement;
use crate::json_ext::Value;
use crate::schema::HealOptions;
use crate::schema::field_definition;
use crate::schema::heal_schema;

fn invalid(transform: &'static str, message: String) -> StitchingError {
    StitchingError::InvalidTransform {
        transform: transform.to_string(),
        message,
    }
}

/// Encodes the response key of a wrapping field, and of one of its children, after `prefix`.
///
/// The key is length-prefixed: `inner` and `a` give `5_inner_a`. Response keys may contain any
/// run of underscores, so no separator alone could tell them apart.
fn encode_key(prefix: &str, key: &str, child_key: Option<&str>) -> String {
    match child_key {
        Some(child_key) => format!("{prefix}{}_{key}_{child_key}", key.len()),
        None => format!("{prefix}{}_{key}", key.len()),
    }
}

/// Reverses [`encode_key`] on what follows the prefix.
fn decode_key(encoded: &str) -> Option<(&str, Option<&str>)> {
    let (len, rest) = encoded.split_once('_')?;
    let len: usize = len.parse().ok()?;
    let key = rest.get(..len)?;
    let child_key = &rest[len..];
    if child_key.is_empty() {
        return Some((key, None));
    }
    Some((key, Some(child_key.strip_prefix('_')?)))
}

fn alias(name: String) -> Result<Name, DelegationError> {
    Name::new(&name).map_err(|_| DelegationError::TransformFailed {
        transform: "WrapFields".to_string(),
        reason: format!("\"{name}\" is not a valid alias"),
    })
}

/// Moves fields of an object type below a new field of a new object type.
///
/// With `WrapFields::new("Widget", ["a", "b"], "Inner", "inner")`, `Widget { a b c }` becomes
/// `Widget { c inner: Inner }` and `Inner { a b }`.
pub struct WrapFields {
    outer_type: Name,
    field_names: Vec<Name>,
    wrapping_type: Name,
    wrapping_field: Name,
    schema: Option<Arc<Schema>>,
}

impl WrapFields {
    pub fn new(
        outer_type: Name,
        field_names: impl IntoIterator<Item = Name>,
        wrapping_type: Name,
        wrapping_field: Name,
    ) -> Self {
        Self {
            outer_type,
            field_names: field_names.into_iter().collect(),
            wrapping_type,
            wrapping_field,
            schema: None,
        }
    }

    fn prefix(&self) -> String {
        format!("_wrap_{}__", self.wrapping_type)
    }

    fn typename_prefix(&self) -> String {
        format!("_wraptype_{}__", self.wrapping_type)
    }

    /// Replaces `inner { a }` by `_wrap_Inner__5_inner: __typename _wrap_Inner__5_inner_a: a`.
    fn unwrap_field(&self, field: ast::Field) -> Result<Vec<ast::Selection>, DelegationError> {
        let key = field.alias.clone().unwrap_or_else(|| field.name.clone());
        let prefix = self.prefix();
        let mut flattened = vec![ast::Selection::Field(Node::new(ast::Field {
            alias: Some(alias(encode_key(&prefix, &key, None))?),
            name: apollo_compiler::name!("__typename"),
            arguments: Vec::new(),
            directives: field.directives.clone(),
            selection_set: Vec::new(),
        }))];
        for child in flatten_fields(&field.selection_set) {
            let mut child = (*child).clone();
            let child_key = child.alias.clone().unwrap_or_else(|| child.name.clone());
            child.alias = Some(if child.name.as_str() == "__typename" {
                alias(encode_key(&self.typename_prefix(), &key, Some(&child_key)))?
            } else {
                alias(encode_key(&prefix, &key, Some(&child_key)))?
            });
            child.directives.0.extend(field.directives.iter().cloned());
            flattened.push(ast::Selection::Field(Node::new(child)));
        }
        Ok(flattened)
    }

    fn rewrap(&self, value: &mut Value) {
        match value {
            Value::Object(object) => {
                let prefix = self.prefix();
                let typename_prefix = self.typename_prefix();
                if object
                    .keys()
                    .any(|key| key.as_str().starts_with(&prefix) || key.as_str().starts_with(&typename_prefix))
                {
                    let mut rewrapped = Object::with_capacity(object.len());
                    let mut wrapped: IndexMap<String, Option<Object>> = IndexMap::default();
                    for (key, value) in std::mem::take(object) {
                        let decoded = if let Some(rest) = key.as_str().strip_prefix(&typename_prefix) {
                            decode_key(rest).map(|decoded| (decoded, true))
                        } else {
                            key.as_str()
                                .strip_prefix(&prefix)
                                .and_then(decode_key)
                                .map(|decoded| (decoded, false))
                        };
                        let Some(((wrapped_key, child_key), is_typename)) = decoded else {
                            rewrapped.insert(key, value);
                            continue;
                        };
                        let wrapped_key = wrapped_key.to_string();
                        let child_key = child_key.map(str::to_string);
                        match child_key {
                            None => {
                                let entry = wrapped.entry(wrapped_key).or_default();
                                if !value.is_null() && entry.is_none() {
                                    *entry = Some(Object::new());
                                }
                            }
                            Some(child_key) => {
                                let child_value = if is_typename {
                                    Value::String(self.wrapping_type.as_str().into())
                                } else {
                                    value
                                };
                                wrapped
                                    .entry(wrapped_key)
                                    .or_default()
                                    .get_or_insert_with(Object::new)
                                    .insert(child_key, child_value);
                            }
                        }
                    }
                    for (key, inner) in wrapped {
                        rewrapped.insert(key, inner.map(Value::Object).unwrap_or(Value::Null));
                    }
                    *object = rewrapped;
                }
                for value in object.values_mut() {
                    self.rewrap(value);
                }
            }
            Value::Array(items) => {
                for item in items {
                    self.rewrap(item);
                }
            }
            _ => {}
        }
    }

    fn rewrap_path(&self, path: &Path) -> Path {
        let prefixes = [self.prefix(), self.typename_prefix()];
        let mut elements = Vec::with_capacity(path.len() + 1);
        for element in path.iter() {
            let unwrapped = element.as_key().and_then(|key| {
                prefixes
                    .iter()
                    .find_map(|prefix| key.strip_prefix(prefix.as_str()))
                    .and_then(decode_key)
            });
            match unwrapped {
                Some((wrapped_key, child_key)) => {
                    elements.push(PathElement::from(wrapped_key));
                    if let Some(child_key) = child_key {
                        elements.push(PathElement::from(child_key));
                    }
                }
                None => elements.push(element.clone()),
            }
        }
        Path(elements)
    }
}

impl Transform for WrapFields {
    fn name(&self) -> &'static str {
        "WrapFields"
    }

    fn transform_schema(&mut self, mut schema: Schema) -> Result<Schema, StitchingError> {
        if schema.types.contains_key(&self.wrapping_type) {
            return Err(invalid(
                "WrapFields",
                format!("type \"{}\" already exists", self.wrapping_type),
            ));
        }
        let Some(ExtendedType::Object(outer)) = schema.types.get_mut(&self.outer_type) else {
            return Err(invalid(
                "WrapFields",
                format!("\"{}\" is not an object type", self.outer_type),
            ));
        };
        let outer = outer.make_mut();
        if outer.fields.contains_key(&self.wrapping_field) {
            return Err(invalid(
                "WrapFields",
                format!(
                    "field \"{}.{}\" already exists",
                    self.outer_type, self.wrapping_field
                ),
            ));
        }
        let mut moved = IndexMap::with_capacity_and_hasher(self.field_names.len(), Default::default());
        for field_name in &self.field_names {
            let Some(field) = outer.fields.shift_remove(field_name) else {
                return Err(invalid(
                    "WrapFields",
                    format!("field \"{}.{field_name}\" does not exist", self.outer_type),
                ));
            };
            moved.insert(field_name.clone(), field);
        }
        outer.fields.insert(
            self.wrapping_field.clone(),
            Component::new(FieldDefinition {
                description: None,
                name: self.wrapping_field.clone(),
                arguments: Vec::new(),
                ty: ast::Type::Named(self.wrapping_type.clone()),
                directives: Default::default(),
            }),
        );
        schema.types.insert(
            self.wrapping_type.clone(),
            ExtendedType::Object(Node::new(ObjectType {
                description: None,
                name: self.wrapping_type.clone(),
                implements_interfaces: Default::default(),
                directives: Default::default(),
                fields: moved,
            })),
        );
        heal_schema(&mut schema, HealOptions::default())?;
        self.schema = Some(Arc::new(schema.clone()));
        Ok(schema)
    }

    fn transform_request(
        &self,
        mut request: DelegationRequest,
        _context: &Context,
    ) -> Result<DelegationRequest, DelegationError> {
        let Some(schema) = &self.schema else {
            return Ok(request);
        };
        let Some(root) = schema.root_operation(request.operation_type).cloned() else {
            return Ok(request);
        };
        let mut failure = None;
        request.selection_set = rewrite_fields(
            schema,
            &root,
            &request.selection_set,
            &mut |parent_type, field| {
                if *parent_type == self.outer_type && field.name == self.wrapping_field {
                    match self.unwrap_field(field) {
                        Ok(selections) => return selections,
                        Err(error) => {
                            failure = Some(error);
                            return Vec::new();
                        }
                    }
                }
                vec![ast::Selection::Field(Node::new(field))]
            },
        );
        match failure {
            Some(error) => Err(error),
            None => Ok(request),
        }
    }

    fn transform_result(
        &self,
        mut response: graphql::Response,
        _context: &Context,
    ) -> graphql::Response {
        if let Some(data) = response.data.as_mut() {
            self.rewrap(data);
        }
        for error in &mut response.errors {
            if let Some(path) = &error.path {
                error.path = Some(self.rewrap_path(path));
            }
        }
        response
    }
}

/// The fields of `selections`, looking through inline fragments.
fn flatten_fields(selections: &[ast::Selection]) -> Vec<Node<ast::Field>> {
    let mut fields = Vec::new();
    for selection in selections {
        match selection {
            ast::Selection::Field(field) => fields.push(field.clone()),
            ast::Selection::InlineFragment(fragment) => {
                fields.extend(flatten_fields(&fragment.selection_set))
            }
            ast::Selection::FragmentSpread(_) => {}
        }
    }
    fields
}

/// Exposes a field nested below other fields directly on a type.
///
/// With `HoistField::new("Query", ["user", "name"], "userName")`, `Query.userName` returns what
/// `Query.user.name` returned; `User.name` is removed.
pub struct HoistField {
    type_name: Name,
    path: Vec<Name>,
    new_field_name: Name,
    schema: Option<Arc<Schema>>,
}

impl HoistField {
    pub fn new(type_name: Name, path: impl IntoIterator<Item = Name>, new_field_name: Name) -> Self {
        Self {
            type_name,
            path: path.into_iter().collect(),
            new_field_name,
            schema: None,
        }
    }

    fn alias(&self, key: &str) -> String {
        format!("_hoist_{}__{key}", self.new_field_name)
    }

    fn hoist_request(&self, field: ast::Field) -> Result<ast::Field, DelegationError> {
        let key = field.alias.clone().unwrap_or_else(|| field.name.clone());
        let alias = Name::new(&self.alias(&key)).map_err(|_| DelegationError::TransformFailed {
            transform: "HoistField".to_string(),
            reason: format!("cannot alias \"{key}\""),
        })?;
        let mut segments = self.path.iter().rev();
        let Some(leaf) = segments.next() else {
            return Ok(field);
        };
        let mut nested = ast::Field {
            alias: Some(alias.clone()),
            name: leaf.clone(),
            arguments: field.arguments,
            directives: Default::default(),
            selection_set: field.selection_set,
        };
        for segment in segments {
            nested = ast::Field {
                alias: Some(alias.clone()),
                name: segment.clone(),
                arguments: Vec::new(),
                directives: Default::default(),
                selection_set: vec![ast::Selection::Field(Node::new(nested))],
            };
        }
        nested.directives = field.directives;
        Ok(nested)
    }

    fn hoist_value(&self, value: &mut Value) {
        match value {
            Value::Object(object) => {
                let prefix = format!("_hoist_{}__", self.new_field_name);
                let hoisted: Vec<String> = object
                    .keys()
                    .filter_map(|key| key.as_str().strip_prefix(&prefix).map(str::to_string))
                    .collect();
                for key in hoisted {
                    let alias = self.alias(&key);
                    let mut value = object.remove(alias.as_str()).unwrap_or(Value::Null);
                    for _ in 1..self.path.len() {
                        value = match value {
                            Value::Object(mut inner) => {
                                inner.remove(alias.as_str()).unwrap_or(Value::Null)
                            }
                            _ => Value::Null,
                        };
                    }
                    object.insert(key, value);
                }
                for value in object.values_mut() {
                    self.hoist_value(value);
                }
            }
            Value::Array(items) => {
                for item in items {
                    self.hoist_value(item);
                }
            }
            _ => {}
        }
    }

    fn hoist_path(&self, path: &Path) -> Path {
        let prefix = format!("_hoist_{}__", self.new_field_name);
        let mut elements = Vec::with_capacity(path.len());
        let mut iter = path.iter().peekable();
        while let Some(element) = iter.next() {
            match element.as_key().and_then(|key| key.strip_prefix(prefix.as_str())) {
                Some(key) => {
                    let alias = element.clone();
                    while iter.peek() == Some(&&alias) {
                        iter.next();
                    }
                    elements.push(PathElement::from(key));
                }
                None => elements.push(element.clone()),
            }
        }
        Path(elements)
    }
}

impl Transform for HoistField {
    fn name(&self) -> &'static str {
        "HoistField"
    }

    fn transform_schema(&mut self, mut schema: Schema) -> Result<Schema, StitchingError> {
        let Some((leaf_name, intermediate)) = self.path.split_last() else {
            return Err(invalid("HoistField", "the path to hoist is empty".to_string()));
        };
        let mut parent = self.type_name.clone();
        for segment in intermediate {
            let Some(field) = field_definition(&schema, &parent, segment) else {
                return Err(invalid(
                    "HoistField",
                    format!("field \"{parent}.{segment}\" does not exist"),
                ));
            };
            parent = field.ty.inner_named_type().clone();
        }
        let Some(leaf) = field_definition(&schema, &parent, leaf_name).cloned() else {
            return Err(invalid(
                "HoistField",
                format!("field \"{parent}.{leaf_name}\" does not exist"),
            ));
        };
        if field_definition(&schema, &self.type_name, &self.new_field_name).is_some() {
            return Err(invalid(
                "HoistField",
                format!(
                    "field \"{}.{}\" already exists",
                    self.type_name, self.new_field_name
                ),
            ));
        }

        if !intermediate.is_empty() {
            match schema.types.get_mut(&parent) {
                Some(ExtendedType::Object(object)) => {
                    object.make_mut().fields.shift_remove(leaf_name);
                }
                Some(ExtendedType::Interface(interface)) => {
                    interface.make_mut().fields.shift_remove(leaf_name);
                }
                _ => {}
            }
        }
        let hoisted = Component::new(FieldDefinition {
            description: leaf.description.clone(),
            name: self.new_field_name.clone(),
            arguments: leaf.arguments.clone(),
            ty: leaf.ty.clone(),
            directives: Default::default(),
        });
        match schema.types.get_mut(&self.type_name) {
            Some(ExtendedType::Object(object)) => {
                object
                    .make_mut()
                    .fields
                    .insert(self.new_field_name.clone(), hoisted);
            }
            _ => {
                return Err(invalid(
                    "HoistField",
                    format!("\"{}\" is not an object type", self.type_name),
                ));
            }
        }
        heal_schema(&mut schema, HealOptions::default())?;
        self.schema = Some(Arc::new(schema.clone()));
        Ok(schema)
    }

    fn transform_request(
        &self,
        mut request: DelegationRequest,
        _context: &Context,
    ) -> Result<DelegationRequest, DelegationError> {
        let Some(schema) = &self.schema else {
            return Ok(request);
        };
        let Some(root) = schema.root_operation(request.operation_type).cloned() else {
            return Ok(request);
        };
        let mut failure = None;
        request.selection_set = rewrite_fields(
            schema,
            &root,
            &request.selection_set,
            &mut |parent_type, field| {
                if *parent_type == self.type_name && field.name == self.new_field_name {
                    match self.hoist_request(field) {
                        Ok(field) => return vec![ast::Selection::Field(Node::new(field))],
                        Err(error) => {
                            failure = Some(error);
                            return Vec::new();
                        }
                    }
                }
                vec![ast::Selection::Field(Node::new(field))]
            },
        );
        match failure {
            Some(error) => Err(error),
            None => Ok(request),
        }
    }

    fn transform_result(
        &self,
        mut response: graphql::Response,
        _context: &Context,
    ) -> graphql::Response {
        if let Some(data) = response.data.as_mut() {
            self.hoist_value(data);
        }
        for error in &mut response.errors {
            if let Some(path) = &error.path {
                error.path = Some(self.hoist_path(path));
            }
        }
        response
    }
}
