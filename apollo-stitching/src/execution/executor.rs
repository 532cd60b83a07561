use std::sync::Arc;

use apollo_compiler::ExecutableDocument;
use apollo_compiler::Name;
use apollo_compiler::Node;
use apollo_compiler::ast;
use apollo_compiler::ast::OperationType;
use apollo_compiler::ast::Type;
use apollo_compiler::collections::HashSet;
use apollo_compiler::collections::IndexMap;
use apollo_compiler::executable;
use apollo_compiler::schema::ExtendedType;
use apollo_compiler::validation::Valid;
use futures::FutureExt;
use futures::future::BoxFuture;
use futures::future::join_all;
use parking_lot::Mutex;
use serde_json::Number;
use tracing::debug;

use super::ExecutableSchema;
use super::ResolveInfo;
use super::value::ExternalObject;
use super::value::Resolved;
use crate::context::Context;
use crate::graphql;
use crate::graphql::Location;
use crate::json_ext::Object;
use crate::json_ext::Path;
use crate::json_ext::Value;
use crate::schema::does_type_apply;
use crate::schema::is_meta_name;
use crate::schema::possible_types;

pub(crate) type FieldsByResponseKey = IndexMap<Name, Vec<Node<executable::Field>>>;

/// Marks a `null` that must propagate to the nearest nullable ancestor. The error that caused it
/// was already recorded.
#[derive(Debug)]
pub(crate) struct NullPropagation;

type Completed = Result<Value, NullPropagation>;

/// The state of one operation execution.
#[derive(Clone)]
pub(crate) struct ExecutionContext {
    pub(crate) schema: ExecutableSchema,
    pub(crate) document: Arc<Valid<ExecutableDocument>>,
    pub(crate) operation: Node<executable::Operation>,
    pub(crate) variables: Arc<Object>,
    pub(crate) context: Context,
    pub(crate) errors: Arc<Mutex<Vec<graphql::Error>>>,
}

impl ExecutionContext {
    /// Parses and validates the request and coerces its variables.
    pub(crate) fn prepare(
        schema: &ExecutableSchema,
        request: &graphql::Request,
        context: &Context,
    ) -> Result<Self, Vec<graphql::Error>> {
        let Some(query) = request.query.as_deref() else {
            return Err(vec![
                graphql::Error::builder()
                    .message("Must provide query string.")
                    .extension_code("GRAPHQL_PARSE_FAILED")
                    .build(),
            ]);
        };
        let document =
            ExecutableDocument::parse_and_validate(schema.schema(), query, "query.graphql")
                .map_err(|with_errors| graphql::validation_errors(&with_errors.errors))?;
        let operation = document
            .operations
            .get(request.operation_name.as_deref())
            .map_err(|_| {
                let message = match request.operation_name.as_deref() {
                    Some(name) => format!("Unknown operation named \"{name}\"."),
                    None => "Must provide operation name if query contains multiple operations."
                        .to_string(),
                };
                vec![
                    graphql::Error::builder()
                        .message(message)
                        .extension_code("GRAPHQL_UNKNOWN_OPERATION_NAME")
                        .build(),
                ]
            })?
            .clone();

        let mut context = Self {
            schema: schema.clone(),
            document: Arc::new(document),
            operation,
            variables: Default::default(),
            context: context.clone(),
            errors: Default::default(),
        };
        context.variables = Arc::new(context.coerce_variable_values(&request.variables)?);
        Ok(context)
    }

    /// A context for one subscription event. Errors are not shared with other events.
    pub(crate) fn for_event(&self) -> Self {
        Self {
            errors: Default::default(),
            ..self.clone()
        }
    }

    pub(crate) fn take_errors(&self) -> Vec<graphql::Error> {
        std::mem::take(&mut *self.errors.lock())
    }

    fn coerce_variable_values(&self, provided: &Object) -> Result<Object, Vec<graphql::Error>> {
        let mut coerced = Object::new();
        let mut errors = Vec::new();
        for definition in &self.operation.variables {
            let name = definition.name.as_str();
            let ty = &*definition.ty;
            match provided.get(name) {
                Some(Value::Null) if ty.is_non_null() => errors.push(variable_error(format!(
                    "Variable \"${name}\" of non-null type \"{ty}\" must not be null."
                ))),
                Some(value) => match self.coerce_input_value(value, ty) {
                    Ok(value) => {
                        coerced.insert(name, value);
                    }
                    Err(message) => errors.push(variable_error(format!(
                        "Variable \"${name}\" got invalid value: {message}"
                    ))),
                },
                None => {
                    if let Some(default) = &definition.default_value {
                        coerced.insert(name, value_to_json(default, &Object::new()));
                    } else if ty.is_non_null() {
                        errors.push(variable_error(format!(
                            "Variable \"${name}\" of required type \"{ty}\" was not provided."
                        )));
                    }
                }
            }
        }
        if errors.is_empty() {
            Ok(coerced)
        } else {
            Err(errors)
        }
    }

    /// Coerces a JSON input value against an input type.
    fn coerce_input_value(&self, value: &Value, ty: &Type) -> Result<Value, String> {
        if value.is_null() {
            return if ty.is_non_null() {
                Err(format!("expected a non-null value of type \"{ty}\""))
            } else {
                Ok(Value::Null)
            };
        }
        if ty.is_list() {
            let item_type = ty.item_type();
            return match value {
                Value::Array(items) => items
                    .iter()
                    .map(|item| self.coerce_input_value(item, item_type))
                    .collect::<Result<Vec<_>, _>>()
                    .map(Value::Array),
                single => Ok(Value::Array(vec![self.coerce_input_value(single, item_type)?])),
            };
        }
        let type_name = ty.inner_named_type();
        match self.schema.schema().types.get(type_name) {
            Some(ExtendedType::Scalar(_)) => self.schema.resolvers().scalar(type_name).parse_value(value),
            Some(ExtendedType::Enum(enum_)) => match value.as_str() {
                Some(enum_value) if enum_.values.contains_key(enum_value) => Ok(value.clone()),
                _ => Err(format!("\"{type_name}\" does not contain the value {value}")),
            },
            Some(ExtendedType::InputObject(input_object)) => {
                let Value::Object(fields) = value else {
                    return Err(format!("expected an object of type \"{type_name}\""));
                };
                if let Some(unknown) = fields
                    .keys()
                    .find(|key| !input_object.fields.contains_key(key.as_str()))
                {
                    return Err(format!(
                        "field \"{}\" is not defined by type \"{type_name}\"",
                        unknown.as_str()
                    ));
                }
                let mut coerced = Object::new();
                for (field_name, definition) in &input_object.fields {
                    match fields.get(field_name.as_str()) {
                        Some(field_value) => {
                            coerced.insert(
                                field_name.as_str(),
                                self.coerce_input_value(field_value, &definition.ty)?,
                            );
                        }
                        None => {
                            if let Some(default) = &definition.default_value {
                                coerced.insert(
                                    field_name.as_str(),
                                    value_to_json(default, &Object::new()),
                                );
                            } else if definition.ty.is_non_null() {
                                return Err(format!(
                                    "field \"{type_name}.{field_name}\" of required type \"{}\" was not provided",
                                    *definition.ty
                                ));
                            }
                        }
                    }
                }
                Ok(Value::Object(coerced))
            }
            _ => Err(format!("\"{type_name}\" is not an input type")),
        }
    }

    /// Coerces the arguments of a field from its literals and the operation's variables.
    pub(crate) fn coerce_argument_values(&self, field: &executable::Field) -> Result<Object, String> {
        let mut coerced = Object::new();
        for definition in &field.definition.arguments {
            let name = definition.name.as_str();
            let literal = field
                .arguments
                .iter()
                .find(|argument| argument.name == definition.name)
                .map(|argument| &argument.value);
            let provided = match literal.map(|value| &**value) {
                Some(ast::Value::Variable(variable)) => {
                    self.variables.get(variable.as_str()).cloned()
                }
                Some(value) => Some(self.coerce_input_value(
                    &value_to_json(value, &self.variables),
                    &definition.ty,
                )?),
                None => None,
            };
            match provided {
                Some(value) => {
                    coerced.insert(name, value);
                }
                None => {
                    if let Some(default) = &definition.default_value {
                        coerced.insert(name, value_to_json(default, &Object::new()));
                    } else if definition.ty.is_non_null() {
                        return Err(format!(
                            "Argument \"{name}\" of required type \"{}\" was not provided.",
                            *definition.ty
                        ));
                    }
                }
            }
        }
        Ok(coerced)
    }

    fn should_include(&self, directives: &ast::DirectiveList) -> bool {
        for (name, excluded_when) in [("skip", true), ("include", false)] {
            let condition = directives
                .get(name)
                .and_then(|directive| directive.specified_argument_by_name("if"))
                .map(|value| value_to_json(value, &self.variables));
            if condition == Some(Value::Bool(excluded_when)) {
                return false;
            }
        }
        true
    }

    /// Groups the fields of `selection_set` that apply to `object_type` by response key.
    pub(crate) fn collect_fields(
        &self,
        object_type: &str,
        selection_set: &executable::SelectionSet,
        fields: &mut FieldsByResponseKey,
        visited_fragments: &mut HashSet<Name>,
    ) {
        let schema = self.schema.schema();
        for selection in &selection_set.selections {
            match selection {
                executable::Selection::Field(field) => {
                    if self.should_include(&field.directives) {
                        fields
                            .entry(field.response_key().clone())
                            .or_default()
                            .push(field.clone());
                    }
                }
                executable::Selection::FragmentSpread(spread) => {
                    if !self.should_include(&spread.directives)
                        || !visited_fragments.insert(spread.fragment_name.clone())
                    {
                        continue;
                    }
                    let Some(fragment) = self.document.fragments.get(&spread.fragment_name) else {
                        continue;
                    };
                    if does_type_apply(schema, fragment.type_condition(), object_type) {
                        self.collect_fields(
                            object_type,
                            &fragment.selection_set,
                            fields,
                            visited_fragments,
                        );
                    }
                }
                executable::Selection::InlineFragment(inline) => {
                    let applies = inline
                        .type_condition
                        .as_ref()
                        .is_none_or(|condition| does_type_apply(schema, condition, object_type));
                    if applies && self.should_include(&inline.directives) {
                        self.collect_fields(
                            object_type,
                            &inline.selection_set,
                            fields,
                            visited_fragments,
                        );
                    }
                }
            }
        }
    }

    /// Executes the operation with `root` as the root value. Returns `None` when a non-null root
    /// field nulled the whole response.
    pub(crate) async fn execute_operation(&self, root: ExternalObject) -> Option<Value> {
        let operation_type = self.operation.operation_type;
        let Some(root_type) = self.schema.schema().root_operation(operation_type).cloned() else {
            self.errors.lock().push(
                graphql::Error::builder()
                    .message(format!(
                        "Schema is not configured for {} operations.",
                        operation_type.name()
                    ))
                    .build(),
            );
            return None;
        };
        let mut fields = FieldsByResponseKey::default();
        self.collect_fields(
            &root_type,
            &self.operation.selection_set,
            &mut fields,
            &mut HashSet::default(),
        );
        let serial = operation_type == OperationType::Mutation;
        self.execute_fields(&root_type, &root, fields, &Path::empty(), serial)
            .await
            .ok()
            .map(Value::Object)
    }

    pub(crate) fn execute_fields<'a>(
        &'a self,
        object_type: &'a Name,
        parent: &'a ExternalObject,
        fields: FieldsByResponseKey,
        path: &'a Path,
        serial: bool,
    ) -> BoxFuture<'a, Result<Object, NullPropagation>> {
        async move {
            let mut results = Vec::with_capacity(fields.len());
            if serial {
                for (response_key, nodes) in fields {
                    let field_path = path.child(response_key.as_str());
                    let value = self.execute_field(object_type, parent, nodes, field_path).await;
                    results.push((response_key, value));
                }
            } else {
                results = join_all(fields.into_iter().map(|(response_key, nodes)| {
                    let field_path = path.child(response_key.as_str());
                    async move {
                        let value = self.execute_field(object_type, parent, nodes, field_path).await;
                        (response_key, value)
                    }
                }))
                .await;
            }

            let mut object = Object::with_capacity(results.len());
            for (response_key, value) in results {
                object.insert(response_key.as_str(), value?);
            }
            Ok(object)
        }
        .boxed()
    }

    pub(crate) fn resolve_info(
        &self,
        parent_type: &Name,
        nodes: &[Node<executable::Field>],
        field: &executable::Field,
        path: Path,
    ) -> ResolveInfo {
        ResolveInfo {
            schema: self.schema.clone(),
            document: self.document.clone(),
            operation: self.operation.clone(),
            parent_type: parent_type.clone(),
            field_name: field.name.clone(),
            response_key: field.response_key().clone(),
            field_nodes: nodes.to_vec(),
            return_type: field.ty().clone(),
            path,
            variable_values: self.variables.clone(),
            errors: self.errors.clone(),
        }
    }

    async fn execute_field(
        &self,
        parent_type: &Name,
        parent: &ExternalObject,
        nodes: Vec<Node<executable::Field>>,
        path: Path,
    ) -> Completed {
        let Some(field) = nodes.first().cloned() else {
            return Ok(Value::Null);
        };
        if field.name.as_str() == "__typename" {
            return Ok(Value::String(parent_type.as_str().into()));
        }

        let resolved = if is_meta_name(&field.name) {
            Resolved::Error(
                graphql::Error::builder()
                    .message(format!("introspection field \"{}\" is not supported", field.name))
                    .extension_code("INTROSPECTION_DISABLED")
                    .build(),
            )
        } else {
            match self.coerce_argument_values(&field) {
                Ok(args) => {
                    let info = self.resolve_info(parent_type, &nodes, &field, path.clone());
                    let resolver = self.schema.resolvers().field_resolver(parent_type, &field.name);
                    resolver
                        .resolve(parent, &args, &self.context, &info)
                        .await
                        .unwrap_or_else(Resolved::Error)
                }
                Err(message) => Resolved::Error(graphql::Error::builder().message(message).build()),
            }
        };

        let position = Position {
            parent_type,
            nodes: &nodes,
        };
        self.complete_value(&position, field.ty().clone(), resolved, path)
            .await
    }

    fn record_error(&self, position: &Position<'_>, mut error: graphql::Error, path: &Path) {
        if error.path.is_none() {
            error.path = Some(path.clone());
        }
        if error.locations.is_empty() {
            error.locations = position.locations(&self.document);
        }
        debug!(path = %path, message = %error.message, "field error");
        self.errors.lock().push(error);
    }

    fn complete_value<'a>(
        &'a self,
        position: &'a Position<'a>,
        ty: Type,
        resolved: Resolved,
        path: Path,
    ) -> BoxFuture<'a, Completed> {
        async move {
            let completed = match resolved {
                Resolved::Error(error) => {
                    self.record_error(position, error, &path);
                    Err(NullPropagation)
                }
                resolved if resolved.is_null() => Ok(Value::Null),
                resolved => self.complete_nullable(position, &ty, resolved, &path).await,
            };
            if !ty.is_non_null() {
                return Ok(completed.unwrap_or(Value::Null));
            }
            match completed {
                Ok(Value::Null) => {
                    let error = graphql::Error::builder()
                        .message(format!(
                            "Cannot return null for non-nullable field {}.{}.",
                            position.parent_type,
                            position.field_name()
                        ))
                        .build();
                    self.record_error(position, error, &path);
                    Err(NullPropagation)
                }
                completed => completed,
            }
        }
        .boxed()
    }

    async fn complete_nullable(
        &self,
        position: &Position<'_>,
        ty: &Type,
        resolved: Resolved,
        path: &Path,
    ) -> Completed {
        if ty.is_list() {
            let items = match resolved {
                Resolved::List(items) => items,
                Resolved::Value(Value::Array(items)) => {
                    items.into_iter().map(Resolved::Value).collect()
                }
                _ => {
                    let error = graphql::Error::builder()
                        .message(format!(
                            "Expected a list for field {}.{}.",
                            position.parent_type,
                            position.field_name()
                        ))
                        .build();
                    self.record_error(position, error, path);
                    return Err(NullPropagation);
                }
            };
            let item_type = ty.item_type().clone();
            let completed = join_all(items.into_iter().enumerate().map(|(index, item)| {
                self.complete_value(position, item_type.clone(), item, path.child(index))
            }))
            .await;
            return completed
                .into_iter()
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array);
        }

        let type_name = ty.inner_named_type();
        match self.schema.schema().types.get(type_name) {
            Some(ExtendedType::Scalar(_)) => {
                let value = resolved.into_value();
                self.schema
                    .resolvers()
                    .scalar(type_name)
                    .serialize(&value)
                    .map_err(|message| {
                        self.record_error(
                            position,
                            graphql::Error::builder().message(message).build(),
                            path,
                        );
                        NullPropagation
                    })
            }
            Some(ExtendedType::Enum(enum_)) => {
                let value = resolved.into_value();
                match value.as_str() {
                    Some(enum_value) if enum_.values.contains_key(enum_value) => Ok(value),
                    _ => {
                        let message = format!("Enum \"{type_name}\" cannot represent value: {value}");
                        self.record_error(
                            position,
                            graphql::Error::builder().message(message).build(),
                            path,
                        );
                        Err(NullPropagation)
                    }
                }
            }
            Some(ExtendedType::Object(_) | ExtendedType::Interface(_) | ExtendedType::Union(_)) => {
                let object = match resolved {
                    Resolved::Object(object) => object,
                    Resolved::Value(Value::Object(data)) => ExternalObject::new(data),
                    _ => {
                        let message = format!(
                            "Expected an object for field {}.{}.",
                            position.parent_type,
                            position.field_name()
                        );
                        self.record_error(
                            position,
                            graphql::Error::builder().message(message).build(),
                            path,
                        );
                        return Err(NullPropagation);
                    }
                };
                let object_type = match self.resolve_object_type(type_name, &object) {
                    Ok(object_type) => object_type,
                    Err(message) => {
                        self.record_error(
                            position,
                            graphql::Error::builder().message(message).build(),
                            path,
                        );
                        return Err(NullPropagation);
                    }
                };

                let mut fields = FieldsByResponseKey::default();
                let mut visited_fragments = HashSet::default();
                for node in position.nodes {
                    self.collect_fields(
                        &object_type,
                        &node.selection_set,
                        &mut fields,
                        &mut visited_fragments,
                    );
                }
                self.execute_fields(&object_type, &object, fields, path, false)
                    .await
                    .map(Value::Object)
            }
            Some(ExtendedType::InputObject(_)) | None => {
                let message = format!("Unknown output type \"{type_name}\"");
                self.record_error(position, graphql::Error::builder().message(message).build(), path);
                Err(NullPropagation)
            }
        }
    }

    /// The concrete object type of a value whose static type is `type_name`.
    fn resolve_object_type(&self, type_name: &Name, object: &ExternalObject) -> Result<Name, String> {
        let schema = self.schema.schema();
        if matches!(schema.types.get(type_name), Some(ExtendedType::Object(_))) {
            return Ok(type_name.clone());
        }
        let resolved = match self.schema.resolvers().type_resolver(type_name) {
            Some(resolver) => resolver.resolve_type(object, &self.context, type_name),
            None => object.typename().and_then(|typename| Name::new(typename).ok()),
        };
        let Some(object_type) = resolved else {
            return Err(format!(
                "Abstract type \"{type_name}\" must resolve to an object type at runtime. Either the \"{type_name}\" type should provide a \"__resolveType\" resolver or each value should carry \"__typename\"."
            ));
        };
        if !possible_types(schema, type_name).contains(&object_type) {
            return Err(format!(
                "Runtime object type \"{object_type}\" is not a possible type for \"{type_name}\"."
            ));
        }
        Ok(object_type)
    }
}

/// The field being completed, for error messages and locations.
struct Position<'a> {
    parent_type: &'a Name,
    nodes: &'a [Node<executable::Field>],
}

impl Position<'_> {
    fn field_name(&self) -> &str {
        self.nodes
            .first()
            .map(|field| field.name.as_str())
            .unwrap_or_default()
    }

    fn locations(&self, document: &Valid<ExecutableDocument>) -> Vec<Location> {
        self.nodes
            .first()
            .and_then(|field| field.line_column_range(&document.sources))
            .map(|range| Location {
                line: range.start.line as u32,
                column: range.start.column as u32,
            })
            .into_iter()
            .collect()
    }
}

fn variable_error(message: String) -> graphql::Error {
    graphql::Error::builder()
        .message(message)
        .extension_code("BAD_USER_INPUT")
        .build()
}

/// Converts a GraphQL input value to JSON, substituting variables.
pub(crate) fn value_to_json(value: &ast::Value, variables: &Object) -> Value {
    match value {
        ast::Value::Null => Value::Null,
        ast::Value::Enum(name) => Value::String(name.as_str().into()),
        ast::Value::Variable(name) => variables.get(name.as_str()).cloned().unwrap_or(Value::Null),
        ast::Value::String(string) => Value::String(string.as_str().into()),
        ast::Value::Float(float) => float
            .try_to_f64()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ast::Value::Int(int) => match int.try_to_i32() {
            Ok(int) => Value::from(int),
            Err(_) => int
                .try_to_f64()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number)
                .unwrap_or(Value::Null),
        },
        ast::Value::Boolean(bool) => Value::Bool(*bool),
        ast::Value::List(items) => Value::Array(
            items
                .iter()
                .map(|item| value_to_json(item, variables))
                .collect(),
        ),
        ast::Value::Object(fields) => Value::Object(
            fields
                .iter()
                .filter(|(_, value)| match value.as_ref() {
                    ast::Value::Variable(name) => variables.contains_key(name.as_str()),
                    _ => true,
                })
                .map(|(name, value)| (name.as_str().into(), value_to_json(value, variables)))
                .collect(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use apollo_compiler::name;
    use serde_json_bytes::json;

    use super::*;

    #[test]
    fn test_value_to_json_substitutes_variables() {
        let document = ast::Document::parse(
            r#"{ f(arg: {a: 1, b: "two", c: [ONE, 2.5], d: $present, e: $absent}) }"#,
            "query.graphql",
        )
        .unwrap();
        let Some(ast::Definition::OperationDefinition(operation)) = document.definitions.first()
        else {
            panic!("expected an operation");
        };
        let ast::Selection::Field(field) = &operation.selection_set[0] else {
            panic!("expected a field");
        };
        let variables = json!({ "present": true }).as_object().cloned().unwrap();
        assert_eq!(
            value_to_json(&field.arguments[0].value, &variables),
            json!({ "a": 1, "b": "two", "c": ["ONE", 2.5], "d": true })
        );
    }

    #[test]
    fn test_position_field_name_without_nodes() {
        let parent_type = name!("Query");
        let position = Position {
            parent_type: &parent_type,
            nodes: &[],
        };
        assert_eq!(position.field_name(), "");
    }
}
