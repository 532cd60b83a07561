use std::cell::RefCell;
use std::sync::Arc;

use apollo_compiler::Name;
use apollo_compiler::Node;
use apollo_compiler::Schema;
use apollo_compiler::ast;
use apollo_compiler::ast::OperationType;
use apollo_compiler::collections::HashMap;
use apollo_compiler::schema::Component;
use apollo_compiler::schema::ExtendedType;
use apollo_compiler::schema::FieldDefinition;

use super::DelegationRequest;
use super::Transform;
use super::rewrite_fields;
use crate::context::Context;
use crate::error::DelegationError;
use crate::error::StitchingError;
use crate::graphql;
use crate::json_ext::Value;
use crate::schema::HealOptions;
use crate::schema::SchemaVisitor;
use crate::schema::TypeKind;
use crate::schema::Visit;
use crate::schema::rename_type;
use crate::schema::root_operation_type;
use crate::schema::with_named_type;

type TypeRenamer = dyn Fn(&str) -> Option<String> + Send + Sync;
type RootFieldRenamer = dyn Fn(OperationType, &str, &FieldDefinition) -> Option<String> + Send + Sync;
type ObjectFieldRenamer = dyn Fn(&str, &str, &FieldDefinition) -> Option<String> + Send + Sync;

fn new_name(transform: &'static str, name: String) -> Result<Name, StitchingError> {
    Name::new(&name).map_err(|_| StitchingError::InvalidTransform {
        transform: transform.to_string(),
        message: format!("\"{name}\" is not a valid GraphQL name"),
    })
}

/// Renames named types. Root operation types and built-in scalars keep their names.
pub struct RenameTypes {
    renamer: Arc<TypeRenamer>,
    rename_scalars: bool,
    /// Outer name to subschema name.
    reverse: HashMap<Name, Name>,
    /// Subschema name to outer name.
    forward: HashMap<Name, Name>,
}

impl RenameTypes {
    /// `renamer` returns the new name of a type, or `None` to keep it.
    pub fn new(renamer: impl Fn(&str) -> Option<String> + Send + Sync + 'static) -> Self {
        Self {
            renamer: Arc::new(renamer),
            rename_scalars: true,
            reverse: HashMap::default(),
            forward: HashMap::default(),
        }
    }

    /// Leaves custom scalars untouched.
    pub fn without_scalars(mut self) -> Self {
        self.rename_scalars = false;
        self
    }

    fn rename_selections(&self, selections: &[ast::Selection]) -> Vec<ast::Selection> {
        selections
            .iter()
            .map(|selection| match selection {
                ast::Selection::Field(field) => {
                    if field.selection_set.is_empty() {
                        return selection.clone();
                    }
                    let mut field = (**field).clone();
                    field.selection_set = self.rename_selections(&field.selection_set);
                    ast::Selection::Field(Node::new(field))
                }
                ast::Selection::InlineFragment(fragment) => {
                    let mut fragment = (**fragment).clone();
                    if let Some(original) = fragment
                        .type_condition
                        .as_ref()
                        .and_then(|condition| self.reverse.get(condition))
                    {
                        fragment.type_condition = Some(original.clone());
                    }
                    fragment.selection_set = self.rename_selections(&fragment.selection_set);
                    ast::Selection::InlineFragment(Node::new(fragment))
                }
                ast::Selection::FragmentSpread(_) => selection.clone(),
            })
            .collect()
    }

    fn rename_typenames(&self, value: &mut Value) {
        match value {
            Value::Object(object) => {
                for (key, value) in object.iter_mut() {
                    if key.as_str() == "__typename" {
                        let renamed = value
                            .as_str()
                            .and_then(|typename| self.forward.get(typename));
                        if let Some(renamed) = renamed {
                            *value = Value::String(renamed.as_str().into());
                        }
                    } else {
                        self.rename_typenames(value);
                    }
                }
            }
            Value::Array(items) => {
                for item in items {
                    self.rename_typenames(item);
                }
            }
            _ => {}
        }
    }
}

impl Transform for RenameTypes {
    fn name(&self) -> &'static str {
        "RenameTypes"
    }

    fn transform_schema(&mut self, schema: Schema) -> Result<Schema, StitchingError> {
        let renamer = self.renamer.clone();
        let rename_scalars = self.rename_scalars;
        let mut renamed = Vec::new();
        let mut invalid = None;
        let schema = SchemaVisitor::new()
            .on_type(TypeKind::RootObject, |_| Visit::Keep)
            .on_type(TypeKind::Type, |ty| {
                if !rename_scalars && matches!(ty, ExtendedType::Scalar(_)) {
                    return Visit::Keep;
                }
                let Some(name) = renamer(ty.name()) else {
                    return Visit::Keep;
                };
                match new_name("RenameTypes", name) {
                    Ok(name) if name == *ty.name() => Visit::Keep,
                    Ok(name) => {
                        renamed.push((ty.name().clone(), name.clone()));
                        Visit::Replace(rename_type(ty, name))
                    }
                    Err(error) => {
                        invalid = Some(error);
                        Visit::Keep
                    }
                }
            })
            .visit(schema, HealOptions { prune: false })?;
        if let Some(error) = invalid {
            return Err(error);
        }
        for (original, name) in renamed {
            self.reverse.insert(name.clone(), original.clone());
            self.forward.insert(original, name);
        }
        Ok(schema)
    }

    fn transform_request(
        &self,
        mut request: DelegationRequest,
        _context: &Context,
    ) -> Result<DelegationRequest, DelegationError> {
        if self.reverse.is_empty() {
            return Ok(request);
        }
        request.selection_set = self.rename_selections(&request.selection_set);
        request.variable_definitions = request
            .variable_definitions
            .into_iter()
            .map(|mut definition| {
                if let Some(original) = self.reverse.get(definition.ty.inner_named_type()) {
                    let ty = with_named_type(&definition.ty, original.clone());
                    definition.make_mut().ty = Node::new(ty);
                }
                definition
            })
            .collect();
        Ok(request)
    }

    fn transform_result(
        &self,
        mut response: graphql::Response,
        _context: &Context,
    ) -> graphql::Response {
        if let Some(data) = response.data.as_mut() {
            self.rename_typenames(data);
        }
        response
    }
}

/// Outer field names mapped back to subschema field names, per parent type.
#[derive(Default)]
struct FieldRenames {
    renamed: HashMap<(Name, Name), Name>,
    schema: Option<Arc<Schema>>,
}

impl FieldRenames {
    fn transform_request(&self, mut request: DelegationRequest) -> DelegationRequest {
        let Some(schema) = &self.schema else {
            return request;
        };
        if self.renamed.is_empty() {
            return request;
        }
        let Some(root) = schema.root_operation(request.operation_type) else {
            return request;
        };
        request.selection_set = rewrite_fields(
            schema,
            root,
            &request.selection_set,
            &mut |parent_type, mut field| {
                if let Some(original) = self
                    .renamed
                    .get(&(parent_type.clone(), field.name.clone()))
                {
                    field.alias = Some(field.alias.take().unwrap_or_else(|| field.name.clone()));
                    field.name = original.clone();
                }
                vec![ast::Selection::Field(Node::new(field))]
            },
        );
        request
    }
}

/// Renames fields of the root operation types.
pub struct RenameRootFields {
    renamer: Arc<RootFieldRenamer>,
    renames: FieldRenames,
}

impl RenameRootFields {
    pub fn new(
        renamer: impl Fn(OperationType, &str, &FieldDefinition) -> Option<String>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        Self {
            renamer: Arc::new(renamer),
            renames: FieldRenames::default(),
        }
    }
}

impl Transform for RenameRootFields {
    fn name(&self) -> &'static str {
        "RenameRootFields"
    }

    fn transform_schema(&mut self, schema: Schema) -> Result<Schema, StitchingError> {
        let roots: HashMap<Name, OperationType> = schema
            .types
            .keys()
            .filter_map(|name| {
                root_operation_type(&schema, name).map(|operation_type| (name.clone(), operation_type))
            })
            .collect();
        let renamer = self.renamer.clone();
        let mut renamed = Vec::new();
        let mut invalid = None;
        let schema = SchemaVisitor::new()
            .on_field(TypeKind::RootObject, |type_name, field| {
                let Some(operation_type) = roots.get(type_name) else {
                    return Visit::Keep;
                };
                let Some(name) = renamer(*operation_type, &field.name, field) else {
                    return Visit::Keep;
                };
                rename_field(type_name, field, name, "RenameRootFields", &mut renamed, &mut invalid)
            })
            .visit(schema, HealOptions::default())?;
        if let Some(error) = invalid {
            return Err(error);
        }
        self.renames.renamed.extend(renamed);
        self.renames.schema = Some(Arc::new(schema.clone()));
        Ok(schema)
    }

    fn transform_request(
        &self,
        request: DelegationRequest,
        _context: &Context,
    ) -> Result<DelegationRequest, DelegationError> {
        Ok(self.renames.transform_request(request))
    }
}

/// Renames fields of object and interface types, other than the root operation types.
pub struct RenameObjectFields {
    renamer: Arc<ObjectFieldRenamer>,
    renames: FieldRenames,
}

impl RenameObjectFields {
    pub fn new(
        renamer: impl Fn(&str, &str, &FieldDefinition) -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            renamer: Arc::new(renamer),
            renames: FieldRenames::default(),
        }
    }
}

impl Transform for RenameObjectFields {
    fn name(&self) -> &'static str {
        "RenameObjectFields"
    }

    fn transform_schema(&mut self, schema: Schema) -> Result<Schema, StitchingError> {
        let renamer = self.renamer.clone();
        let renamed = RefCell::new(Vec::new());
        let invalid = RefCell::new(None);
        let visit = |type_name: &Name, field: &Component<FieldDefinition>| {
            let Some(name) = renamer(type_name, &field.name, field) else {
                return Visit::Keep;
            };
            rename_field(
                type_name,
                field,
                name,
                "RenameObjectFields",
                &mut renamed.borrow_mut(),
                &mut invalid.borrow_mut(),
            )
        };
        let schema = SchemaVisitor::new()
            .on_field(TypeKind::RootObject, |_, _| Visit::Keep)
            .on_field(TypeKind::Object, visit)
            .on_field(TypeKind::Interface, visit)
            .visit(schema, HealOptions::default())?;
        if let Some(error) = invalid.into_inner() {
            return Err(error);
        }
        self.renames.renamed.extend(renamed.into_inner());
        self.renames.schema = Some(Arc::new(schema.clone()));
        Ok(schema)
    }

    fn transform_request(
        &self,
        request: DelegationRequest,
        _context: &Context,
    ) -> Result<DelegationRequest, DelegationError> {
        Ok(self.renames.transform_request(request))
    }
}

fn rename_field(
    type_name: &Name,
    field: &Component<FieldDefinition>,
    name: String,
    transform: &'static str,
    renamed: &mut Vec<((Name, Name), Name)>,
    invalid: &mut Option<StitchingError>,
) -> Visit<Component<FieldDefinition>> {
    match new_name(transform, name) {
        Ok(name) if name == field.name => Visit::Keep,
        Ok(name) => {
            renamed.push(((type_name.clone(), name.clone()), field.name.clone()));
            let mut replacement = field.clone();
            replacement.make_mut().name = name;
            Visit::Replace(replacement)
        }
        Err(error) => {
            *invalid = Some(error);
            Visit::Keep
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json_bytes::json;

    use super::*;
    use crate::schema::parse_selection_set;

    const SDL: &str = r#"
        type Query { user(id: ID!): User search(filter: Filter): [Result] }
        type User { id: ID! name: String }
        type Post { id: ID! }
        union Result = User | Post
        input Filter { text: String }
    "#;

    fn schema() -> Schema {
        Schema::parse(SDL, "schema.graphql").unwrap()
    }

    #[test]
    fn test_rename_types_keeps_roots() {
        let mut transform = RenameTypes::new(|name| Some(format!("Blog_{name}")));
        let schema = transform.transform_schema(schema()).unwrap();
        assert!(schema.types.contains_key("Query"));
        assert!(schema.types.contains_key("Blog_User"));
        assert!(schema.types.contains_key("Blog_Filter"));
        assert!(!schema.types.contains_key("User"));
        assert_eq!(
            schema.get_object("Query").unwrap().fields["user"].ty.to_string(),
            "Blog_User"
        );
    }

    #[test]
    fn test_rename_types_request_and_result() {
        let mut transform = RenameTypes::new(|name| Some(format!("Blog_{name}")));
        transform.transform_schema(schema()).unwrap();

        let mut request = DelegationRequest::new(
            OperationType::Query,
            parse_selection_set(
                "Query",
                "{ search { __typename ... on Blog_User { name } ... on Blog_Post { id } } }",
            )
            .unwrap(),
        );
        let document = ast::Document::parse("query($f: Blog_Filter) { a }", "q.graphql").unwrap();
        let Some(ast::Definition::OperationDefinition(operation)) = document.definitions.first()
        else {
            panic!("expected an operation");
        };
        request.variable_definitions = operation.variables.clone();
        let request = transform
            .transform_request(request, &Context::new())
            .unwrap();
        let query = request.to_query_string();
        assert!(query.contains("... on User"));
        assert!(query.contains("... on Post"));
        assert!(query.contains("$f: Filter"));

        let response = transform.transform_result(
            graphql::Response::builder()
                .data(json!({ "search": [{ "__typename": "User", "name": "Ada" }] }))
                .build(),
            &Context::new(),
        );
        assert_eq!(
            response.data,
            Some(json!({ "search": [{ "__typename": "Blog_User", "name": "Ada" }] }))
        );
    }

    #[test]
    fn test_invalid_new_name_is_rejected() {
        let mut transform = RenameTypes::new(|_| Some("not a name".to_string()));
        assert!(matches!(
            transform.transform_schema(schema()),
            Err(StitchingError::InvalidTransform { .. })
        ));
    }

    #[test]
    fn test_rename_root_fields_aliases_requests() {
        let mut transform = RenameRootFields::new(|_, name, _| Some(format!("blog_{name}")));
        let schema = transform.transform_schema(schema()).unwrap();
        assert!(schema.get_object("Query").unwrap().fields.contains_key("blog_user"));

        let request = DelegationRequest::new(
            OperationType::Query,
            parse_selection_set("Query", r#"{ blog_user(id: "1") { name } }"#).unwrap(),
        );
        let request = transform
            .transform_request(request, &Context::new())
            .unwrap();
        assert_eq!(
            request.to_query_string(),
            r#"{ blog_user: user(id: "1") { name } }"#
        );
    }

    #[test]
    fn test_rename_object_fields() {
        let mut transform = RenameObjectFields::new(|type_name, field_name, _| {
            (type_name == "User" && field_name == "name").then(|| "fullName".to_string())
        });
        let schema = transform.transform_schema(schema()).unwrap();
        let user = schema.get_object("User").unwrap();
        assert!(user.fields.contains_key("fullName"));
        assert!(!user.fields.contains_key("name"));

        let request = DelegationRequest::new(
            OperationType::Query,
            parse_selection_set("Query", r#"{ user(id: "1") { id fullName } }"#).unwrap(),
        );
        let request = transform
            .transform_request(request, &Context::new())
            .unwrap();
        assert_eq!(
            request.to_query_string(),
            r#"{ user(id: "1") { id fullName: name } }"#
        );
    }
}
