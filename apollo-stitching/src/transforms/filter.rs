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
use apollo_compiler::validation::Valid;

use super::DelegationRequest;
use super::Transform;
use crate::context::Context;
use crate::error::DelegationError;
use crate::error::StitchingError;
use crate::schema::HealOptions;
use crate::schema::SchemaVisitor;
use crate::schema::TypeKind;
use crate::schema::Visit;
use crate::schema::field_definition;
use crate::schema::is_composite;
use crate::schema::possible_types;
use crate::schema::root_operation_type;

type TypeFilter = dyn Fn(&ExtendedType) -> bool + Send + Sync;
type RootFieldFilter = dyn Fn(OperationType, &str, &FieldDefinition) -> bool + Send + Sync;
type ObjectFieldFilter = dyn Fn(&str, &str, &FieldDefinition) -> bool + Send + Sync;

/// Removes the named types `filter` rejects, together with every field and argument that
/// referenced them. Root operation types are always kept.
pub struct FilterTypes {
    filter: Arc<TypeFilter>,
}

impl FilterTypes {
    pub fn new(filter: impl Fn(&ExtendedType) -> bool + Send + Sync + 'static) -> Self {
        Self {
            filter: Arc::new(filter),
        }
    }
}

impl Transform for FilterTypes {
    fn name(&self) -> &'static str {
        "FilterTypes"
    }

    fn transform_schema(&mut self, schema: Schema) -> Result<Schema, StitchingError> {
        SchemaVisitor::new()
            .on_type(TypeKind::RootObject, |_| Visit::Keep)
            .on_type(TypeKind::Type, |ty| {
                if (self.filter)(ty) {
                    Visit::Keep
                } else {
                    Visit::Remove
                }
            })
            .visit(schema, HealOptions::default())
    }
}

/// Removes root fields `filter` rejects.
pub struct FilterRootFields {
    filter: Arc<RootFieldFilter>,
}

impl FilterRootFields {
    pub fn new(
        filter: impl Fn(OperationType, &str, &FieldDefinition) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            filter: Arc::new(filter),
        }
    }
}

impl Transform for FilterRootFields {
    fn name(&self) -> &'static str {
        "FilterRootFields"
    }

    fn transform_schema(&mut self, schema: Schema) -> Result<Schema, StitchingError> {
        let roots: HashMap<Name, OperationType> = schema
            .types
            .keys()
            .filter_map(|name| {
                root_operation_type(&schema, name).map(|operation_type| (name.clone(), operation_type))
            })
            .collect();
        SchemaVisitor::new()
            .on_field(TypeKind::RootObject, |type_name, field| {
                match roots.get(type_name) {
                    Some(operation_type) if !(self.filter)(*operation_type, &field.name, field) => {
                        Visit::Remove
                    }
                    _ => Visit::Keep,
                }
            })
            .visit(schema, HealOptions::default())
    }
}

/// Removes fields of object and interface types, other than the root operation types, that
/// `filter` rejects. Types left without fields are pruned.
pub struct FilterObjectFields {
    filter: Arc<ObjectFieldFilter>,
}

impl FilterObjectFields {
    pub fn new(filter: impl Fn(&str, &str, &FieldDefinition) -> bool + Send + Sync + 'static) -> Self {
        Self {
            filter: Arc::new(filter),
        }
    }
}

impl Transform for FilterObjectFields {
    fn name(&self) -> &'static str {
        "FilterObjectFields"
    }

    fn transform_schema(&mut self, schema: Schema) -> Result<Schema, StitchingError> {
        let filter = self.filter.clone();
        let visit = |type_name: &Name, field: &Component<FieldDefinition>| {
            if filter(type_name, &field.name, field) {
                Visit::Keep
            } else {
                Visit::Remove
            }
        };
        SchemaVisitor::new()
            .on_field(TypeKind::RootObject, |_, _| Visit::Keep)
            .on_field(TypeKind::Object, visit)
            .on_field(TypeKind::Interface, visit)
            .visit(schema, HealOptions::default())
    }
}

/// Removes from a request everything the target schema cannot answer: unknown fields and
/// arguments, fragments on unknown or unrelated types, and variables no longer used.
///
/// Composite fields left without any sub-selection are removed as well.
pub struct FilterToSchema {
    schema: Arc<Valid<Schema>>,
}

impl FilterToSchema {
    pub fn new(schema: Arc<Valid<Schema>>) -> Self {
        Self { schema }
    }

    fn filter_selections(&self, parent_type: &Name, selections: &[ast::Selection]) -> Vec<ast::Selection> {
        let mut filtered = Vec::with_capacity(selections.len());
        for selection in selections {
            match selection {
                ast::Selection::Field(field) => {
                    if field.name.as_str() == "__typename" {
                        filtered.push(selection.clone());
                        continue;
                    }
                    let Some(definition) = field_definition(&self.schema, parent_type, &field.name)
                    else {
                        continue;
                    };
                    let mut field = (**field).clone();
                    field.arguments.retain(|argument| {
                        definition
                            .arguments
                            .iter()
                            .any(|defined| defined.name == argument.name)
                    });
                    let field_type = definition.ty.inner_named_type();
                    if is_composite(&self.schema, field_type) {
                        field.selection_set = self.filter_selections(field_type, &field.selection_set);
                        if field.selection_set.is_empty() {
                            continue;
                        }
                    } else {
                        field.selection_set.clear();
                    }
                    filtered.push(ast::Selection::Field(Node::new(field)));
                }
                ast::Selection::InlineFragment(fragment) => {
                    let fragment_type = match &fragment.type_condition {
                        None => parent_type.clone(),
                        Some(condition) if self.can_spread(condition, parent_type) => {
                            condition.clone()
                        }
                        Some(_) => continue,
                    };
                    let mut fragment = (**fragment).clone();
                    fragment.selection_set =
                        self.filter_selections(&fragment_type, &fragment.selection_set);
                    if !fragment.selection_set.is_empty() {
                        filtered.push(ast::Selection::InlineFragment(Node::new(fragment)));
                    }
                }
                ast::Selection::FragmentSpread(_) => {}
            }
        }
        filtered
    }

    fn can_spread(&self, condition: &str, parent_type: &str) -> bool {
        if !self.schema.types.contains_key(condition) {
            return false;
        }
        if condition == parent_type {
            return true;
        }
        let parent_possible = possible_types(&self.schema, parent_type);
        possible_types(&self.schema, condition)
            .iter()
            .any(|possible| parent_possible.contains(possible))
    }
}

impl Transform for FilterToSchema {
    fn name(&self) -> &'static str {
        "FilterToSchema"
    }

    fn transform_request(
        &self,
        mut request: DelegationRequest,
        _context: &Context,
    ) -> Result<DelegationRequest, DelegationError> {
        let Some(root) = self.schema.root_operation(request.operation_type).cloned() else {
            request.selection_set.clear();
            request.prune_variables();
            return Ok(request);
        };
        request.selection_set = self.filter_selections(&root, &request.selection_set);
        request.prune_variables();
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::schema::parse_selection_set;

    const SDL: &str = r#"
        type Query { account(id: ID!): Account accounts: [Account] node(id: ID!): Node }
        type Mutation { deleteAccount(id: ID!): Boolean }
        interface Node { id: ID! }
        type Account implements Node { id: ID! name: String secret: String owner: Owner }
        type Owner { secret: String }
        type Post implements Node { id: ID! }
    "#;

    fn schema() -> Schema {
        Schema::parse(SDL, "schema.graphql").unwrap()
    }

    #[test]
    fn test_filter_object_fields_prunes_empty_types() {
        let mut transform = FilterObjectFields::new(|_, field_name, _| field_name != "secret");
        let schema = transform.transform_schema(schema()).unwrap();
        let account = schema.get_object("Account").unwrap();
        assert!(!account.fields.contains_key("secret"));
        assert!(!account.fields.contains_key("owner"));
        assert!(!schema.types.contains_key("Owner"));
    }

    #[rstest]
    #[case::queries(OperationType::Query, "accounts", false)]
    #[case::mutations(OperationType::Mutation, "deleteAccount", false)]
    #[case::other_query(OperationType::Query, "account", true)]
    fn test_filter_root_fields(
        #[case] operation_type: OperationType,
        #[case] field_name: &str,
        #[case] kept: bool,
    ) {
        let mut transform = FilterRootFields::new(|operation_type, field_name, _| {
            !matches!(
                (operation_type, field_name),
                (OperationType::Query, "accounts") | (OperationType::Mutation, "deleteAccount")
            )
        });
        let schema = transform.transform_schema(schema()).unwrap();
        let root = schema.root_operation(operation_type).cloned();
        let has_field = root
            .and_then(|root| schema.get_object(&root).map(|object| object.fields.contains_key(field_name)))
            .unwrap_or(false);
        assert_eq!(has_field, kept);
    }

    #[test]
    fn test_filter_types_keeps_roots() {
        let mut transform = FilterTypes::new(|ty| ty.name().as_str() != "Post");
        let schema = transform.transform_schema(schema()).unwrap();
        assert!(!schema.types.contains_key("Post"));
        assert!(schema.types.contains_key("Query"));
        assert!(schema.types.contains_key("Node"));
    }

    #[test]
    fn test_filter_to_schema() {
        let target = Arc::new(schema().validate().unwrap());
        let transform = FilterToSchema::new(target);
        let mut request = DelegationRequest::new(
            OperationType::Query,
            parse_selection_set(
                "Query",
                r#"{
                    account(id: $id, unknown: 1) { id email profile { bio } }
                    node(id: "1") { ... on Post { id } ... on Missing { id } ... on Owner { secret } }
                    missing { id }
                }"#,
            )
            .unwrap(),
        );
        request.variables.insert("id", "1".into());
        request.variables.insert("unused", "2".into());
        let request = transform
            .transform_request(request, &Context::new())
            .unwrap();
        assert_eq!(
            request.to_query_string(),
            r#"{ account(id: $id) { id } node(id: "1") { ... on Post { id } } }"#
        );
        assert_eq!(request.variables.len(), 1);
    }
}
