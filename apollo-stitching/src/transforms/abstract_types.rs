use std::sync::Arc;

use apollo_compiler::Name;
use apollo_compiler::Node;
use apollo_compiler::Schema;
use apollo_compiler::ast;
use apollo_compiler::collections::HashMap;
use apollo_compiler::collections::IndexSet;
use apollo_compiler::schema::ExtendedType;
use apollo_compiler::validation::Valid;

use super::DelegationRequest;
use super::Transform;
use super::field_selection;
use super::rewrite_fields;
use crate::context::Context;
use crate::error::DelegationError;
use crate::schema::field_definition;
use crate::schema::is_abstract;
use crate::schema::possible_types;

/// Rewrites fragments on abstract types the target schema lacks into one fragment per concrete
/// type the target does define.
///
/// This lets a stitched schema expose interfaces or unions that no single subschema declares.
pub struct ExpandAbstractTypes {
    mapping: HashMap<Name, IndexSet<Name>>,
}

impl ExpandAbstractTypes {
    pub fn new(outer: &Schema, target: &Schema) -> Self {
        let mut mapping = HashMap::default();
        for (name, ty) in &outer.types {
            if !matches!(ty, ExtendedType::Interface(_) | ExtendedType::Union(_)) {
                continue;
            }
            if is_abstract(target, name) {
                continue;
            }
            let concrete: IndexSet<Name> = possible_types(outer, name)
                .into_iter()
                .filter(|possible| {
                    matches!(target.types.get(possible), Some(ExtendedType::Object(_)))
                })
                .collect();
            mapping.insert(name.clone(), concrete);
        }
        Self { mapping }
    }

    fn expand(&self, selections: &[ast::Selection]) -> Vec<ast::Selection> {
        let mut expanded = Vec::with_capacity(selections.len());
        for selection in selections {
            match selection {
                ast::Selection::Field(field) => {
                    if field.selection_set.is_empty() {
                        expanded.push(selection.clone());
                        continue;
                    }
                    let mut field = (**field).clone();
                    field.selection_set = self.expand(&field.selection_set);
                    expanded.push(ast::Selection::Field(Node::new(field)));
                }
                ast::Selection::InlineFragment(fragment) => {
                    let selection_set = self.expand(&fragment.selection_set);
                    match fragment
                        .type_condition
                        .as_ref()
                        .and_then(|condition| self.mapping.get(condition))
                    {
                        Some(concrete) => {
                            for type_name in concrete {
                                expanded.push(ast::Selection::InlineFragment(Node::new(
                                    ast::InlineFragment {
                                        type_condition: Some(type_name.clone()),
                                        directives: fragment.directives.clone(),
                                        selection_set: selection_set.clone(),
                                    },
                                )));
                            }
                        }
                        None => {
                            let mut fragment = (**fragment).clone();
                            fragment.selection_set = selection_set;
                            expanded.push(ast::Selection::InlineFragment(Node::new(fragment)));
                        }
                    }
                }
                ast::Selection::FragmentSpread(_) => expanded.push(selection.clone()),
            }
        }
        expanded
    }
}

impl Transform for ExpandAbstractTypes {
    fn name(&self) -> &'static str {
        "ExpandAbstractTypes"
    }

    fn transform_request(
        &self,
        mut request: DelegationRequest,
        _context: &Context,
    ) -> Result<DelegationRequest, DelegationError> {
        if !self.mapping.is_empty() {
            request.selection_set = self.expand(&request.selection_set);
        }
        Ok(request)
    }
}

/// Selects `__typename` below every field of an abstract type, so that results can be
/// completed against their concrete type.
pub struct AddTypenameToAbstract {
    schema: Arc<Valid<Schema>>,
}

impl AddTypenameToAbstract {
    pub fn new(schema: Arc<Valid<Schema>>) -> Self {
        Self { schema }
    }
}

impl Transform for AddTypenameToAbstract {
    fn name(&self) -> &'static str {
        "AddTypenameToAbstract"
    }

    fn transform_request(
        &self,
        mut request: DelegationRequest,
        _context: &Context,
    ) -> Result<DelegationRequest, DelegationError> {
        let Some(root) = self.schema.root_operation(request.operation_type).cloned() else {
            return Ok(request);
        };
        request.selection_set = rewrite_fields(
            &self.schema,
            &root,
            &request.selection_set,
            &mut |parent_type, mut field| {
                let returns_abstract = field_definition(&self.schema, parent_type, &field.name)
                    .is_some_and(|definition| {
                        is_abstract(&self.schema, definition.ty.inner_named_type())
                    });
                if returns_abstract && !has_typename(&field.selection_set) {
                    field.selection_set.insert(
                        0,
                        field_selection(
                            apollo_compiler::name!("__typename"),
                            None,
                            Vec::new(),
                            Vec::new(),
                        ),
                    );
                }
                vec![ast::Selection::Field(Node::new(field))]
            },
        );
        Ok(request)
    }
}

fn has_typename(selections: &[ast::Selection]) -> bool {
    selections.iter().any(|selection| {
        matches!(
            selection,
            ast::Selection::Field(field)
                if field.name.as_str() == "__typename" && field.alias.is_none()
        )
    })
}

#[cfg(test)]
mod tests {
    use apollo_compiler::ast::OperationType;

    use super::*;
    use crate::schema::parse_selection_set;

    #[test]
    fn test_fragments_on_missing_abstract_types_are_expanded() {
        let outer = Schema::parse(
            r#"
            type Query { search: [Result] }
            union Result = User | Post | Comment
            type User { id: ID! }
            type Post { id: ID! }
            type Comment { id: ID! }
            "#,
            "outer.graphql",
        )
        .unwrap();
        let target = Schema::parse(
            r#"
            type Query { search: [Post] }
            type User { id: ID! }
            type Post { id: ID! }
            "#,
            "target.graphql",
        )
        .unwrap();
        let transform = ExpandAbstractTypes::new(&outer, &target);
        let request = DelegationRequest::new(
            OperationType::Query,
            parse_selection_set("Query", "{ search { ... on Result { id } } }").unwrap(),
        );
        let request = transform
            .transform_request(request, &Context::new())
            .unwrap();
        assert_eq!(
            request.to_query_string(),
            "{ search { ... on User { id } ... on Post { id } } }"
        );
    }

    #[test]
    fn test_typename_is_added_below_abstract_fields() {
        let schema = Schema::parse_and_validate(
            r#"
            type Query { node: Node user: User }
            interface Node { id: ID! }
            type User implements Node { id: ID! }
            "#,
            "schema.graphql",
        )
        .unwrap();
        let transform = AddTypenameToAbstract::new(Arc::new(schema));
        let request = DelegationRequest::new(
            OperationType::Query,
            parse_selection_set("Query", "{ node { id } user { id } }").unwrap(),
        );
        let request = transform
            .transform_request(request, &Context::new())
            .unwrap();
        assert_eq!(
            request.to_query_string(),
            "{ node { __typename id } user { id } }"
        );
    }
}
