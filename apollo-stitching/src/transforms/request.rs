use apollo_compiler::Name;
use apollo_compiler::Node;
use apollo_compiler::Schema;
use apollo_compiler::ast;
use apollo_compiler::ast::OperationType;
use apollo_compiler::collections::IndexSet;

use crate::graphql;
use crate::json_ext::Object;
use crate::schema::field_definition;

/// A request on its way to a subschema.
///
/// The request holds a single anonymous operation; fragment spreads are inlined before a request
/// is built, so transforms only ever see fields and inline fragments.
#[derive(Clone, Debug)]
pub struct DelegationRequest {
    pub operation_type: OperationType,
    pub selection_set: Vec<ast::Selection>,
    pub variable_definitions: Vec<Node<ast::VariableDefinition>>,
    pub variables: Object,
}

impl DelegationRequest {
    pub fn new(operation_type: OperationType, selection_set: Vec<ast::Selection>) -> Self {
        Self {
            operation_type,
            selection_set,
            variable_definitions: Vec::new(),
            variables: Object::new(),
        }
    }

    pub fn to_operation(&self) -> ast::OperationDefinition {
        ast::OperationDefinition {
            operation_type: self.operation_type,
            name: None,
            variables: self.variable_definitions.clone(),
            directives: Default::default(),
            selection_set: self.selection_set.clone(),
        }
    }

    pub fn to_query_string(&self) -> String {
        self.to_operation().serialize().no_indent().to_string()
    }

    pub fn into_graphql_request(self) -> graphql::Request {
        let mut request = graphql::Request::builder()
            .query(self.to_query_string())
            .build();
        request.variables = self.variables;
        request
    }

    /// Drops variable definitions and values the selection set no longer uses.
    pub(crate) fn prune_variables(&mut self) {
        let used = collect_variables(&self.selection_set);
        self.variable_definitions
            .retain(|definition| used.contains(&definition.name));
        let mut variables = Object::new();
        for (name, value) in std::mem::take(&mut self.variables) {
            if used.iter().any(|used| used.as_str() == name.as_str()) {
                variables.insert(name, value);
            }
        }
        self.variables = variables;
    }
}

/// Rewrites every field of `selections`, depth first.
///
/// `rewrite` receives the parent type of each field and the field with its sub-selections
/// already rewritten, and returns the selections replacing it. Sub-selections are typed through
/// `schema`; below a field the schema does not know, parent types are no longer meaningful and
/// the field's name stands in for them.
pub(crate) fn rewrite_fields(
    schema: &Schema,
    parent_type: &Name,
    selections: &[ast::Selection],
    rewrite: &mut dyn FnMut(&Name, ast::Field) -> Vec<ast::Selection>,
) -> Vec<ast::Selection> {
    let mut rewritten = Vec::with_capacity(selections.len());
    for selection in selections {
        match selection {
            ast::Selection::Field(field) => {
                let mut field = (**field).clone();
                if !field.selection_set.is_empty() {
                    let child_type = field_definition(schema, parent_type, &field.name)
                        .map(|definition| definition.ty.inner_named_type().clone())
                        .unwrap_or_else(|| field.name.clone());
                    field.selection_set =
                        rewrite_fields(schema, &child_type, &field.selection_set, rewrite);
                }
                rewritten.extend(rewrite(parent_type, field));
            }
            ast::Selection::InlineFragment(fragment) => {
                let mut fragment = (**fragment).clone();
                let fragment_type = match &fragment.type_condition {
                    Some(condition) if schema.types.contains_key(condition) => condition.clone(),
                    _ => parent_type.clone(),
                };
                fragment.selection_set =
                    rewrite_fields(schema, &fragment_type, &fragment.selection_set, rewrite);
                rewritten.push(ast::Selection::InlineFragment(Node::new(fragment)));
            }
            ast::Selection::FragmentSpread(_) => rewritten.push(selection.clone()),
        }
    }
    rewritten
}

/// The variables referenced anywhere in `selections`, in order of first use.
pub(crate) fn collect_variables(selections: &[ast::Selection]) -> IndexSet<Name> {
    let mut variables = IndexSet::default();
    collect_selection_variables(selections, &mut variables);
    variables
}

fn collect_selection_variables(selections: &[ast::Selection], variables: &mut IndexSet<Name>) {
    for selection in selections {
        match selection {
            ast::Selection::Field(field) => {
                for argument in &field.arguments {
                    collect_value_variables(&argument.value, variables);
                }
                collect_directive_variables(&field.directives, variables);
                collect_selection_variables(&field.selection_set, variables);
            }
            ast::Selection::InlineFragment(fragment) => {
                collect_directive_variables(&fragment.directives, variables);
                collect_selection_variables(&fragment.selection_set, variables);
            }
            ast::Selection::FragmentSpread(spread) => {
                collect_directive_variables(&spread.directives, variables);
            }
        }
    }
}

fn collect_directive_variables(directives: &ast::DirectiveList, variables: &mut IndexSet<Name>) {
    for directive in directives.iter() {
        for argument in &directive.arguments {
            collect_value_variables(&argument.value, variables);
        }
    }
}

fn collect_value_variables(value: &ast::Value, variables: &mut IndexSet<Name>) {
    match value {
        ast::Value::Variable(name) => {
            variables.insert(name.clone());
        }
        ast::Value::List(items) => {
            for item in items {
                collect_value_variables(item, variables);
            }
        }
        ast::Value::Object(fields) => {
            for (_, value) in fields {
                collect_value_variables(value, variables);
            }
        }
        _ => {}
    }
}

/// Builds a field selection.
pub(crate) fn field_selection(
    name: Name,
    alias: Option<Name>,
    arguments: Vec<Node<ast::Argument>>,
    selection_set: Vec<ast::Selection>,
) -> ast::Selection {
    ast::Selection::Field(Node::new(ast::Field {
        alias,
        name,
        arguments,
        directives: Default::default(),
        selection_set,
    }))
}

#[cfg(test)]
mod tests {
    use apollo_compiler::name;

    use super::*;
    use crate::schema::parse_selection_set;

    #[test]
    fn test_collect_variables() {
        let selections = parse_selection_set(
            "Query",
            "{ user(id: $id) { posts(filter: { after: $after, tags: [$tag] }) @include(if: $withPosts) { id } } }",
        )
        .unwrap();
        let variables: Vec<_> = collect_variables(&selections)
            .into_iter()
            .map(|name| name.to_string())
            .collect();
        assert_eq!(variables, vec!["id", "after", "tag", "withPosts"]);
    }

    #[test]
    fn test_rewrite_fields_sees_parent_types() {
        let schema = Schema::parse(
            "type Query { user: User } type User { id: ID name: String }",
            "schema.graphql",
        )
        .unwrap();
        let selections = parse_selection_set("Query", "{ user { id name } }").unwrap();
        let mut seen = Vec::new();
        let rewritten = rewrite_fields(&schema, &name!("Query"), &selections, &mut |parent, field| {
            seen.push(format!("{parent}.{}", field.name));
            if field.name.as_str() == "name" {
                Vec::new()
            } else {
                vec![ast::Selection::Field(Node::new(field))]
            }
        });
        assert_eq!(seen, vec!["User.id", "User.name", "Query.user"]);
        let request = DelegationRequest::new(OperationType::Query, rewritten);
        assert_eq!(request.to_query_string(), "{ user { id } }");
    }

    #[test]
    fn test_prune_variables() {
        let mut request = DelegationRequest::new(
            OperationType::Query,
            parse_selection_set("Query", "{ user(id: $id) { id } }").unwrap(),
        );
        let document = ast::Document::parse(
            "query($id: ID!, $unused: Int) { a }",
            "query.graphql",
        )
        .unwrap();
        let Some(ast::Definition::OperationDefinition(operation)) = document.definitions.first()
        else {
            panic!("expected an operation");
        };
        request.variable_definitions = operation.variables.clone();
        request.variables.insert("id", "1".into());
        request.variables.insert("unused", 2.into());
        request.prune_variables();
        assert_eq!(request.variable_definitions.len(), 1);
        assert_eq!(request.variables.len(), 1);
        let query = request.to_query_string();
        assert!(query.contains("$id: ID!"));
        assert!(!query.contains("$unused"));
    }
}
