//! Converts executable selections back into syntax, for requests sent to other schemas.
//!
//! Named fragments are inlined as inline fragments carrying the fragment's type condition, so the
//! selections are self-contained.

use apollo_compiler::ExecutableDocument;
use apollo_compiler::Node;
use apollo_compiler::ast;
use apollo_compiler::executable;

pub(crate) fn selection_set_to_ast(
    document: &ExecutableDocument,
    selection_set: &executable::SelectionSet,
) -> Vec<ast::Selection> {
    selection_set
        .selections
        .iter()
        .filter_map(|selection| selection_to_ast(document, selection))
        .collect()
}

fn selection_to_ast(
    document: &ExecutableDocument,
    selection: &executable::Selection,
) -> Option<ast::Selection> {
    match selection {
        executable::Selection::Field(field) => {
            Some(ast::Selection::Field(Node::new(field_to_ast(document, field))))
        }
        executable::Selection::FragmentSpread(spread) => {
            let fragment = document.fragments.get(&spread.fragment_name)?;
            Some(ast::Selection::InlineFragment(Node::new(ast::InlineFragment {
                type_condition: Some(fragment.type_condition().clone()),
                directives: spread.directives.clone(),
                selection_set: selection_set_to_ast(document, &fragment.selection_set),
            })))
        }
        executable::Selection::InlineFragment(inline) => {
            Some(ast::Selection::InlineFragment(Node::new(ast::InlineFragment {
                type_condition: inline.type_condition.clone(),
                directives: inline.directives.clone(),
                selection_set: selection_set_to_ast(document, &inline.selection_set),
            })))
        }
    }
}

pub(crate) fn field_to_ast(document: &ExecutableDocument, field: &executable::Field) -> ast::Field {
    ast::Field {
        alias: field.alias.clone(),
        name: field.name.clone(),
        arguments: field.arguments.clone(),
        directives: field.directives.clone(),
        selection_set: selection_set_to_ast(document, &field.selection_set),
    }
}

#[cfg(test)]
mod tests {
    use apollo_compiler::Schema;

    use super::*;

    #[test]
    fn test_fragment_spreads_are_inlined() {
        let schema = Schema::parse_and_validate(
            "type Query { user: User } type User { id: ID! name: String }",
            "schema.graphql",
        )
        .unwrap();
        let document = ExecutableDocument::parse_and_validate(
            &schema,
            "{ user { ...UserFields id } } fragment UserFields on User { name }",
            "query.graphql",
        )
        .unwrap();
        let operation = document.operations.get(None).unwrap();
        let executable::Selection::Field(user) = &operation.selection_set.selections[0] else {
            panic!("expected a field");
        };
        let selections = selection_set_to_ast(&document, &user.selection_set);
        let rendered: Vec<String> = selections
            .iter()
            .map(|selection| selection.serialize().no_indent().to_string())
            .collect();
        assert_eq!(rendered, vec!["... on User { name }", "id"]);
    }
}
