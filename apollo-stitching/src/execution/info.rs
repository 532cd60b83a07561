use std::sync::Arc;

use apollo_compiler::ExecutableDocument;
use apollo_compiler::Name;
use apollo_compiler::Node;
use apollo_compiler::ast;
use apollo_compiler::executable;
use apollo_compiler::validation::Valid;
use parking_lot::Mutex;

use super::ExecutableSchema;
use super::to_ast;
use crate::graphql;
use crate::json_ext::Object;
use crate::json_ext::Path;
use crate::merge::MergeInfo;

/// What a resolver knows about the field it resolves.
#[derive(Clone)]
pub struct ResolveInfo {
    /// The schema the operation executes against.
    pub schema: ExecutableSchema,
    pub document: Arc<Valid<ExecutableDocument>>,
    pub operation: Node<executable::Operation>,
    pub parent_type: Name,
    pub field_name: Name,
    /// The field's alias, or its name.
    pub response_key: Name,
    /// Every node selecting this field at this position, in document order.
    pub field_nodes: Vec<Node<executable::Field>>,
    pub return_type: ast::Type,
    /// The response path of the field, ending with its response key.
    pub path: Path,
    /// The coerced variables of the operation.
    pub variable_values: Arc<Object>,
    pub(crate) errors: Arc<Mutex<Vec<graphql::Error>>>,
}

impl ResolveInfo {
    /// The stitching metadata of the schema, if it was built by merging subschemas.
    pub fn merge_info(&self) -> Option<&Arc<MergeInfo>> {
        self.schema.merge_info()
    }

    /// Records an error without failing the field. Errors without a path are located at the
    /// field.
    pub fn report_error(&self, error: graphql::Error) {
        let error = if error.path.as_ref().is_some_and(|path| !path.is_empty()) {
            error
        } else {
            error.at_path(self.path.clone())
        };
        self.errors.lock().push(error);
    }

    /// The sub-selections of every field node, as syntax. Fragment spreads become inline
    /// fragments.
    pub fn selection_set(&self) -> Vec<ast::Selection> {
        self.field_nodes
            .iter()
            .flat_map(|field| to_ast::selection_set_to_ast(&self.document, &field.selection_set))
            .collect()
    }

    /// The arguments of the first field node, as syntax.
    pub fn arguments(&self) -> Vec<Node<ast::Argument>> {
        self.field_nodes
            .first()
            .map(|field| field.arguments.clone())
            .unwrap_or_default()
    }

    pub fn variable_definitions(&self) -> &[Node<ast::VariableDefinition>] {
        &self.operation.variables
    }
}

impl std::fmt::Debug for ResolveInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolveInfo")
            .field("parent_type", &self.parent_type)
            .field("field_name", &self.field_name)
            .field("return_type", &self.return_type)
            .field("path", &self.path)
            .finish()
    }
}
