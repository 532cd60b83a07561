use std::sync::Arc;

use apollo_compiler::Node;
use apollo_compiler::Schema;
use apollo_compiler::ast;
use apollo_compiler::validation::Valid;

use super::DelegationRequest;
use super::Transform;
use super::rewrite_fields;
use crate::context::Context;
use crate::error::DelegationError;
use crate::merge::MergeInfo;
use crate::schema::field_definition;
use crate::schema::is_abstract;
use crate::schema::possible_types;

/// Adds the selections the stitched schema needs to complete results: the key fields of every
/// merged type and the fields custom resolvers declared they depend on.
pub struct AddMergedTypeSelectionSets {
    schema: Arc<Valid<Schema>>,
    merge_info: Arc<MergeInfo>,
}

impl AddMergedTypeSelectionSets {
    /// `schema` types the request, normally the schema of the subschema it is sent to, as seen
    /// by the stitched schema.
    pub fn new(schema: Arc<Valid<Schema>>, merge_info: Arc<MergeInfo>) -> Self {
        Self { schema, merge_info }
    }

    fn requirements(&self, type_name: &str, selections: &[ast::Selection]) -> Vec<ast::Selection> {
        let mut required = Vec::new();
        if let Some(keys) = self.merge_info.type_selection_set(type_name) {
            required.extend(keys.iter().cloned());
        }
        if is_abstract(&self.schema, type_name) {
            for possible in possible_types(&self.schema, type_name) {
                if let Some(keys) = self.merge_info.type_selection_set(&possible) {
                    required.push(ast::Selection::InlineFragment(Node::new(
                        ast::InlineFragment {
                            type_condition: Some(possible),
                            directives: Default::default(),
                            selection_set: keys.to_vec(),
                        },
                    )));
                }
            }
        }
        for selection in selections {
            if let ast::Selection::Field(field) = selection {
                if let Some(dependencies) = self
                    .merge_info
                    .field_selection_set(type_name, &field.name)
                {
                    required.extend(dependencies.iter().cloned());
                }
            }
        }
        required
    }
}

impl Transform for AddMergedTypeSelectionSets {
    fn name(&self) -> &'static str {
        "AddMergedTypeSelectionSets"
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
                if !field.selection_set.is_empty() {
                    if let Some(definition) = field_definition(&self.schema, parent_type, &field.name)
                    {
                        let field_type = definition.ty.inner_named_type();
                        for required in self.requirements(field_type, &field.selection_set) {
                            if !field.selection_set.contains(&required) {
                                field.selection_set.push(required);
                            }
                        }
                    }
                }
                vec![ast::Selection::Field(Node::new(field))]
            },
        );
        Ok(request)
    }
}
