use std::sync::Arc;

use apollo_compiler::Name;
use apollo_compiler::Node;
use apollo_compiler::Schema;
use apollo_compiler::ast;
use apollo_compiler::collections::HashSet;

use super::DelegationRequest;
use super::Transform;
use super::rewrite_fields;
use crate::context::Context;
use crate::error::DelegationError;
use crate::error::StitchingError;
use crate::execution::FieldConfig;
use crate::execution::ResolverMap;
use crate::schema::build_schema;
use crate::schema::parse_selection_set;
use crate::schema::type_fields;

/// Adds type definitions and extensions to a subschema, backed by resolvers of the stitched
/// schema.
///
/// Fields the subschema does not know are removed from requests sent to it. When a field's
/// [`FieldConfig`] declares a selection set, that selection set is requested in its place so
/// its resolver finds what it needs on the parent object.
pub struct ExtendSchema {
    type_defs: String,
    resolvers: ResolverMap,
    added: HashSet<(Name, Name)>,
    schema: Option<Arc<Schema>>,
}

impl ExtendSchema {
    pub fn new(type_defs: impl Into<String>) -> Self {
        Self {
            type_defs: type_defs.into(),
            resolvers: ResolverMap::new(),
            added: HashSet::default(),
            schema: None,
        }
    }

    /// Resolves `type_name.field_name` in the stitched schema.
    pub fn with_field(
        mut self,
        type_name: Name,
        field_name: Name,
        config: impl Into<FieldConfig>,
    ) -> Self {
        self.resolvers = self.resolvers.with_field(type_name, field_name, config);
        self
    }

    fn replacement(&self, parent_type: &Name, field: &ast::Field) -> Vec<ast::Selection> {
        self.resolvers
            .field_config(parent_type, &field.name)
            .and_then(|config| config.selection_set.as_deref())
            .and_then(|selection_set| parse_selection_set(parent_type, selection_set).ok())
            .unwrap_or_default()
    }
}

impl Transform for ExtendSchema {
    fn name(&self) -> &'static str {
        "ExtendSchema"
    }

    fn transform_schema(&mut self, schema: Schema) -> Result<Schema, StitchingError> {
        let base = schema.serialize().to_string();
        let extended = build_schema(
            &format!("{base}\n{}", self.type_defs),
            "extended_schema.graphql",
        )?;
        for (type_name, ty) in &extended.types {
            let Some(fields) = type_fields(ty) else {
                continue;
            };
            let existing = schema.types.get(type_name).and_then(type_fields);
            for field_name in fields.keys() {
                if !existing.is_some_and(|existing| existing.contains_key(field_name)) {
                    self.added.insert((type_name.clone(), field_name.clone()));
                }
            }
        }
        for (type_name, field_name, _) in self.resolvers.fields() {
            if !self.added.contains(&(type_name.clone(), field_name.clone())) {
                return Err(StitchingError::InvalidResolver {
                    type_name: type_name.to_string(),
                    key: field_name.to_string(),
                    message: "the extension does not add this field".to_string(),
                });
            }
        }
        self.schema = Some(Arc::new(extended.clone()));
        Ok(extended)
    }

    fn transform_request(
        &self,
        mut request: DelegationRequest,
        _context: &Context,
    ) -> Result<DelegationRequest, DelegationError> {
        let Some(schema) = &self.schema else {
            return Ok(request);
        };
        if self.added.is_empty() {
            return Ok(request);
        }
        let Some(root) = schema.root_operation(request.operation_type).cloned() else {
            return Ok(request);
        };
        request.selection_set = rewrite_fields(
            schema,
            &root,
            &request.selection_set,
            &mut |parent_type, field| {
                if self
                    .added
                    .contains(&(parent_type.clone(), field.name.clone()))
                {
                    self.replacement(parent_type, &field)
                } else {
                    vec![ast::Selection::Field(Node::new(field))]
                }
            },
        );
        Ok(request)
    }

    fn resolvers(&self) -> Option<ResolverMap> {
        Some(self.resolvers.clone())
    }
}
