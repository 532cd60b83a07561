//! Schema helpers shared by the healer, the visitor, transforms and the merger.

use apollo_compiler::Name;
use apollo_compiler::Schema;
use apollo_compiler::ast;
use apollo_compiler::ast::OperationType;
use apollo_compiler::ast::Type;
use apollo_compiler::collections::IndexMap;
use apollo_compiler::collections::IndexSet;
use apollo_compiler::schema::Component;
use apollo_compiler::schema::ExtendedType;
use apollo_compiler::schema::FieldDefinition;

use crate::error::StitchingError;

pub mod heal;
pub mod visitor;

pub use heal::HealOptions;
pub use heal::heal_schema;
pub use visitor::SchemaVisitor;
pub use visitor::TypeKind;
pub use visitor::Visit;

pub(crate) const OPERATION_TYPES: [OperationType; 3] = [
    OperationType::Query,
    OperationType::Mutation,
    OperationType::Subscription,
];

/// Names starting with `__` are reserved for introspection and resolver meta keys.
pub(crate) fn is_meta_name(name: &str) -> bool {
    name.starts_with("__")
}

pub(crate) fn default_root_type_name(operation_type: OperationType) -> Name {
    match operation_type {
        OperationType::Query => apollo_compiler::name!("Query"),
        OperationType::Mutation => apollo_compiler::name!("Mutation"),
        OperationType::Subscription => apollo_compiler::name!("Subscription"),
    }
}

/// Returns the operation type `type_name` is the root of, if any.
pub(crate) fn root_operation_type(schema: &Schema, type_name: &str) -> Option<OperationType> {
    OPERATION_TYPES
        .into_iter()
        .find(|operation_type| {
            schema
                .root_operation(*operation_type)
                .is_some_and(|root| root.as_str() == type_name)
        })
}

/// The fields of an object or interface type.
pub(crate) fn type_fields(ty: &ExtendedType) -> Option<&IndexMap<Name, Component<FieldDefinition>>> {
    match ty {
        ExtendedType::Object(object) => Some(&object.fields),
        ExtendedType::Interface(interface) => Some(&interface.fields),
        _ => None,
    }
}

pub(crate) fn field_definition<'a>(
    schema: &'a Schema,
    type_name: &str,
    field_name: &str,
) -> Option<&'a Component<FieldDefinition>> {
    schema.types.get(type_name).and_then(type_fields)?.get(field_name)
}

pub(crate) fn is_abstract(schema: &Schema, type_name: &str) -> bool {
    matches!(
        schema.types.get(type_name),
        Some(ExtendedType::Interface(_) | ExtendedType::Union(_))
    )
}

pub(crate) fn is_composite(schema: &Schema, type_name: &str) -> bool {
    matches!(
        schema.types.get(type_name),
        Some(ExtendedType::Object(_) | ExtendedType::Interface(_) | ExtendedType::Union(_))
    )
}

pub(crate) fn is_leaf(schema: &Schema, type_name: &str) -> bool {
    matches!(
        schema.types.get(type_name),
        Some(ExtendedType::Scalar(_) | ExtendedType::Enum(_))
    )
}

/// The object types a value of type `type_name` may have at runtime.
pub(crate) fn possible_types(schema: &Schema, type_name: &str) -> IndexSet<Name> {
    match schema.types.get(type_name) {
        Some(ExtendedType::Object(object)) => std::iter::once(object.name.clone()).collect(),
        Some(ExtendedType::Union(union_)) => union_
            .members
            .iter()
            .filter(|member| matches!(schema.types.get(member.as_str()), Some(ExtendedType::Object(_))))
            .map(|member| member.name.clone())
            .collect(),
        Some(ExtendedType::Interface(_)) => schema
            .types
            .values()
            .filter_map(|ty| match ty {
                ExtendedType::Object(object)
                    if object
                        .implements_interfaces
                        .iter()
                        .any(|interface| interface.as_str() == type_name) =>
                {
                    Some(object.name.clone())
                }
                _ => None,
            })
            .collect(),
        _ => IndexSet::default(),
    }
}

/// Whether a fragment with type condition `type_condition` applies to an object of type
/// `object_type`.
pub(crate) fn does_type_apply(schema: &Schema, type_condition: &str, object_type: &str) -> bool {
    type_condition == object_type || possible_types(schema, type_condition).contains(object_type)
}

/// Returns `ty` with its innermost named type replaced by `name`.
pub(crate) fn with_named_type(ty: &Type, name: Name) -> Type {
    match ty {
        Type::Named(_) => Type::Named(name),
        Type::NonNullNamed(_) => Type::NonNullNamed(name),
        Type::List(inner) => Type::List(Box::new(with_named_type(inner, name))),
        Type::NonNullList(inner) => Type::NonNullList(Box::new(with_named_type(inner, name))),
    }
}

/// Returns a copy of `ty` under a new name. The original type is left untouched.
pub fn rename_type(ty: &ExtendedType, name: Name) -> ExtendedType {
    let mut renamed = ty.clone();
    match &mut renamed {
        ExtendedType::Scalar(node) => node.make_mut().name = name,
        ExtendedType::Object(node) => node.make_mut().name = name,
        ExtendedType::Interface(node) => node.make_mut().name = name,
        ExtendedType::Union(node) => node.make_mut().name = name,
        ExtendedType::Enum(node) => node.make_mut().name = name,
        ExtendedType::InputObject(node) => node.make_mut().name = name,
    }
    renamed
}

/// Parses a selection set such as `{ id }` or `id name`.
pub fn parse_selection_set(
    type_name: &str,
    source: &str,
) -> Result<Vec<ast::Selection>, StitchingError> {
    let trimmed = source.trim();
    let text = if trimmed.starts_with('{') {
        trimmed.to_string()
    } else {
        format!("{{ {trimmed} }}")
    };
    let invalid = |message: String| StitchingError::InvalidSelectionSet {
        type_name: type_name.to_string(),
        selection_set: source.to_string(),
        message,
    };
    let document = ast::Document::parse(text, "selection_set.graphql")
        .map_err(|with_errors| invalid(with_errors.errors.to_string()))?;
    match document.definitions.as_slice() {
        [ast::Definition::OperationDefinition(operation)] => Ok(operation.selection_set.clone()),
        _ => Err(invalid("expected a single selection set".to_string())),
    }
}

/// Parses a type definition document into a schema without validating it.
pub(crate) fn build_schema(type_defs: &str, path: &str) -> Result<Schema, StitchingError> {
    Schema::builder()
        .adopt_orphan_extensions()
        .parse(type_defs, path)
        .build()
        .map_err(StitchingError::from)
}
