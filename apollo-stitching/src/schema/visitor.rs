//! A rewriting traversal over a schema's type graph.
//!
//! Visitors are registered per [`TypeKind`]. Each element is handed to the visitor registered
//! for its most specific kind, falling back to less specific kinds: a field of the query root
//! is offered to a [`TypeKind::Query`] field visitor first, then [`TypeKind::RootObject`],
//! [`TypeKind::Object`] and finally [`TypeKind::Type`].
//!
//! The schema is healed once every visitor ran, so a visitor that renames or removes a type
//! never has to fix the references to it.

use apollo_compiler::Name;
use apollo_compiler::Node;
use apollo_compiler::Schema;
use apollo_compiler::ast::OperationType;
use apollo_compiler::collections::HashMap;
use apollo_compiler::collections::IndexMap;
use apollo_compiler::schema::Component;
use apollo_compiler::schema::EnumValueDefinition;
use apollo_compiler::schema::ExtendedType;
use apollo_compiler::schema::FieldDefinition;
use apollo_compiler::schema::InputValueDefinition;

use super::HealOptions;
use super::heal_schema;
use super::is_meta_name;
use super::root_operation_type;
use crate::error::StitchingError;

/// Classifies named types, from the most generic to the most specific.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TypeKind {
    Type,
    Scalar,
    Enum,
    Object,
    InputObject,
    Union,
    Interface,
    RootObject,
    Query,
    Mutation,
    Subscription,
}

impl TypeKind {
    fn of(schema: &Schema, ty: &ExtendedType) -> Self {
        match ty {
            ExtendedType::Scalar(_) => TypeKind::Scalar,
            ExtendedType::Enum(_) => TypeKind::Enum,
            ExtendedType::InputObject(_) => TypeKind::InputObject,
            ExtendedType::Union(_) => TypeKind::Union,
            ExtendedType::Interface(_) => TypeKind::Interface,
            ExtendedType::Object(object) => match root_operation_type(schema, &object.name) {
                Some(OperationType::Query) => TypeKind::Query,
                Some(OperationType::Mutation) => TypeKind::Mutation,
                Some(OperationType::Subscription) => TypeKind::Subscription,
                None => TypeKind::Object,
            },
        }
    }

    /// This kind followed by every kind it falls back to.
    pub fn specifiers(self) -> &'static [TypeKind] {
        use TypeKind::*;
        match self {
            Type => &[Type],
            Scalar => &[Scalar, Type],
            Enum => &[Enum, Type],
            Object => &[Object, Type],
            InputObject => &[InputObject, Type],
            Union => &[Union, Type],
            Interface => &[Interface, Type],
            RootObject => &[RootObject, Object, Type],
            Query => &[Query, RootObject, Object, Type],
            Mutation => &[Mutation, RootObject, Object, Type],
            Subscription => &[Subscription, RootObject, Object, Type],
        }
    }
}

/// What a visitor decided to do with an element.
#[derive(Clone, Debug)]
pub enum Visit<T> {
    /// Leave the element unchanged.
    Keep,
    /// Replace the element. A replacement may carry a different name.
    Replace(T),
    /// Delete the element.
    Remove,
}

type TypeVisitor<'a> = Box<dyn FnMut(&ExtendedType) -> Visit<ExtendedType> + 'a>;
type FieldVisitor<'a> =
    Box<dyn FnMut(&Name, &Component<FieldDefinition>) -> Visit<Component<FieldDefinition>> + 'a>;
type ArgumentVisitor<'a> = Box<
    dyn FnMut(&Name, &Name, &Node<InputValueDefinition>) -> Visit<Node<InputValueDefinition>> + 'a,
>;
type InputFieldVisitor<'a> = Box<
    dyn FnMut(&Name, &Component<InputValueDefinition>) -> Visit<Component<InputValueDefinition>>
        + 'a,
>;
type EnumValueVisitor<'a> = Box<
    dyn FnMut(&Name, &Component<EnumValueDefinition>) -> Visit<Component<EnumValueDefinition>>
        + 'a,
>;

/// Rewrites every named type of a schema, except built-in and introspection types.
#[derive(Default)]
pub struct SchemaVisitor<'a> {
    types: HashMap<TypeKind, TypeVisitor<'a>>,
    fields: HashMap<TypeKind, FieldVisitor<'a>>,
    argument: Option<ArgumentVisitor<'a>>,
    input_field: Option<InputFieldVisitor<'a>>,
    enum_value: Option<EnumValueVisitor<'a>>,
}

impl<'a> SchemaVisitor<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Visit named types of `kind`.
    pub fn on_type(
        mut self,
        kind: TypeKind,
        visitor: impl FnMut(&ExtendedType) -> Visit<ExtendedType> + 'a,
    ) -> Self {
        self.types.insert(kind, Box::new(visitor));
        self
    }

    /// Visit the fields of object and interface types of `kind`.
    pub fn on_field(
        mut self,
        kind: TypeKind,
        visitor: impl FnMut(&Name, &Component<FieldDefinition>) -> Visit<Component<FieldDefinition>>
        + 'a,
    ) -> Self {
        self.fields.insert(kind, Box::new(visitor));
        self
    }

    /// Visit field arguments, receiving the parent type and field names.
    pub fn on_argument(
        mut self,
        visitor: impl FnMut(&Name, &Name, &Node<InputValueDefinition>) -> Visit<Node<InputValueDefinition>>
        + 'a,
    ) -> Self {
        self.argument = Some(Box::new(visitor));
        self
    }

    pub fn on_input_field(
        mut self,
        visitor: impl FnMut(&Name, &Component<InputValueDefinition>) -> Visit<Component<InputValueDefinition>>
        + 'a,
    ) -> Self {
        self.input_field = Some(Box::new(visitor));
        self
    }

    pub fn on_enum_value(
        mut self,
        visitor: impl FnMut(&Name, &Component<EnumValueDefinition>) -> Visit<Component<EnumValueDefinition>>
        + 'a,
    ) -> Self {
        self.enum_value = Some(Box::new(visitor));
        self
    }

    /// Runs the visitors over `schema` and heals the result.
    pub fn visit(
        mut self,
        mut schema: Schema,
        options: HealOptions,
    ) -> Result<Schema, StitchingError> {
        let kinds: IndexMap<Name, TypeKind> = schema
            .types
            .iter()
            .filter(|(name, ty)| !ty.is_built_in() && !is_meta_name(name))
            .map(|(name, ty)| (name.clone(), TypeKind::of(&schema, ty)))
            .collect();

        for (key, kind) in kinds {
            let Some(ty) = schema.types.get(&key) else {
                continue;
            };
            let ty = match self.visit_type(kind, ty) {
                Visit::Keep => ty.clone(),
                Visit::Replace(replacement) => replacement,
                Visit::Remove => {
                    schema.types.shift_remove(&key);
                    continue;
                }
            };
            let ty = self.visit_members(kind, ty);
            schema.types.insert(key, ty);
        }

        heal_schema(&mut schema, options)?;
        Ok(schema)
    }

    fn visit_type(&mut self, kind: TypeKind, ty: &ExtendedType) -> Visit<ExtendedType> {
        for specifier in kind.specifiers() {
            if let Some(visitor) = self.types.get_mut(specifier) {
                return visitor(ty);
            }
        }
        Visit::Keep
    }

    fn visit_members(&mut self, kind: TypeKind, mut ty: ExtendedType) -> ExtendedType {
        match &mut ty {
            ExtendedType::Object(object) => {
                let type_name = object.name.clone();
                if let Some(fields) = self.visit_fields(kind, &type_name, &object.fields) {
                    object.make_mut().fields = fields;
                }
            }
            ExtendedType::Interface(interface) => {
                let type_name = interface.name.clone();
                if let Some(fields) = self.visit_fields(kind, &type_name, &interface.fields) {
                    interface.make_mut().fields = fields;
                }
            }
            ExtendedType::InputObject(input_object) => {
                if let Some(visitor) = self.input_field.as_mut() {
                    let type_name = input_object.name.clone();
                    let fields = visit_map(&input_object.fields, |field| {
                        visitor(&type_name, field)
                    }, |field| field.name.clone());
                    input_object.make_mut().fields = fields;
                }
            }
            ExtendedType::Enum(enum_) => {
                if let Some(visitor) = self.enum_value.as_mut() {
                    let type_name = enum_.name.clone();
                    let values = visit_map(&enum_.values, |value| visitor(&type_name, value), |value| {
                        value.value.clone()
                    });
                    enum_.make_mut().values = values;
                }
            }
            ExtendedType::Scalar(_) | ExtendedType::Union(_) => {}
        }
        ty
    }

    fn visit_fields(
        &mut self,
        kind: TypeKind,
        type_name: &Name,
        fields: &IndexMap<Name, Component<FieldDefinition>>,
    ) -> Option<IndexMap<Name, Component<FieldDefinition>>> {
        let specifier = kind
            .specifiers()
            .iter()
            .find(|specifier| self.fields.contains_key(*specifier))
            .copied();
        if specifier.is_none() && self.argument.is_none() {
            return None;
        }
        let mut visited = IndexMap::with_capacity_and_hasher(fields.len(), Default::default());
        for field in fields.values() {
            let field = match specifier.and_then(|specifier| self.fields.get_mut(&specifier)) {
                Some(visitor) => match visitor(type_name, field) {
                    Visit::Keep => field.clone(),
                    Visit::Replace(replacement) => replacement,
                    Visit::Remove => continue,
                },
                None => field.clone(),
            };
            let field = self.visit_arguments(type_name, field);
            visited.insert(field.name.clone(), field);
        }
        Some(visited)
    }

    fn visit_arguments(
        &mut self,
        type_name: &Name,
        mut field: Component<FieldDefinition>,
    ) -> Component<FieldDefinition> {
        let Some(visitor) = self.argument.as_mut() else {
            return field;
        };
        let field_name = field.name.clone();
        let arguments = field
            .arguments
            .iter()
            .filter_map(|argument| match visitor(type_name, &field_name, argument) {
                Visit::Keep => Some(argument.clone()),
                Visit::Replace(replacement) => Some(replacement),
                Visit::Remove => None,
            })
            .collect();
        field.make_mut().arguments = arguments;
        field
    }
}

fn visit_map<V: Clone>(
    map: &IndexMap<Name, V>,
    mut visitor: impl FnMut(&V) -> Visit<V>,
    key: impl Fn(&V) -> Name,
) -> IndexMap<Name, V> {
    let mut visited = IndexMap::with_capacity_and_hasher(map.len(), Default::default());
    for value in map.values() {
        let value = match visitor(value) {
            Visit::Keep => value.clone(),
            Visit::Replace(replacement) => replacement,
            Visit::Remove => continue,
        };
        visited.insert(key(&value), value);
    }
    visited
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use apollo_compiler::name;

    use super::*;
    use crate::schema::rename_type;

    const SDL: &str = r#"
        type Query { user(id: ID!, verbose: Boolean): User }
        type Mutation { updateUser(id: ID!): User }
        type User { id: ID! name: String role: Role }
        enum Role { ADMIN USER }
    "#;

    fn parse() -> Schema {
        Schema::parse(SDL, "schema.graphql").unwrap()
    }

    #[test]
    fn test_most_specific_field_visitor_wins() {
        let seen = RefCell::new(Vec::new());
        SchemaVisitor::new()
            .on_field(TypeKind::Object, |type_name, _| {
                seen.borrow_mut().push(format!("object:{type_name}"));
                Visit::Keep
            })
            .on_field(TypeKind::Query, |type_name, _| {
                seen.borrow_mut().push(format!("query:{type_name}"));
                Visit::Keep
            })
            .visit(parse(), HealOptions::default())
            .unwrap();
        assert_eq!(
            seen.into_inner(),
            vec![
                "query:Query",
                "object:Mutation",
                "object:User",
                "object:User",
                "object:User"
            ]
        );
    }

    #[test]
    fn test_removing_a_type_removes_its_references() {
        let schema = SchemaVisitor::new()
            .on_type(TypeKind::Enum, |_| Visit::Remove)
            .visit(parse(), HealOptions::default())
            .unwrap();
        assert!(!schema.types.contains_key("Role"));
        assert!(!schema.get_object("User").unwrap().fields.contains_key("role"));
    }

    #[test]
    fn test_renaming_a_type_heals_references() {
        let schema = SchemaVisitor::new()
            .on_type(TypeKind::Object, |ty| {
                if ty.name().as_str() == "User" {
                    Visit::Replace(rename_type(ty, name!("Person")))
                } else {
                    Visit::Keep
                }
            })
            .visit(parse(), HealOptions::default())
            .unwrap();
        let query = schema.get_object("Query").unwrap();
        assert_eq!(query.fields["user"].ty.to_string(), "Person");
        assert!(schema.types.contains_key("Person"));
    }

    #[test]
    fn test_argument_and_enum_value_visitors() {
        let schema = SchemaVisitor::new()
            .on_argument(|_, _, argument| {
                if argument.name.as_str() == "verbose" {
                    Visit::Remove
                } else {
                    Visit::Keep
                }
            })
            .on_enum_value(|_, value| {
                if value.value.as_str() == "USER" {
                    Visit::Remove
                } else {
                    Visit::Keep
                }
            })
            .visit(parse(), HealOptions::default())
            .unwrap();
        let user_field = &schema.get_object("Query").unwrap().fields["user"];
        assert_eq!(user_field.arguments.len(), 1);
        let ExtendedType::Enum(role) = &schema.types["Role"] else {
            panic!("Role should be an enum");
        };
        assert_eq!(role.values.len(), 1);
    }
}
