//! Restores the consistency of a schema's type map after types were renamed or removed.
//!
//! Types may be renamed without being re-keyed, and may be removed while other types still
//! reference them. Healing re-keys every type under its own name, rewrites references that
//! used a previous name, drops references to types that no longer exist and, unless disabled,
//! prunes types that became empty as a consequence.

use apollo_compiler::Name;
use apollo_compiler::Node;
use apollo_compiler::Schema;
use apollo_compiler::ast::OperationType;
use apollo_compiler::ast::Type;
use apollo_compiler::collections::HashMap;
use apollo_compiler::collections::HashSet;
use apollo_compiler::collections::IndexMap;
use apollo_compiler::collections::IndexSet;
use apollo_compiler::schema::Component;
use apollo_compiler::schema::ComponentName;
use apollo_compiler::schema::ExtendedType;
use apollo_compiler::schema::FieldDefinition;
use apollo_compiler::schema::InputValueDefinition;
use tracing::debug;

use super::with_named_type;
use crate::error::StitchingError;

#[derive(Clone, Copy, Debug)]
pub struct HealOptions {
    /// Remove object types with no fields, interfaces with no fields or no implementers and
    /// unions with no members.
    pub prune: bool,
}

impl Default for HealOptions {
    fn default() -> Self {
        Self { prune: true }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Category {
    Leaf,
    Object,
    Interface,
    Union,
    InputObject,
}

impl Category {
    fn of(ty: &ExtendedType) -> Self {
        match ty {
            ExtendedType::Scalar(_) | ExtendedType::Enum(_) => Category::Leaf,
            ExtendedType::Object(_) => Category::Object,
            ExtendedType::Interface(_) => Category::Interface,
            ExtendedType::Union(_) => Category::Union,
            ExtendedType::InputObject(_) => Category::InputObject,
        }
    }
}

/// Heals `schema` in place.
///
/// Healing a healed schema is a no-op.
pub fn heal_schema(schema: &mut Schema, options: HealOptions) -> Result<(), StitchingError> {
    let renames = rekey_types(schema)?;
    heal_references(schema, &renames);
    if options.prune {
        while prune_empty_types(schema) {
            heal_references(schema, &HashMap::default());
        }
    }
    Ok(())
}

/// Re-keys the type map by each type's own name, returning the previous keys that changed.
fn rekey_types(schema: &mut Schema) -> Result<HashMap<Name, Name>, StitchingError> {
    let mut renames = HashMap::default();
    let mut types: IndexMap<Name, ExtendedType> =
        IndexMap::with_capacity_and_hasher(schema.types.len(), Default::default());
    for (key, ty) in std::mem::take(&mut schema.types) {
        let name = ty.name().clone();
        if name != key {
            debug!(from = %key, to = %name, "healing renamed type");
            renames.insert(key, name.clone());
        }
        if types.insert(name.clone(), ty).is_some() {
            return Err(StitchingError::DuplicateTypeName { name });
        }
    }
    schema.types = types;
    Ok(renames)
}

struct Resolver<'a> {
    renames: &'a HashMap<Name, Name>,
    categories: HashMap<Name, Category>,
}

impl Resolver<'_> {
    fn resolve(&self, name: &Name) -> Option<(Name, Category)> {
        let name = self.renames.get(name).unwrap_or(name);
        self.categories
            .get(name)
            .map(|category| (name.clone(), *category))
    }

    fn resolve_type(&self, ty: &Type, input: bool) -> Option<Type> {
        let (name, category) = self.resolve(ty.inner_named_type())?;
        let allowed = match category {
            Category::Leaf => true,
            Category::InputObject => input,
            Category::Object | Category::Interface | Category::Union => !input,
        };
        if !allowed {
            return None;
        }
        if &name == ty.inner_named_type() {
            Some(ty.clone())
        } else {
            Some(with_named_type(ty, name))
        }
    }

    fn resolve_component(&self, component: &ComponentName, expected: Category) -> Option<ComponentName> {
        match self.resolve(&component.name) {
            Some((name, category)) if category == expected => Some(ComponentName {
                origin: component.origin.clone(),
                name,
            }),
            _ => None,
        }
    }

    fn heal_components(&self, components: &mut IndexSet<ComponentName>, expected: Category) {
        *components = components
            .iter()
            .filter_map(|component| self.resolve_component(component, expected))
            .collect();
    }

    fn heal_fields(&self, fields: &mut IndexMap<Name, Component<FieldDefinition>>) {
        fields.retain(|_, field| {
            let Some(ty) = self.resolve_type(&field.ty, false) else {
                return false;
            };
            let field = field.make_mut();
            field.ty = ty;
            self.heal_arguments(&mut field.arguments);
            true
        });
    }

    fn heal_arguments(&self, arguments: &mut Vec<Node<InputValueDefinition>>) {
        arguments.retain_mut(|argument| match self.resolve_type(&argument.ty, true) {
            Some(ty) => {
                if ty != *argument.ty {
                    argument.make_mut().ty = Node::new(ty);
                }
                true
            }
            None => false,
        });
    }

    fn heal_input_fields(&self, fields: &mut IndexMap<Name, Component<InputValueDefinition>>) {
        fields.retain(|_, field| match self.resolve_type(&field.ty, true) {
            Some(ty) => {
                if ty != *field.ty {
                    field.make_mut().ty = Node::new(ty);
                }
                true
            }
            None => false,
        });
    }
}

fn heal_references(schema: &mut Schema, renames: &HashMap<Name, Name>) {
    let resolver = Resolver {
        renames,
        categories: schema
            .types
            .iter()
            .map(|(name, ty)| (name.clone(), Category::of(ty)))
            .collect(),
    };

    for ty in schema.types.values_mut() {
        if ty.is_built_in() {
            continue;
        }
        match ty {
            ExtendedType::Object(object) => {
                let object = object.make_mut();
                resolver.heal_components(&mut object.implements_interfaces, Category::Interface);
                resolver.heal_fields(&mut object.fields);
            }
            ExtendedType::Interface(interface) => {
                let interface = interface.make_mut();
                resolver
                    .heal_components(&mut interface.implements_interfaces, Category::Interface);
                resolver.heal_fields(&mut interface.fields);
            }
            ExtendedType::Union(union_) => {
                resolver.heal_components(&mut union_.make_mut().members, Category::Object);
            }
            ExtendedType::InputObject(input_object) => {
                resolver.heal_input_fields(&mut input_object.make_mut().fields);
            }
            ExtendedType::Scalar(_) | ExtendedType::Enum(_) => {}
        }
    }

    for directive in schema.directive_definitions.values_mut() {
        resolver.heal_arguments(&mut directive.make_mut().arguments);
    }

    let schema_definition = schema.schema_definition.make_mut();
    for root in [
        &mut schema_definition.query,
        &mut schema_definition.mutation,
        &mut schema_definition.subscription,
    ] {
        *root = root
            .as_ref()
            .and_then(|name| resolver.resolve_component(name, Category::Object));
    }
}

/// Removes empty types once. Returns whether anything was removed.
fn prune_empty_types(schema: &mut Schema) -> bool {
    let query_root = schema.root_operation(OperationType::Query).cloned();
    let implemented: HashSet<Name> = schema
        .types
        .values()
        .flat_map(|ty| -> Vec<&ComponentName> {
            match ty {
                ExtendedType::Object(object) => object.implements_interfaces.iter().collect(),
                ExtendedType::Interface(interface) => {
                    interface.implements_interfaces.iter().collect()
                }
                _ => Vec::new(),
            }
        })
        .map(|component| component.name.clone())
        .collect();

    let before = schema.types.len();
    schema.types.retain(|name, ty| {
        if ty.is_built_in() || query_root.as_ref() == Some(name) {
            return true;
        }
        let keep = match ty {
            ExtendedType::Object(object) => !object.fields.is_empty(),
            ExtendedType::Interface(interface) => {
                !interface.fields.is_empty() && implemented.contains(name)
            }
            ExtendedType::Union(union_) => !union_.members.is_empty(),
            ExtendedType::InputObject(input_object) => !input_object.fields.is_empty(),
            ExtendedType::Scalar(_) | ExtendedType::Enum(_) => true,
        };
        if !keep {
            debug!(type_name = %name, "pruning empty type");
        }
        keep
    });
    schema.types.len() != before
}

#[cfg(test)]
mod tests {
    use apollo_compiler::name;

    use super::*;
    use crate::schema::rename_type;

    fn parse(sdl: &str) -> Schema {
        Schema::parse(sdl, "schema.graphql").unwrap()
    }

    #[test]
    fn test_renamed_type_is_rekeyed_and_references_follow() {
        let mut schema = parse(
            r#"
            type Query { user: User users: [User!]! }
            type User { id: ID! }
            "#,
        );
        let renamed = rename_type(&schema.types["User"], name!("Account"));
        schema.types.insert(name!("User"), renamed);

        heal_schema(&mut schema, HealOptions::default()).unwrap();

        assert!(!schema.types.contains_key("User"));
        let query = schema.get_object("Query").unwrap();
        assert_eq!(query.fields["user"].ty.to_string(), "Account");
        assert_eq!(query.fields["users"].ty.to_string(), "[Account!]!");
    }

    #[test]
    fn test_duplicate_names_are_rejected() {
        let mut schema = parse(
            r#"
            type Query { a: A b: B }
            type A { id: ID }
            type B { id: ID }
            "#,
        );
        let renamed = rename_type(&schema.types["B"], name!("A"));
        schema.types.insert(name!("B"), renamed);

        let error = heal_schema(&mut schema, HealOptions::default()).unwrap_err();
        assert!(matches!(error, StitchingError::DuplicateTypeName { name } if name.as_str() == "A"));
    }

    #[test]
    fn test_removed_type_drops_referencing_fields() {
        let mut schema = parse(
            r#"
            type Query { user: User secret: Secret }
            type User { id: ID! secret: Secret }
            type Secret { value: String }
            "#,
        );
        schema.types.shift_remove("Secret");

        heal_schema(&mut schema, HealOptions::default()).unwrap();

        let user = schema.get_object("User").unwrap();
        assert!(!user.fields.contains_key("secret"));
        assert!(!schema.get_object("Query").unwrap().fields.contains_key("secret"));
    }

    #[test]
    fn test_empty_input_types_are_pruned_with_their_arguments() {
        let mut schema = parse(
            r#"
            type Query { search(filter: Filter, term: String): [String] }
            input Filter { nested: Empty }
            input Empty
            "#,
        );
        heal_schema(&mut schema, HealOptions::default()).unwrap();
        assert!(!schema.types.contains_key("Empty"));
        assert!(!schema.types.contains_key("Filter"));
        let search = &schema.get_object("Query").unwrap().fields["search"];
        let arguments: Vec<&str> = search
            .arguments
            .iter()
            .map(|argument| argument.name.as_str())
            .collect();
        assert_eq!(arguments, vec!["term"]);
    }

    #[test]
    fn test_pruning_can_be_disabled() {
        let mut schema = parse(
            r#"
            type Query { id: ID }
            union Nothing = Query
            "#,
        );
        if let Some(ExtendedType::Union(union_)) = schema.types.get_mut("Nothing") {
            union_.make_mut().members.clear();
        }
        heal_schema(&mut schema, HealOptions { prune: false }).unwrap();
        assert!(schema.types.contains_key("Nothing"));

        heal_schema(&mut schema, HealOptions::default()).unwrap();
        assert!(!schema.types.contains_key("Nothing"));
    }
}
