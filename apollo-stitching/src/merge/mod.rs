//! Merging of subschemas and type definitions into one stitched schema.
//!
//! Every source contributes candidate types. Root types and merged types become the union of
//! their candidates' fields, the first source defining a field winning. Any other name defined
//! more than once keeps a single candidate, chosen by the tie-break. The combined type map is
//! healed, extended with the `extend` definitions of type-definition sources and bound to
//! resolvers that delegate root fields to the subschemas owning them.

use std::fmt;
use std::sync::Arc;

use apollo_compiler::Name;
use apollo_compiler::Schema;
use apollo_compiler::ast;
use apollo_compiler::ast::OperationType;
use apollo_compiler::collections::HashSet;
use apollo_compiler::collections::IndexMap;
use apollo_compiler::schema::ExtendedType;
use apollo_compiler::validation::Valid;
use tracing::debug;

mod fields;
mod info;

pub(crate) use fields::merge_fields;
pub use info::MergeInfo;
pub use info::MergedTypeInfo;
pub use info::MergedTypeSubschema;

use crate::configuration::Configuration;
use crate::configuration::TypeConflicts;
use crate::delegate::DelegatingResolver;
use crate::error::StitchingError;
use crate::execution::ExecutableSchema;
use crate::execution::FieldConfig;
use crate::execution::FieldResolver;
use crate::execution::ResolverMap;
use crate::execution::SubscriptionResolver;
use crate::reconcile::DefaultMergedResolver;
use crate::schema::HealOptions;
use crate::schema::OPERATION_TYPES;
use crate::schema::build_schema;
use crate::schema::default_root_type_name;
use crate::schema::field_definition;
use crate::schema::heal_schema;
use crate::schema::is_meta_name;
use crate::schema::rename_type;
use crate::subschema::Subschema;

/// One input of [`merge_schemas`].
#[derive(Clone)]
pub enum SchemaSource {
    /// A subschema. Its root fields are delegated to it.
    Subschema(Arc<Subschema>),
    /// Type definitions served by the stitched schema's own resolvers. `extend` definitions
    /// apply to the merged schema.
    TypeDefs(String),
}

impl From<Arc<Subschema>> for SchemaSource {
    fn from(subschema: Arc<Subschema>) -> Self {
        Self::Subschema(subschema)
    }
}

impl From<&str> for SchemaSource {
    fn from(type_defs: &str) -> Self {
        Self::TypeDefs(type_defs.to_string())
    }
}

impl From<String> for SchemaSource {
    fn from(type_defs: String) -> Self {
        Self::TypeDefs(type_defs)
    }
}

impl fmt::Debug for SchemaSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Subschema(subschema) => f.debug_tuple("Subschema").field(&subschema.name()).finish(),
            Self::TypeDefs(_) => f.debug_tuple("TypeDefs").finish_non_exhaustive(),
        }
    }
}

/// A definition of a type by one source.
#[derive(Clone, Debug)]
pub struct TypeCandidate {
    pub ty: ExtendedType,
    /// `None` for type-definition sources.
    pub subschema: Option<Arc<Subschema>>,
}

/// Chooses between two definitions of a type that is neither a root type nor merged. `left`
/// was registered first.
pub type OnTypeConflict = Arc<dyn Fn(&TypeCandidate, &TypeCandidate) -> TypeConflicts + Send + Sync>;

/// Inputs of [`merge_schemas`].
pub struct MergeSchemasOptions {
    pub sources: Vec<SchemaSource>,
    /// Resolvers of the stitched schema. They replace the delegating resolvers of root fields.
    pub resolvers: ResolverMap,
    /// Types whose candidates are merged field by field, in addition to root and merged types.
    pub merge_types: Vec<Name>,
    /// Overrides `merge.type_conflicts` of the configuration.
    pub on_type_conflict: Option<OnTypeConflict>,
    pub configuration: Arc<Configuration>,
}

#[buildstructor::buildstructor]
impl MergeSchemasOptions {
    #[builder(visibility = "pub")]
    fn new(
        sources: Vec<SchemaSource>,
        resolvers: Option<ResolverMap>,
        merge_types: Vec<Name>,
        on_type_conflict: Option<OnTypeConflict>,
        configuration: Option<Arc<Configuration>>,
    ) -> Self {
        Self {
            sources,
            resolvers: resolvers.unwrap_or_default(),
            merge_types,
            on_type_conflict,
            configuration: configuration.unwrap_or_default(),
        }
    }
}

/// Root fields, by operation type, with the subschema each is delegated to.
type RootFields = IndexMap<OperationType, IndexMap<Name, Option<Arc<Subschema>>>>;

/// Candidates of every source, by type name.
#[derive(Default)]
struct Candidates {
    types: IndexMap<Name, Vec<TypeCandidate>>,
    roots: IndexMap<Name, OperationType>,
    root_fields: RootFields,
    directives: Vec<Schema>,
    extensions: Vec<ast::Definition>,
}

/// Builds the stitched schema.
pub fn merge_schemas(options: MergeSchemasOptions) -> Result<ExecutableSchema, StitchingError> {
    let MergeSchemasOptions {
        sources,
        resolvers: user_resolvers,
        merge_types,
        on_type_conflict,
        configuration,
    } = options;

    let subschemas: Vec<Arc<Subschema>> = sources
        .iter()
        .filter_map(|source| match source {
            SchemaSource::Subschema(subschema) => Some(subschema.clone()),
            SchemaSource::TypeDefs(_) => None,
        })
        .collect();
    let mut names = HashSet::default();
    for subschema in &subschemas {
        if !names.insert(subschema.name()) {
            return Err(StitchingError::invalid_schema(format!(
                "subschema name \"{}\" is used more than once",
                subschema.name()
            )));
        }
    }

    let candidates = collect_candidates(&sources)?;
    let candidate_types: HashSet<Name> = candidates.types.keys().cloned().collect();
    let merge_info = MergeInfo::new(&subschemas, &candidate_types, configuration.clone())?;

    let query = default_root_type_name(OperationType::Query);
    if !candidates.roots.contains_key(&query) {
        return Err(StitchingError::MissingQueryType);
    }

    let mut schema = Schema::new();
    for source_schema in &candidates.directives {
        for (name, definition) in &source_schema.directive_definitions {
            schema
                .directive_definitions
                .entry(name.clone())
                .or_insert_with(|| definition.clone());
        }
    }
    for (type_name, type_candidates) in candidates.types {
        let ty = if candidates.roots.contains_key(&type_name)
            || merge_info.merged_type(&type_name).is_some()
            || merge_types.contains(&type_name)
        {
            union_candidates(&type_name, type_candidates)?
        } else {
            choose_candidate(
                &type_name,
                type_candidates,
                on_type_conflict.as_ref(),
                configuration.merge.type_conflicts,
            )
        };
        if let Some(ty) = ty {
            schema.types.insert(type_name, ty);
        }
    }
    for (root, operation_type) in &candidates.roots {
        let definition = schema.schema_definition.make_mut();
        let root = Some(root.clone().into());
        match operation_type {
            OperationType::Query => definition.query = root,
            OperationType::Mutation => definition.mutation = root,
            OperationType::Subscription => definition.subscription = root,
        }
    }

    heal_schema(
        &mut schema,
        HealOptions {
            prune: configuration.merge.prune_schema,
        },
    )?;
    if !candidates.extensions.is_empty() {
        let mut extensions = ast::Document::new();
        extensions.definitions = candidates.extensions;
        schema = build_schema(
            &format!("{}\n{extensions}", schema.serialize()),
            "stitched_schema.graphql",
        )?;
    }
    let schema = schema
        .validate()
        .map_err(|with_errors| StitchingError::invalid_schema(with_errors.errors.to_string()))?;

    let resolvers = stitched_resolvers(&schema, &candidates.root_fields, &subschemas, user_resolvers);
    let merge_info = merge_info.with_field_selection_sets(&resolvers)?;
    debug!(
        subschemas = subschemas.len(),
        merged_types = merge_info.merged_types().len(),
        "stitched schema built"
    );
    Ok(ExecutableSchema::new(schema, resolvers)?.with_merge_info(Arc::new(merge_info)))
}

fn collect_candidates(sources: &[SchemaSource]) -> Result<Candidates, StitchingError> {
    let mut candidates = Candidates::default();
    for (index, source) in sources.iter().enumerate() {
        let (schema, subschema) = match source {
            SchemaSource::Subschema(subschema) => {
                (subschema.schema().as_ref().clone().into_inner(), Some(subschema.clone()))
            }
            SchemaSource::TypeDefs(type_defs) => {
                let document = ast::Document::parse(type_defs, format!("type_defs_{index}.graphql"))
                    .map_err(|with_errors| {
                        StitchingError::invalid_schema(with_errors.errors.to_string())
                    })?;
                let (extensions, definitions): (Vec<_>, Vec<_>) = document
                    .definitions
                    .into_iter()
                    .partition(is_extension);
                candidates.extensions.extend(extensions);
                if definitions.is_empty() {
                    continue;
                }
                let mut document = ast::Document::new();
                document.definitions = definitions;
                (
                    build_schema(&document.to_string(), &format!("type_defs_{index}.graphql"))?,
                    None,
                )
            }
        };

        let mut root_names = IndexMap::default();
        for operation_type in OPERATION_TYPES {
            if let Some(root) = schema.root_operation(operation_type) {
                root_names.insert(root.clone(), operation_type);
            }
        }
        for (type_name, ty) in &schema.types {
            if ty.is_built_in() || is_meta_name(type_name) {
                continue;
            }
            let (name, ty) = match root_names.get(type_name) {
                Some(operation_type) => {
                    let name = default_root_type_name(*operation_type);
                    let fields = candidates.root_fields.entry(*operation_type).or_default();
                    if let ExtendedType::Object(root) = ty {
                        for field_name in root.fields.keys() {
                            fields
                                .entry(field_name.clone())
                                .or_insert_with(|| subschema.clone());
                        }
                    }
                    candidates.roots.insert(name.clone(), *operation_type);
                    (name.clone(), rename_type(ty, name))
                }
                None => (type_name.clone(), ty.clone()),
            };
            candidates.types.entry(name).or_default().push(TypeCandidate {
                ty,
                subschema: subschema.clone(),
            });
        }
        candidates.directives.push(schema);
    }
    Ok(candidates)
}

fn is_extension(definition: &ast::Definition) -> bool {
    matches!(
        definition,
        ast::Definition::SchemaExtension(_)
            | ast::Definition::ScalarTypeExtension(_)
            | ast::Definition::ObjectTypeExtension(_)
            | ast::Definition::InterfaceTypeExtension(_)
            | ast::Definition::UnionTypeExtension(_)
            | ast::Definition::EnumTypeExtension(_)
            | ast::Definition::InputObjectTypeExtension(_)
    )
}

/// The union of the candidates' fields, members or values. The first candidate defining one
/// wins.
fn union_candidates(
    type_name: &Name,
    candidates: Vec<TypeCandidate>,
) -> Result<Option<ExtendedType>, StitchingError> {
    let mut candidates = candidates.into_iter();
    let Some(first) = candidates.next() else {
        return Ok(None);
    };
    let mut merged = first.ty;
    for candidate in candidates {
        match (&mut merged, &candidate.ty) {
            (ExtendedType::Object(target), ExtendedType::Object(source)) => {
                let target = target.make_mut();
                for (name, field) in &source.fields {
                    target
                        .fields
                        .entry(name.clone())
                        .or_insert_with(|| field.clone());
                }
                target
                    .implements_interfaces
                    .extend(source.implements_interfaces.iter().cloned());
            }
            (ExtendedType::Interface(target), ExtendedType::Interface(source)) => {
                let target = target.make_mut();
                for (name, field) in &source.fields {
                    target
                        .fields
                        .entry(name.clone())
                        .or_insert_with(|| field.clone());
                }
                target
                    .implements_interfaces
                    .extend(source.implements_interfaces.iter().cloned());
            }
            (ExtendedType::Union(target), ExtendedType::Union(source)) => {
                target
                    .make_mut()
                    .members
                    .extend(source.members.iter().cloned());
            }
            (ExtendedType::Enum(target), ExtendedType::Enum(source)) => {
                let target = target.make_mut();
                for (name, value) in &source.values {
                    target
                        .values
                        .entry(name.clone())
                        .or_insert_with(|| value.clone());
                }
            }
            (ExtendedType::InputObject(target), ExtendedType::InputObject(source)) => {
                let target = target.make_mut();
                for (name, field) in &source.fields {
                    target
                        .fields
                        .entry(name.clone())
                        .or_insert_with(|| field.clone());
                }
            }
            (ExtendedType::Scalar(_), ExtendedType::Scalar(_)) => {}
            (_, _) => {
                return Err(StitchingError::invalid_schema(format!(
                    "type \"{type_name}\" cannot be merged: its definitions are of different kinds"
                )));
            }
        }
    }
    Ok(Some(merged))
}

fn choose_candidate(
    type_name: &Name,
    candidates: Vec<TypeCandidate>,
    on_type_conflict: Option<&OnTypeConflict>,
    default: TypeConflicts,
) -> Option<ExtendedType> {
    if candidates.len() > 1 {
        debug!(
            type_name = %type_name,
            candidates = candidates.len(),
            "resolving type conflict"
        );
    }
    candidates
        .into_iter()
        .reduce(|left, right| {
            let decision = on_type_conflict.map_or(default, |decide| decide(&left, &right));
            match decision {
                TypeConflicts::FirstWins => left,
                TypeConflicts::LastWins => right,
            }
        })
        .map(|candidate| candidate.ty)
}

/// Resolvers of the stitched schema, later entries replacing earlier ones: delegation of root
/// fields, then the resolvers of subschema transforms, then those given by the caller.
fn stitched_resolvers(
    schema: &Valid<Schema>,
    root_fields: &RootFields,
    subschemas: &[Arc<Subschema>],
    user_resolvers: ResolverMap,
) -> ResolverMap {
    let mut resolvers = ResolverMap::new().with_default_resolver(Arc::new(DefaultMergedResolver));
    for (operation_type, fields) in root_fields {
        let Some(root) = schema.root_operation(*operation_type) else {
            continue;
        };
        for (field_name, owner) in fields {
            let Some(subschema) = owner else {
                continue;
            };
            if field_definition(schema, root, field_name).is_none() {
                continue;
            }
            let delegating = Arc::new(DelegatingResolver::new(subschema.clone(), *operation_type));
            let config = if *operation_type == OperationType::Subscription {
                let subscribe: Arc<dyn SubscriptionResolver> = delegating;
                FieldConfig::builder().subscribe(subscribe).build()
            } else {
                let resolve: Arc<dyn FieldResolver> = delegating;
                FieldConfig::builder().resolve(resolve).build()
            };
            resolvers = resolvers.with_field(root.clone(), field_name.clone(), config);
        }
    }
    for subschema in subschemas {
        for transform in subschema.transforms() {
            if let Some(transform_resolvers) = transform.resolvers() {
                resolvers.extend(transform_resolvers);
            }
        }
    }
    resolvers.extend(user_resolvers);
    resolvers
}

#[cfg(test)]
mod tests {
    use apollo_compiler::name;

    use super::*;
    use crate::subschema::MergedTypeConfig;
    use crate::subschema::SubschemaConfig;

    fn subschema(name: &str, type_defs: &str) -> Arc<Subschema> {
        SubschemaConfig::local(
            name,
            ExecutableSchema::parse(type_defs, ResolverMap::new()).unwrap(),
        )
        .build()
        .unwrap()
    }

    #[test]
    fn test_root_fields_are_united_and_delegated_to_their_first_owner() {
        let accounts = subschema("accounts", "type Query { me: String shared: String }");
        let reviews = subschema(
            "reviews",
            "schema { query: RootQuery } type RootQuery { reviews: [String] shared: Int }",
        );
        let stitched = merge_schemas(
            MergeSchemasOptions::builder()
                .source(accounts)
                .source(reviews)
                .build(),
        )
        .unwrap();
        let query = stitched.schema().get_object("Query").unwrap();
        let fields: Vec<_> = query.fields.keys().map(Name::as_str).collect();
        assert_eq!(fields, ["me", "shared", "reviews"]);
        assert_eq!(query.fields["shared"].ty.inner_named_type().as_str(), "String");
        assert!(stitched.resolvers().field_config("Query", "reviews").is_some());
        assert!(stitched.schema().types.get("RootQuery").is_none());
    }

    #[test]
    fn test_conflicting_types_use_the_tie_break() {
        let first = subschema("first", "type Query { a: Thing } type Thing { first: String }");
        let second = subschema("second", "type Query { b: Thing } type Thing { second: String }");

        let last_wins = merge_schemas(
            MergeSchemasOptions::builder()
                .source(first.clone())
                .source(second.clone())
                .build(),
        )
        .unwrap();
        assert!(last_wins.schema().get_object("Thing").unwrap().fields.contains_key("second"));

        let first_wins = merge_schemas(
            MergeSchemasOptions::builder()
                .source(first)
                .source(second)
                .on_type_conflict(Arc::new(|_: &TypeCandidate, _: &TypeCandidate| {
                    TypeConflicts::FirstWins
                }) as OnTypeConflict)
                .build(),
        )
        .unwrap();
        assert!(first_wins.schema().get_object("Thing").unwrap().fields.contains_key("first"));
    }

    #[test]
    fn test_explicit_merge_types_unite_fields() {
        let first = subschema("first", "type Query { a: Thing } type Thing { first: String }");
        let second = subschema("second", "type Query { b: Thing } type Thing { second: String }");
        let stitched = merge_schemas(
            MergeSchemasOptions::builder()
                .source(first)
                .source(second)
                .merge_type(name!("Thing"))
                .build(),
        )
        .unwrap();
        let thing = stitched.schema().get_object("Thing").unwrap();
        assert!(thing.fields.contains_key("first"));
        assert!(thing.fields.contains_key("second"));
    }

    #[test]
    fn test_type_defs_extend_the_merged_schema() {
        let accounts = subschema("accounts", "type Query { user: User } type User { id: ID! }");
        let stitched = merge_schemas(
            MergeSchemasOptions::builder()
                .source(accounts)
                .source("extend type User { nickname: String }")
                .build(),
        )
        .unwrap();
        assert!(stitched.schema().get_object("User").unwrap().fields.contains_key("nickname"));
    }

    #[test]
    fn test_type_defs_mix_definitions_and_extensions() {
        let accounts = subschema("accounts", "type Query { user: User } type User { id: ID! }");
        let stitched = merge_schemas(
            MergeSchemasOptions::builder()
                .source(accounts)
                .source("type Greeting { text: String } extend type Query { greeting: Greeting }")
                .build(),
        )
        .unwrap();
        let query = stitched.schema().get_object("Query").unwrap();
        assert!(query.fields.contains_key("user"));
        assert!(query.fields.contains_key("greeting"));
        assert!(stitched.schema().get_object("Greeting").is_some());
    }

    #[test]
    fn test_duplicate_subschema_names_are_rejected() {
        let error = merge_schemas(
            MergeSchemasOptions::builder()
                .source(subschema("accounts", "type Query { a: String }"))
                .source(subschema("accounts", "type Query { b: String }"))
                .build(),
        )
        .err()
        .unwrap();
        assert!(matches!(error, StitchingError::InvalidSchema { .. }));
    }

    #[test]
    fn test_missing_query_type_is_rejected() {
        let error = merge_schemas(
            MergeSchemasOptions::builder()
                .source("type Mutation { a: String }")
                .build(),
        )
        .err()
        .unwrap();
        assert!(matches!(error, StitchingError::MissingQueryType));
    }

    #[test]
    fn test_merge_config_for_unknown_type_is_rejected() {
        let accounts = SubschemaConfig::local(
            "accounts",
            ExecutableSchema::parse("type Query { a: String }", ResolverMap::new()).unwrap(),
        )
        .with_merged_type(
            name!("Ghost"),
            MergedTypeConfig::builder().selection_set("{ id }").build(),
        )
        .build()
        .unwrap();
        let error = merge_schemas(MergeSchemasOptions::builder().source(accounts).build())
            .err()
            .unwrap();
        assert!(matches!(error, StitchingError::UnknownMergedType { .. }));
    }
}
