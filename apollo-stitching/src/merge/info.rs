use std::fmt;
use std::sync::Arc;

use apollo_compiler::Name;
use apollo_compiler::ast;
use apollo_compiler::collections::HashMap;
use apollo_compiler::collections::HashSet;
use apollo_compiler::collections::IndexMap;
use apollo_compiler::collections::IndexSet;
use apollo_compiler::schema::ExtendedType;
use tracing::debug;

use super::fields::DelegatingMergedTypeResolver;
use crate::configuration::Configuration;
use crate::context::Context;
use crate::delegate::DelegateOptions;
use crate::error::StitchingError;
use crate::execution::ResolveInfo;
use crate::execution::Resolved;
use crate::execution::ResolverMap;
use crate::schema::field_definition;
use crate::schema::parse_selection_set;
use crate::subschema::MergedTypeConfig;
use crate::subschema::MergedTypeResolver;
use crate::subschema::Subschema;

/// How one subschema takes part in a merged type.
#[derive(Clone)]
pub struct MergedTypeSubschema {
    pub subschema: Arc<Subschema>,
    /// The fields the subschema defines for the type.
    pub fields: IndexSet<Name>,
    /// The fields the subschema needs to identify an object. Empty when it declared none.
    pub selection_set: Vec<ast::Selection>,
    /// How objects are completed through this subschema. `None` when the subschema only
    /// provides objects, without a way to fetch them by key.
    pub resolver: Option<Arc<dyn MergedTypeResolver>>,
}

/// What the stitched schema knows about a type several subschemas define.
#[derive(Clone)]
pub struct MergedTypeInfo {
    type_name: Name,
    subschemas: Vec<MergedTypeSubschema>,
    unique_fields: IndexMap<Name, String>,
    non_unique_fields: IndexMap<Name, Vec<String>>,
}

impl MergedTypeInfo {
    pub fn type_name(&self) -> &Name {
        &self.type_name
    }

    /// Every subschema defining the type, in registration order.
    pub fn subschemas(&self) -> &[MergedTypeSubschema] {
        &self.subschemas
    }

    pub fn subschema(&self, name: &str) -> Option<&MergedTypeSubschema> {
        self.subschemas
            .iter()
            .find(|participant| participant.subschema.name() == name)
    }

    /// Fields only one subschema defines, with the name of that subschema.
    pub fn unique_fields(&self) -> &IndexMap<Name, String> {
        &self.unique_fields
    }

    /// Fields several subschemas define, with their names in registration order.
    pub fn non_unique_fields(&self) -> &IndexMap<Name, Vec<String>> {
        &self.non_unique_fields
    }
}

impl fmt::Debug for MergedTypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MergedTypeInfo")
            .field("type_name", &self.type_name)
            .field(
                "subschemas",
                &self
                    .subschemas
                    .iter()
                    .map(|participant| participant.subschema.name())
                    .collect::<Vec<_>>(),
            )
            .field("unique_fields", &self.unique_fields)
            .field("non_unique_fields", &self.non_unique_fields)
            .finish()
    }
}

/// Stitching metadata of a merged schema, available to every resolver through
/// [`ResolveInfo::merge_info`]. Built once; read-only afterwards.
pub struct MergeInfo {
    subschemas: Vec<Arc<Subschema>>,
    merged_types: IndexMap<Name, MergedTypeInfo>,
    type_selection_sets: HashMap<Name, Vec<ast::Selection>>,
    field_selection_sets: HashMap<Name, HashMap<Name, Vec<ast::Selection>>>,
    configuration: Arc<Configuration>,
}

impl MergeInfo {
    /// Cross-references the merge configuration of `subschemas` with the types every source
    /// defines.
    pub(crate) fn new(
        subschemas: &[Arc<Subschema>],
        candidate_types: &HashSet<Name>,
        configuration: Arc<Configuration>,
    ) -> Result<Self, StitchingError> {
        for subschema in subschemas {
            for (type_name, config) in subschema.merged_types() {
                validate_merged_type_config(subschema, type_name, config, candidate_types)?;
            }
        }

        let mut merged_types = IndexMap::default();
        let mut type_selection_sets: HashMap<Name, Vec<ast::Selection>> = HashMap::default();
        let configured: IndexSet<&Name> = subschemas
            .iter()
            .flat_map(|subschema| subschema.merged_types().keys())
            .collect();
        for type_name in configured {
            let participants = subschemas
                .iter()
                .filter(|subschema| {
                    matches!(
                        subschema.schema().types.get(type_name),
                        Some(ExtendedType::Object(_))
                    )
                })
                .map(|subschema| participant(subschema, type_name))
                .collect::<Result<Vec<_>, _>>()?;
            if participants.len() < 2 {
                continue;
            }

            let keys = type_selection_sets.entry(type_name.clone()).or_default();
            for participant in &participants {
                for selection in &participant.selection_set {
                    if !keys.contains(selection) {
                        keys.push(selection.clone());
                    }
                }
            }

            let mut owners: IndexMap<Name, Vec<String>> = IndexMap::default();
            for participant in &participants {
                for field_name in &participant.fields {
                    owners
                        .entry(field_name.clone())
                        .or_default()
                        .push(participant.subschema.name().to_string());
                }
            }
            let (unique, non_unique): (Vec<_>, Vec<_>) =
                owners.into_iter().partition(|(_, names)| names.len() == 1);
            let merged_type = MergedTypeInfo {
                type_name: type_name.clone(),
                subschemas: participants,
                unique_fields: unique
                    .into_iter()
                    .filter_map(|(field_name, mut names)| names.pop().map(|name| (field_name, name)))
                    .collect(),
                non_unique_fields: non_unique.into_iter().collect(),
            };
            debug!(merged_type = ?merged_type, "merged type");
            merged_types.insert(type_name.clone(), merged_type);
        }

        Ok(Self {
            subschemas: subschemas.to_vec(),
            merged_types,
            type_selection_sets,
            field_selection_sets: HashMap::default(),
            configuration,
        })
    }

    /// Records the selection sets the resolvers of the stitched schema declared.
    pub(crate) fn with_field_selection_sets(
        mut self,
        resolvers: &ResolverMap,
    ) -> Result<Self, StitchingError> {
        for (type_name, field_name, config) in resolvers.fields() {
            let Some(selection_set) = &config.selection_set else {
                continue;
            };
            let selections = parse_selection_set(type_name, selection_set)?;
            self.field_selection_sets
                .entry(type_name.clone())
                .or_default()
                .insert(field_name.clone(), selections);
        }
        Ok(self)
    }

    /// Types completed across subschemas, keyed by name.
    pub fn merged_types(&self) -> &IndexMap<Name, MergedTypeInfo> {
        &self.merged_types
    }

    pub fn merged_type(&self, type_name: &str) -> Option<&MergedTypeInfo> {
        self.merged_types.get(type_name)
    }

    /// The subschemas of the stitched schema, in registration order.
    pub fn subschemas(&self) -> &[Arc<Subschema>] {
        &self.subschemas
    }

    pub fn subschema(&self, name: &str) -> Option<&Arc<Subschema>> {
        self.subschemas
            .iter()
            .find(|subschema| subschema.name() == name)
    }

    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    /// Delegates to a subschema on behalf of a resolver of the stitched schema.
    pub async fn delegate_to_schema(
        &self,
        options: DelegateOptions,
        context: &Context,
        info: &ResolveInfo,
    ) -> Resolved {
        crate::delegate::delegate_to_schema(options, context, info).await
    }

    /// Every key field of `type_name`, across the subschemas merging it.
    pub(crate) fn type_selection_set(&self, type_name: &str) -> Option<&[ast::Selection]> {
        self.type_selection_sets.get(type_name).map(Vec::as_slice)
    }

    /// The fields the resolver of `type_name.field_name` reads from its parent.
    pub(crate) fn field_selection_set(
        &self,
        type_name: &str,
        field_name: &str,
    ) -> Option<&[ast::Selection]> {
        self.field_selection_sets
            .get(type_name)?
            .get(field_name)
            .map(Vec::as_slice)
    }
}

impl fmt::Debug for MergeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MergeInfo")
            .field("merged_types", &self.merged_types)
            .finish()
    }
}

fn participant(
    subschema: &Arc<Subschema>,
    type_name: &Name,
) -> Result<MergedTypeSubschema, StitchingError> {
    let fields = subschema
        .schema()
        .get_object(type_name)
        .map(|object| object.fields.keys().cloned().collect())
        .unwrap_or_default();
    let config = subschema.merged_type(type_name);
    let selection_set = match config.and_then(|config| config.selection_set.as_deref()) {
        Some(selection_set) => parse_selection_set(type_name, selection_set)?,
        None => Vec::new(),
    };
    let resolver = config.and_then(|config| -> Option<Arc<dyn MergedTypeResolver>> {
        match (&config.resolve, &config.field_name) {
            (Some(resolve), _) => Some(resolve.clone()),
            (None, Some(field_name)) => Some(Arc::new(DelegatingMergedTypeResolver::new(
                type_name.clone(),
                field_name.clone(),
                config.args.clone(),
                selection_set.clone(),
            ))),
            (None, None) => None,
        }
    });
    Ok(MergedTypeSubschema {
        subschema: subschema.clone(),
        fields,
        selection_set,
        resolver,
    })
}

fn validate_merged_type_config(
    subschema: &Subschema,
    type_name: &Name,
    config: &MergedTypeConfig,
    candidate_types: &HashSet<Name>,
) -> Result<(), StitchingError> {
    let invalid = |message: String| StitchingError::InvalidMergedTypeConfig {
        subschema: subschema.name().to_string(),
        type_name: type_name.to_string(),
        message,
    };
    if !candidate_types.contains(type_name) {
        return Err(StitchingError::UnknownMergedType {
            subschema: subschema.name().to_string(),
            type_name: type_name.to_string(),
        });
    }
    let schema = subschema.schema();
    let Some(object) = schema.get_object(type_name) else {
        return Err(invalid(
            "the subschema does not define this type as an object type".to_string(),
        ));
    };
    if let Some(selection_set) = &config.selection_set {
        for selection in parse_selection_set(type_name, selection_set)? {
            if let ast::Selection::Field(field) = selection {
                if field.name.as_str() != "__typename" && !object.fields.contains_key(&field.name) {
                    return Err(invalid(format!(
                        "key field \"{}\" is not defined by the subschema",
                        field.name
                    )));
                }
            }
        }
    }
    if let Some(field_name) = &config.field_name {
        let root = schema
            .root_operation(ast::OperationType::Query)
            .ok_or_else(|| invalid("the subschema has no query type".to_string()))?;
        if field_definition(schema, root, field_name).is_none() {
            return Err(invalid(format!(
                "query field \"{field_name}\" is not defined by the subschema"
            )));
        }
    }
    Ok(())
}
