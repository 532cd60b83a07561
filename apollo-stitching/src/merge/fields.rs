//! Completion of merged-type objects with the fields other subschemas contribute.

use std::sync::Arc;

use apollo_compiler::Name;
use apollo_compiler::Node;
use apollo_compiler::ast;
use apollo_compiler::collections::HashSet;
use async_trait::async_trait;
use futures::future::join_all;
use tracing::debug;
use tracing::warn;

use super::info::MergedTypeInfo;
use super::info::MergedTypeSubschema;
use crate::context::Context;
use crate::delegate::DelegateOptions;
use crate::delegate::delegate_to_schema;
use crate::error::DelegationError;
use crate::execution::ExternalObject;
use crate::execution::ResolveInfo;
use crate::execution::Resolved;
use crate::graphql;
use crate::json_ext::Object;
use crate::json_ext::Path;
use crate::json_ext::PathElement;
use crate::json_ext::Value;
use crate::json_ext::merge_first_wins;
use crate::schema::does_type_apply;
use crate::subschema::MergeArgs;
use crate::subschema::MergedTypeResolver;
use crate::subschema::Subschema;

/// Fetches the fields of `object` its subschema did not provide from the other subschemas
/// defining its type.
///
/// Each round assigns every outstanding field to the first subschema, in registration order,
/// that defines it, can be queried for the type and finds its key fields on the object. The
/// subschemas of a round are queried concurrently and their results merged in registration
/// order, fields already present winning. Rounds repeat while they make progress, so that keys
/// only one subschema provides can unlock the others. A subschema is queried at most once.
pub(crate) async fn merge_fields(
    mut object: ExternalObject,
    merged_type: &MergedTypeInfo,
    context: &Context,
    info: &ResolveInfo,
) -> ExternalObject {
    let requested = requested_fields(merged_type.type_name(), info);
    let mut attempted: HashSet<String> = object
        .subschema
        .iter()
        .map(|subschema| subschema.name().to_string())
        .collect();
    let mut failed: HashSet<Name> = HashSet::default();

    loop {
        let outstanding: Vec<&Node<ast::Field>> = requested
            .iter()
            .filter(|field| {
                let response_key = field.response_name();
                !object.data.contains_key(response_key.as_str()) && !failed.contains(response_key)
            })
            .collect();
        if outstanding.is_empty() {
            break;
        }

        let mut assigned: Vec<Vec<Node<ast::Field>>> = vec![Vec::new(); merged_type.subschemas().len()];
        for field in outstanding {
            let owner = merged_type
                .subschemas()
                .iter()
                .position(|participant| can_provide(participant, field, &object, &attempted));
            if let Some(index) = owner {
                assigned[index].push(field.clone());
            }
        }
        let plans: Vec<(&MergedTypeSubschema, &Arc<dyn MergedTypeResolver>, Vec<Node<ast::Field>>)> =
            merged_type
                .subschemas()
                .iter()
                .zip(assigned)
                .filter(|(_, fields)| !fields.is_empty())
                .filter_map(|(participant, fields)| {
                    participant
                        .resolver
                        .as_ref()
                        .map(|resolver| (participant, resolver, fields))
                })
                .collect();
        if plans.is_empty() {
            break;
        }
        debug!(
            type_name = %merged_type.type_name(),
            subschemas = ?plans.iter().map(|(participant, _, _)| participant.subschema.name()).collect::<Vec<_>>(),
            "merging fields"
        );

        for (participant, _, _) in &plans {
            attempted.insert(participant.subschema.name().to_string());
        }
        let results = join_all(plans.iter().map(|(participant, resolver, fields)| {
            let mut selection_set = participant.selection_set.clone();
            for field in fields {
                let selection = ast::Selection::Field(field.clone());
                if !selection_set.contains(&selection) {
                    selection_set.push(selection);
                }
            }
            resolver.resolve(&object, context, info, &participant.subschema, selection_set)
        }))
        .await;

        for ((participant, _, fields), result) in plans.into_iter().zip(results) {
            match result {
                Ok(patch) => merge_patch(&mut object, patch, &participant.subschema),
                Err(error) => {
                    warn!(
                        type_name = %merged_type.type_name(),
                        subschema = participant.subschema.name(),
                        %error,
                        "merging fields failed"
                    );
                    for field in fields {
                        let response_key = field.response_name().clone();
                        object
                            .errors
                            .push(error.at_path(Path::from(response_key.as_str())));
                        failed.insert(response_key);
                    }
                }
            }
        }
    }
    object
}

/// Merges the fields of `patch` that `object` lacks, with their errors.
fn merge_patch(object: &mut ExternalObject, patch: ExternalObject, subschema: &Arc<Subschema>) {
    let provider = patch.subschema.clone().unwrap_or_else(|| subschema.clone());
    let mut field_subschemas = patch.field_subschemas;
    let taken = merge_first_wins(&mut object.data, patch.data);
    for key in &taken {
        let source = field_subschemas
            .remove(key.as_str())
            .unwrap_or_else(|| provider.clone());
        object.field_subschemas.insert(key.as_str().to_string(), source);
    }
    object.errors.extend(patch.errors.into_iter().filter(|error| {
        error
            .path
            .as_ref()
            .and_then(Path::first)
            .and_then(PathElement::as_key)
            .is_some_and(|key| taken.iter().any(|taken| taken.as_str() == key))
    }));
}

fn can_provide(
    participant: &MergedTypeSubschema,
    field: &ast::Field,
    object: &ExternalObject,
    attempted: &HashSet<String>,
) -> bool {
    participant.resolver.is_some()
        && !attempted.contains(participant.subschema.name())
        && participant.fields.contains(&field.name)
        && key_satisfied(&participant.selection_set, &object.data)
}

/// Whether `data` holds every field of `selections`, non-null.
fn key_satisfied(selections: &[ast::Selection], data: &Object) -> bool {
    selections.iter().all(|selection| match selection {
        ast::Selection::Field(field) => match data.get(field.response_name().as_str()) {
            None | Some(Value::Null) => false,
            Some(Value::Object(child)) => key_satisfied(&field.selection_set, child),
            Some(Value::Array(items)) => items.iter().all(|item| match item {
                Value::Object(child) => key_satisfied(&field.selection_set, child),
                Value::Null => false,
                _ => true,
            }),
            Some(_) => true,
        },
        ast::Selection::InlineFragment(_) | ast::Selection::FragmentSpread(_) => true,
    })
}

/// The fields the client selected on an object of `type_name`, with the fields their custom
/// resolvers read, by response key.
fn requested_fields(type_name: &Name, info: &ResolveInfo) -> Vec<Node<ast::Field>> {
    let mut fields = Vec::new();
    collect_fields(type_name, &info.selection_set(), info, &mut fields);
    if let Some(merge_info) = info.merge_info() {
        let dependencies: Vec<ast::Selection> = fields
            .iter()
            .filter_map(|field| merge_info.field_selection_set(type_name, &field.name))
            .flatten()
            .cloned()
            .collect();
        collect_fields(type_name, &dependencies, info, &mut fields);
    }
    fields
}

fn collect_fields(
    type_name: &Name,
    selections: &[ast::Selection],
    info: &ResolveInfo,
    fields: &mut Vec<Node<ast::Field>>,
) {
    for selection in selections {
        match selection {
            ast::Selection::Field(field) => {
                if field.name.as_str() == "__typename" {
                    continue;
                }
                if !fields
                    .iter()
                    .any(|collected| collected.response_name() == field.response_name())
                {
                    fields.push(field.clone());
                }
            }
            ast::Selection::InlineFragment(fragment) => {
                let applies = fragment.type_condition.as_ref().is_none_or(|condition| {
                    does_type_apply(info.schema.schema(), condition, type_name)
                });
                if applies {
                    collect_fields(type_name, &fragment.selection_set, info, fields);
                }
            }
            ast::Selection::FragmentSpread(_) => {}
        }
    }
}

/// The arguments identifying `data` by its key fields: `{ id }` gives `{ "id": data.id }`.
fn key_arguments(key: &[ast::Selection], data: &Object) -> Object {
    let mut arguments = Object::new();
    for selection in key {
        if let ast::Selection::Field(field) = selection {
            let response_key = field.response_name();
            if let Some(value) = data.get(response_key.as_str()) {
                arguments.insert(response_key.as_str(), value.clone());
            }
        }
    }
    arguments
}

/// Completes objects through a root query field of the subschema that fetches them by key.
pub(crate) struct DelegatingMergedTypeResolver {
    type_name: Name,
    field_name: Name,
    args: Option<MergeArgs>,
    key: Vec<ast::Selection>,
}

impl DelegatingMergedTypeResolver {
    pub(crate) fn new(
        type_name: Name,
        field_name: Name,
        args: Option<MergeArgs>,
        key: Vec<ast::Selection>,
    ) -> Self {
        Self {
            type_name,
            field_name,
            args,
            key,
        }
    }
}

#[async_trait]
impl MergedTypeResolver for DelegatingMergedTypeResolver {
    async fn resolve(
        &self,
        object: &ExternalObject,
        context: &Context,
        info: &ResolveInfo,
        subschema: &Arc<Subschema>,
        selection_set: Vec<ast::Selection>,
    ) -> Result<ExternalObject, graphql::Error> {
        let args = match &self.args {
            Some(args) => args(object),
            None => key_arguments(&self.key, &object.data),
        };
        let options = DelegateOptions::builder()
            .subschema(subschema.clone())
            .field_name(self.field_name.clone())
            .response_key(self.field_name.clone())
            .args(args)
            .selection_set(selection_set)
            .return_type(ast::Type::Named(self.type_name.clone()))
            .skip_type_merging(true)
            .build();
        match delegate_to_schema(options, context, info).await {
            Resolved::Object(patch) => Ok(patch),
            Resolved::Value(Value::Object(data)) => {
                Ok(ExternalObject::new(data).with_subschema(subschema.clone()))
            }
            Resolved::Value(Value::Null) => Ok(ExternalObject::default()),
            Resolved::Error(error) => Err(error),
            Resolved::Value(_) | Resolved::List(_) => Err(DelegationError::MalformedResponse {
                service: subschema.name().to_string(),
                reason: format!("\"{}\" did not return an object", self.field_name),
            }
            .into()),
        }
    }
}
