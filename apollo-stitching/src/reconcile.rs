//! Reconciliation of subschema results with the stitched schema.
//!
//! Errors travel with the values they belong to. While a value is reconciled, the path of each
//! of its errors is relative to the value: an error at `["user", "posts", 0, "title"]` in a
//! delegated response is carried as `["posts", 0, "title"]` by the value of `user`, and so on
//! down, until it reaches the position it names. There it becomes the error of that field, so
//! the executor records it exactly once, at the right response path, and propagates `null` as
//! the field's type demands.

use std::collections::BTreeMap;
use std::sync::Arc;

use apollo_compiler::Name;
use apollo_compiler::ast::Type;
use apollo_compiler::schema::ExtendedType;
use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use futures::future::join_all;

use crate::context::Context;
use crate::error::DelegationError;
use crate::execution::ExternalObject;
use crate::execution::FieldResolver;
use crate::execution::ResolveInfo;
use crate::execution::Resolved;
use crate::graphql;
use crate::json_ext::Object;
use crate::json_ext::Path;
use crate::json_ext::PathElement;
use crate::json_ext::Value;
use crate::merge::merge_fields;
use crate::schema::is_abstract;
use crate::subschema::Subschema;

/// Converts the response of a delegated request into the value of the field being resolved.
///
/// `response_key` is the key of the delegated root field in the response. Errors the subschema
/// located below that field travel with the value; the others are attached to the field.
pub async fn check_result_and_handle_errors(
    response: graphql::Response,
    context: &Context,
    info: &ResolveInfo,
    response_key: &str,
    subschema: &Arc<Subschema>,
    return_type: &Type,
    skip_type_merging: bool,
) -> Resolved {
    let include_service = info
        .merge_info()
        .is_some_and(|merge_info| merge_info.configuration().errors.include_subschema_name);
    let errors = response
        .errors
        .into_iter()
        .map(|error| {
            let error = if include_service {
                tag_service(error, subschema.name())
            } else {
                error
            };
            relative_to(error, response_key)
        })
        .collect();

    let value = match response.data {
        Some(Value::Object(mut data)) => data.remove(response_key).unwrap_or(Value::Null),
        Some(Value::Null) | None => Value::Null,
        Some(_) => {
            return Resolved::Error(
                DelegationError::MalformedResponse {
                    service: subschema.name().to_string(),
                    reason: "data is not an object".to_string(),
                }
                .to_graphql_error(None),
            );
        }
    };
    resolve_external_value(
        value,
        errors,
        subschema,
        context,
        info,
        return_type,
        skip_type_merging,
    )
    .await
}

/// Reconciles one value of `return_type` with its errors, whose paths are relative to it.
///
/// Objects are annotated with their errors and subschema and, unless `skip_type_merging` is
/// set, completed with the fields other subschemas contribute to their type.
pub fn resolve_external_value<'a>(
    value: Value,
    errors: Vec<graphql::Error>,
    subschema: &'a Arc<Subschema>,
    context: &'a Context,
    info: &'a ResolveInfo,
    return_type: &'a Type,
    skip_type_merging: bool,
) -> BoxFuture<'a, Resolved> {
    async move {
        if value.is_null() {
            return handle_null(errors, subschema, info, return_type);
        }
        let (located, unlocated) = partition_errors(errors);
        if !unlocated.is_empty() {
            // The value is usable: errors about it as a whole are only reported.
            for error in unlocated {
                info.report_error(error);
            }
        }

        if return_type.is_list() {
            let Value::Array(items) = value else {
                return malformed(subschema, format!("expected a list for type {return_type}"));
            };
            let (mut item_errors, misplaced) = errors_by_index(located);
            for error in misplaced {
                info.report_error(error.without_path());
            }
            let item_type = return_type.item_type();
            let items = join_all(items.into_iter().enumerate().map(|(index, item)| {
                let errors = item_errors.remove(&index).unwrap_or_default();
                resolve_external_value(
                    item,
                    errors,
                    subschema,
                    context,
                    info,
                    item_type,
                    skip_type_merging,
                )
            }))
            .await;
            return Resolved::List(items);
        }

        let schema = info.schema.schema();
        let type_name = return_type.inner_named_type();
        match schema.types.get(type_name) {
            Some(ExtendedType::Scalar(_)) => {
                for error in located {
                    info.report_error(error.without_path());
                }
                match info.schema.resolvers().scalar(type_name).parse_value(&value) {
                    Ok(value) => Resolved::Value(value),
                    Err(message) => {
                        Resolved::Error(graphql::Error::builder().message(message).build())
                    }
                }
            }
            Some(ExtendedType::Enum(enum_)) => {
                for error in located {
                    info.report_error(error.without_path());
                }
                match value.as_str() {
                    Some(enum_value) if enum_.values.contains_key(enum_value) => {
                        Resolved::Value(value)
                    }
                    _ => Resolved::Error(
                        graphql::Error::builder()
                            .message(format!("Enum \"{type_name}\" cannot represent value: {value}"))
                            .build(),
                    ),
                }
            }
            Some(ExtendedType::Object(_) | ExtendedType::Interface(_) | ExtendedType::Union(_)) => {
                let Value::Object(data) = value else {
                    return malformed(subschema, format!("expected an object for type {type_name}"));
                };
                let object = ExternalObject::new(data)
                    .with_errors(located)
                    .with_subschema(subschema.clone());
                if skip_type_merging {
                    return Resolved::Object(object);
                }
                let Some(merge_info) = info.merge_info() else {
                    return Resolved::Object(object);
                };
                let object_type = if is_abstract(schema, type_name) {
                    object
                        .typename()
                        .and_then(|typename| Name::new(typename).ok())
                } else {
                    Some(type_name.clone())
                };
                match object_type.and_then(|object_type| merge_info.merged_type(&object_type)) {
                    Some(merged_type) => {
                        Resolved::Object(merge_fields(object, merged_type, context, info).await)
                    }
                    None => Resolved::Object(object),
                }
            }
            Some(ExtendedType::InputObject(_)) | None => {
                malformed(subschema, format!("unknown output type {type_name}"))
            }
        }
    }
    .boxed()
}

/// The value standing for a `null` received with `errors`.
///
/// Errors the value as a whole is responsible for are combined into the field's error. Errors
/// located deeper rebuild the shape of the value down to the positions they name, so that each
/// reaches its own field and nulls propagate from there. Errors naming a position the type
/// cannot have are reported at the field.
pub fn handle_null(
    errors: Vec<graphql::Error>,
    subschema: &Arc<Subschema>,
    info: &ResolveInfo,
    return_type: &Type,
) -> Resolved {
    if errors.is_empty() {
        return Resolved::null();
    }
    let (located, unlocated) = partition_errors(errors);
    if !unlocated.is_empty() {
        return Resolved::Error(graphql::Error::combine(
            unlocated.into_iter().chain(located).collect(),
        ));
    }

    if return_type.is_list() {
        let (mut by_index, misplaced) = errors_by_index(located);
        if by_index.is_empty() {
            return Resolved::Error(graphql::Error::combine(misplaced));
        }
        for error in misplaced {
            info.report_error(error.without_path());
        }
        let item_type = return_type.item_type();
        let len = by_index.keys().next_back().map_or(0, |last| last + 1);
        return Resolved::List(
            (0..len)
                .map(|index| {
                    let errors = by_index.remove(&index).unwrap_or_default();
                    handle_null(errors, subschema, info, item_type)
                })
                .collect(),
        );
    }

    let (keyed, misplaced): (Vec<_>, Vec<_>) = located
        .into_iter()
        .partition(|error| matches!(first_element(error), Some(PathElement::Key(_))));
    // A null-shaped object cannot be completed against an abstract type: no runtime type is
    // known for it.
    if keyed.is_empty() || is_abstract(info.schema.schema(), return_type.inner_named_type()) {
        return Resolved::Error(graphql::Error::combine(
            keyed.into_iter().chain(misplaced).collect(),
        ));
    }
    for error in misplaced {
        info.report_error(error.without_path());
    }
    let mut data = Object::new();
    for error in &keyed {
        if let Some(PathElement::Key(key)) = first_element(error) {
            data.insert(key.as_str(), Value::Null);
        }
    }
    Resolved::Object(
        ExternalObject::new(data)
            .with_errors(keyed)
            .with_subschema(subschema.clone()),
    )
}

/// The default resolver of stitched fields: reads the field's value from its parent and
/// reconciles it, merging objects of merged types.
///
/// Values of parents that were not fetched from a subschema are read as is.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultMergedResolver;

#[async_trait]
impl FieldResolver for DefaultMergedResolver {
    async fn resolve(
        &self,
        parent: &ExternalObject,
        _args: &Object,
        context: &Context,
        info: &ResolveInfo,
    ) -> Result<Resolved, graphql::Error> {
        let response_key = info.response_key.as_str();
        let value = parent
            .data
            .get(response_key)
            .or_else(|| parent.data.get(info.field_name.as_str()))
            .cloned()
            .unwrap_or(Value::Null);
        let Some(subschema) = parent.subschema_for(response_key) else {
            let errors = parent.errors_for(response_key);
            if errors.is_empty() {
                return Ok(Resolved::Value(value));
            }
            if value.is_null() {
                return Err(graphql::Error::combine(errors));
            }
            for error in errors {
                info.report_error(error.without_path());
            }
            return Ok(Resolved::Value(value));
        };
        let errors = parent
            .errors_for(response_key)
            .into_iter()
            .map(|error| relative_to(error, response_key))
            .collect();
        Ok(resolve_external_value(
            value,
            errors,
            subschema,
            context,
            info,
            &info.return_type,
            false,
        )
        .await)
    }
}

/// Adds `extensions.service`, unless the error already names one.
pub(crate) fn tag_service(mut error: graphql::Error, service: &str) -> graphql::Error {
    error
        .extensions
        .entry("service")
        .or_insert_with(|| Value::String(service.into()));
    error
}

/// Makes the path of `error` relative to the value at `response_key`. Errors located elsewhere,
/// or at the key itself, lose their path.
fn relative_to(error: graphql::Error, response_key: &str) -> graphql::Error {
    let relative = error.path.as_ref().and_then(|path| {
        (path.first().and_then(PathElement::as_key) == Some(response_key) && path.len() > 1)
            .then(|| path.skip(1))
    });
    match relative {
        Some(path) => error.at_path(path),
        None => error.without_path(),
    }
}

fn first_element(error: &graphql::Error) -> Option<&PathElement> {
    error.path.as_ref().and_then(Path::first)
}

/// Splits errors into those located below a value and those about the value itself.
fn partition_errors(errors: Vec<graphql::Error>) -> (Vec<graphql::Error>, Vec<graphql::Error>) {
    errors
        .into_iter()
        .partition(|error| error.path.as_ref().is_some_and(|path| !path.is_empty()))
}

/// Groups errors by their leading list index, relative to the item. Errors without a leading
/// index are returned apart, unchanged.
fn errors_by_index(
    errors: Vec<graphql::Error>,
) -> (BTreeMap<usize, Vec<graphql::Error>>, Vec<graphql::Error>) {
    let mut by_index: BTreeMap<usize, Vec<graphql::Error>> = BTreeMap::new();
    let mut misplaced = Vec::new();
    for error in errors {
        let Some(index) = first_element(&error).and_then(PathElement::as_index) else {
            misplaced.push(error);
            continue;
        };
        let error = match error.path.as_ref().map(|path| path.skip(1)) {
            Some(path) if !path.is_empty() => error.at_path(path),
            _ => error.without_path(),
        };
        by_index.entry(index).or_default().push(error);
    }
    (by_index, misplaced)
}

fn malformed(subschema: &Subschema, reason: String) -> Resolved {
    Resolved::Error(
        DelegationError::MalformedResponse {
            service: subschema.name().to_string(),
            reason,
        }
        .to_graphql_error(None),
    )
}
