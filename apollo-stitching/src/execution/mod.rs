//! Execution of GraphQL operations against a schema and a resolver map.
//!
//! This is the engine behind in-memory subschemas and behind the stitched schema itself.

use std::sync::Arc;

use apollo_compiler::Schema;
use apollo_compiler::ast::OperationType;
use apollo_compiler::collections::HashSet;
use apollo_compiler::schema::ExtendedType;
use apollo_compiler::validation::Valid;
use futures::StreamExt;
use tracing::debug;

mod executor;
mod info;
pub mod resolvers;
pub mod scalars;
mod to_ast;
pub mod value;

pub(crate) use executor::ExecutionContext;
pub(crate) use executor::value_to_json;
pub use info::ResolveInfo;
pub use resolvers::DefaultFieldResolver;
pub use resolvers::EventStream;
pub use resolvers::FieldConfig;
pub use resolvers::FieldResolver;
pub use resolvers::ResolverEntry;
pub use resolvers::ResolverMap;
pub use resolvers::SubscriptionResolver;
pub use resolvers::TypeResolver;
pub use resolvers::async_resolver_fn;
pub use resolvers::resolver_fn;
pub use resolvers::subscriber_fn;
pub use scalars::ScalarCoercion;
pub use value::ExternalObject;
pub use value::Resolved;

use crate::context::Context;
use crate::error::StitchingError;
use crate::graphql;
use crate::graphql::Request;
use crate::graphql::Response;
use crate::graphql::ResponseStream;
use crate::json_ext::Path;
use crate::json_ext::Value;
use crate::merge::MergeInfo;
use crate::schema::field_definition;
use crate::schema::is_abstract;

/// A validated schema together with the resolvers that execute it.
#[derive(Clone)]
pub struct ExecutableSchema {
    schema: Arc<Valid<Schema>>,
    resolvers: Arc<ResolverMap>,
    merge_info: Option<Arc<MergeInfo>>,
}

impl ExecutableSchema {
    /// Attaches `resolvers` to `schema`. Every resolver must target a type and field the schema
    /// defines.
    pub fn new(schema: Valid<Schema>, resolvers: ResolverMap) -> Result<Self, StitchingError> {
        validate_resolvers(&schema, &resolvers)?;
        Ok(Self {
            schema: Arc::new(schema),
            resolvers: Arc::new(resolvers),
            merge_info: None,
        })
    }

    /// Parses and validates `type_defs`, then attaches `resolvers`.
    pub fn parse(type_defs: &str, resolvers: ResolverMap) -> Result<Self, StitchingError> {
        let schema = Schema::parse_and_validate(type_defs, "schema.graphql")?;
        Self::new(schema, resolvers)
    }

    pub(crate) fn with_merge_info(mut self, merge_info: Arc<MergeInfo>) -> Self {
        self.merge_info = Some(merge_info);
        self
    }

    pub fn schema(&self) -> &Valid<Schema> {
        &self.schema
    }

    pub(crate) fn schema_arc(&self) -> &Arc<Valid<Schema>> {
        &self.schema
    }

    pub fn resolvers(&self) -> &ResolverMap {
        &self.resolvers
    }

    pub fn merge_info(&self) -> Option<&Arc<MergeInfo>> {
        self.merge_info.as_ref()
    }

    /// Executes a query or mutation.
    pub async fn execute(&self, request: Request, context: &Context) -> Response {
        self.execute_with_root(request, context, ExternalObject::default())
            .await
    }

    /// Executes a query or mutation with `root` as the value of the root type.
    pub async fn execute_with_root(
        &self,
        request: Request,
        context: &Context,
        root: ExternalObject,
    ) -> Response {
        let execution = match ExecutionContext::prepare(self, &request, context) {
            Ok(execution) => execution,
            Err(errors) => return Response::from_errors(errors),
        };
        if execution.operation.operation_type == OperationType::Subscription {
            return Response::from_errors(vec![
                graphql::Error::builder()
                    .message("Subscription operations must be executed with `subscribe`.")
                    .extension_code("SUBSCRIPTION_NOT_EXECUTABLE")
                    .build(),
            ]);
        }
        let data = execution.execute_operation(root).await;
        Response::builder()
            .data(data.unwrap_or(Value::Null))
            .errors(execution.take_errors())
            .build()
    }

    /// Starts a subscription. Each event of the root field's stream is executed as the root
    /// value of the operation and yields one response.
    ///
    /// The upstream event stream is dropped, and so cancelled, when the returned stream is.
    pub async fn subscribe(
        &self,
        request: Request,
        context: &Context,
    ) -> Result<ResponseStream, Response> {
        let execution =
            ExecutionContext::prepare(self, &request, context).map_err(Response::from_errors)?;
        if execution.operation.operation_type != OperationType::Subscription {
            return Err(Response::from_errors(vec![
                graphql::Error::builder()
                    .message("`subscribe` only executes subscription operations.")
                    .extension_code("SUBSCRIPTION_REQUIRED")
                    .build(),
            ]));
        }
        let Some(root_type) = self
            .schema
            .root_operation(OperationType::Subscription)
            .cloned()
        else {
            return Err(Response::from_errors(vec![
                graphql::Error::builder()
                    .message("Schema is not configured for subscription operations.")
                    .build(),
            ]));
        };

        let mut fields = executor::FieldsByResponseKey::default();
        execution.collect_fields(
            &root_type,
            &execution.operation.selection_set,
            &mut fields,
            &mut HashSet::default(),
        );
        let Some((response_key, nodes)) = fields.first() else {
            return Err(Response::from_errors(vec![
                graphql::Error::builder()
                    .message("Subscription operations must select one root field.")
                    .build(),
            ]));
        };
        let Some(field) = nodes.first() else {
            return Err(Response::default());
        };
        let path = Path::from(response_key.as_str());
        let subscriber = self
            .resolvers
            .field_config(&root_type, &field.name)
            .and_then(|config| config.subscribe.clone());
        let Some(subscriber) = subscriber else {
            return Err(Response::from_errors(vec![
                graphql::Error::builder()
                    .message(format!(
                        "Subscription field \"{}\" has no subscribe resolver.",
                        field.name
                    ))
                    .path(path)
                    .build(),
            ]));
        };

        let info = execution.resolve_info(&root_type, nodes, field, path.clone());
        let args = match execution.coerce_argument_values(field) {
            Ok(args) => args,
            Err(message) => {
                return Err(Response::from_errors(vec![
                    graphql::Error::builder().message(message).path(path).build(),
                ]));
            }
        };
        let events = subscriber
            .subscribe(&ExternalObject::default(), &args, context, &info)
            .await
            .map_err(|error| {
                let error = if error.path.is_some() {
                    error
                } else {
                    error.at_path(path.clone())
                };
                Response::from_errors(vec![error])
            })?;
        debug!(field = %field.name, "subscription started");

        Ok(events
            .then(move |event| {
                let execution = execution.for_event();
                async move {
                    let data = execution.execute_operation(event).await;
                    Response::builder()
                        .data(data.unwrap_or(Value::Null))
                        .errors(execution.take_errors())
                        .build()
                }
            })
            .boxed())
    }
}

fn validate_resolvers(schema: &Schema, resolvers: &ResolverMap) -> Result<(), StitchingError> {
    for (type_name, field_name, _) in resolvers.fields() {
        if field_definition(schema, type_name, field_name).is_none() {
            return Err(StitchingError::InvalidResolver {
                type_name: type_name.to_string(),
                key: field_name.to_string(),
                message: "the schema does not define this field".to_string(),
            });
        }
    }
    for type_name in resolvers.type_resolver_names() {
        if !is_abstract(schema, type_name) {
            return Err(StitchingError::InvalidResolver {
                type_name: type_name.to_string(),
                key: resolvers::RESOLVE_TYPE.to_string(),
                message: "only interfaces and unions resolve their runtime type".to_string(),
            });
        }
    }
    for type_name in resolvers.scalar_names() {
        if !matches!(schema.types.get(type_name), Some(ExtendedType::Scalar(_))) {
            return Err(StitchingError::InvalidResolver {
                type_name: type_name.to_string(),
                key: resolvers::SERIALIZE.to_string(),
                message: "only scalar types accept a coercion".to_string(),
            });
        }
    }
    Ok(())
}
