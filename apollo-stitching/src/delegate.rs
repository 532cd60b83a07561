//! Delegation: answering a field of the stitched schema with a request to a subschema.
//!
//! A delegated request holds exactly one root field, the one being delegated, with the
//! sub-selections of the field being resolved. It flows through the delegation pipeline
//! before it is executed:
//!
//! 1. [`AddMergedTypeSelectionSets`], when the stitched schema merges types,
//! 2. the transforms given for this call,
//! 3. the subschema's transforms, last registered first,
//! 4. [`ExpandAbstractTypes`], [`FilterToSchema`] and [`AddTypenameToAbstract`] against the
//!    schema the subschema actually serves.
//!
//! The result flows back through the same pipeline in reverse and is then reconciled with the
//! field's type by [`check_result_and_handle_errors`].

use std::sync::Arc;

use apollo_compiler::Name;
use apollo_compiler::Node;
use apollo_compiler::ast;
use apollo_compiler::ast::OperationType;
use async_trait::async_trait;
use futures::StreamExt;
use tracing::debug;
use tracing::instrument;
use tracing::warn;

use crate::context::Context;
use crate::error::DelegationError;
use crate::execution::EventStream;
use crate::execution::ExternalObject;
use crate::execution::FieldResolver;
use crate::execution::ResolveInfo;
use crate::execution::Resolved;
use crate::execution::SubscriptionResolver;
use crate::graphql;
use crate::json_ext::Object;
use crate::json_ext::Path;
use crate::json_ext::Value;
use crate::reconcile::check_result_and_handle_errors;
use crate::reconcile::tag_service;
use crate::schema::field_definition;
use crate::subschema::Subschema;
use crate::transforms;
use crate::transforms::AddMergedTypeSelectionSets;
use crate::transforms::AddTypenameToAbstract;
use crate::transforms::DelegationRequest;
use crate::transforms::ExpandAbstractTypes;
use crate::transforms::FilterToSchema;
use crate::transforms::Transform;
use crate::transforms::collect_variables;
use crate::transforms::field_selection;

/// Prefix of the variables carrying explicit delegation arguments.
const ARGUMENT_VARIABLE_PREFIX: &str = "__arg_";

/// What to delegate, and where.
#[derive(Clone)]
pub struct DelegateOptions {
    pub subschema: Arc<Subschema>,
    pub operation_type: OperationType,
    /// The root field of the subschema, as the stitched schema names it.
    pub field_name: Name,
    /// The key the field's value is expected under. Defaults to the response key of the field
    /// being resolved.
    pub response_key: Option<Name>,
    /// Explicit arguments. When absent, the arguments of the field being resolved are
    /// forwarded as written, variables included.
    pub args: Option<Object>,
    /// Sub-selections of the delegated field. Defaults to those of the field being resolved.
    pub selection_set: Option<Vec<ast::Selection>>,
    /// The type the value is reconciled with. Defaults to the type of the field being resolved.
    pub return_type: Option<ast::Type>,
    /// Applied before the subschema's own transforms.
    pub transforms: Vec<Arc<dyn Transform>>,
    /// Return objects as the subschema sent them, without fetching the fields other subschemas
    /// contribute to their type.
    pub skip_type_merging: bool,
}

#[buildstructor::buildstructor]
impl DelegateOptions {
    #[builder(visibility = "pub")]
    #[allow(clippy::too_many_arguments)]
    fn new(
        subschema: Arc<Subschema>,
        operation_type: Option<OperationType>,
        field_name: Name,
        response_key: Option<Name>,
        args: Option<Object>,
        selection_set: Option<Vec<ast::Selection>>,
        return_type: Option<ast::Type>,
        transforms: Vec<Arc<dyn Transform>>,
        skip_type_merging: Option<bool>,
    ) -> Self {
        Self {
            subschema,
            operation_type: operation_type.unwrap_or(OperationType::Query),
            field_name,
            response_key,
            args,
            selection_set,
            return_type,
            transforms,
            skip_type_merging: skip_type_merging.unwrap_or_default(),
        }
    }
}

impl std::fmt::Debug for DelegateOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelegateOptions")
            .field("subschema", &self.subschema.name())
            .field("operation_type", &self.operation_type)
            .field("field_name", &self.field_name)
            .field("response_key", &self.response_key)
            .field("skip_type_merging", &self.skip_type_merging)
            .finish()
    }
}

/// A request ready to leave, with the pipeline its result must flow back through.
struct PreparedRequest {
    request: DelegationRequest,
    transforms: Vec<Arc<dyn Transform>>,
    response_key: Name,
}

/// Delegates a query or mutation field and reconciles the result with the field's type.
///
/// Never fails: every problem becomes a [`Resolved::Error`] or an error recorded below the
/// returned value, so that sibling fields resolve regardless.
#[instrument(
    skip_all,
    level = "debug",
    name = "delegate",
    fields(subschema = %options.subschema.name(), field = %options.field_name)
)]
pub async fn delegate_to_schema(
    options: DelegateOptions,
    context: &Context,
    info: &ResolveInfo,
) -> Resolved {
    let subschema = options.subschema.clone();
    let prepared = match prepare(&options, context, info) {
        Ok(prepared) => prepared,
        Err(error) => return Resolved::Error(error.to_graphql_error(None)),
    };
    debug!(query = %prepared.request.to_query_string(), "delegating");

    let response = match subschema
        .execute(prepared.request.into_graphql_request(), context)
        .await
    {
        Ok(response) => response,
        Err(error) => {
            warn!(subschema = subschema.name(), %error, "delegated request failed");
            return Resolved::Error(error.to_graphql_error(None));
        }
    };
    let response = transforms::transform_result(&prepared.transforms, response, context);

    let return_type = options
        .return_type
        .unwrap_or_else(|| info.return_type.clone());
    check_result_and_handle_errors(
        response,
        context,
        info,
        &prepared.response_key,
        &subschema,
        &return_type,
        options.skip_type_merging,
    )
    .await
}

/// Delegates a subscription field. Each event of the returned stream is the root value of one
/// execution of the client's operation; the field's value in it is reconciled when the field
/// resolves.
///
/// Dropping the stream drops the subschema's stream.
#[instrument(
    skip_all,
    level = "debug",
    name = "delegate",
    fields(subschema = %options.subschema.name(), field = %options.field_name)
)]
pub async fn delegate_subscription(
    options: DelegateOptions,
    context: &Context,
    info: &ResolveInfo,
) -> Result<EventStream, graphql::Error> {
    let subschema = options.subschema.clone();
    let PreparedRequest {
        request,
        transforms: pipeline,
        response_key,
    } = prepare(&options, context, info)?;
    debug!(query = %request.to_query_string(), "delegating subscription");

    let stream = subschema
        .subscribe(request.into_graphql_request(), context)
        .await
        .inspect_err(|error| warn!(subschema = subschema.name(), %error, "subscription failed"))?;
    let include_service = info
        .merge_info()
        .is_some_and(|merge_info| merge_info.configuration().errors.include_subschema_name);
    let context = context.clone();
    Ok(stream
        .map(move |response| {
            let response = transforms::transform_result(&pipeline, response, &context);
            event_root(response, &response_key, &subschema, include_service)
        })
        .boxed())
}

/// The root value of a subscription event. Errors the subschema did not locate are attached to
/// the subscription field.
fn event_root(
    response: graphql::Response,
    response_key: &Name,
    subschema: &Arc<Subschema>,
    include_service: bool,
) -> ExternalObject {
    let data = match response.data {
        Some(Value::Object(data)) => data,
        _ => Object::new(),
    };
    let errors = response
        .errors
        .into_iter()
        .map(|error| {
            let error = if include_service {
                tag_service(error, subschema.name())
            } else {
                error
            };
            if error.path.as_ref().is_some_and(|path| !path.is_empty()) {
                error
            } else {
                error.at_path(Path::from(response_key.as_str()))
            }
        })
        .collect();
    ExternalObject::new(data)
        .with_errors(errors)
        .with_subschema(subschema.clone())
}

fn prepare(
    options: &DelegateOptions,
    context: &Context,
    info: &ResolveInfo,
) -> Result<PreparedRequest, DelegationError> {
    let response_key = options
        .response_key
        .clone()
        .unwrap_or_else(|| info.response_key.clone());
    let request = build_request(options, &response_key, info)?;
    let transforms = pipeline(options, info);
    let request = transforms::transform_request(&transforms, request, context)?;
    Ok(PreparedRequest {
        request,
        transforms,
        response_key,
    })
}

fn pipeline(options: &DelegateOptions, info: &ResolveInfo) -> Vec<Arc<dyn Transform>> {
    let subschema = &options.subschema;
    let target = subschema.target_schema();
    let mut pipeline: Vec<Arc<dyn Transform>> =
        Vec::with_capacity(options.transforms.len() + subschema.transforms().len() + 4);
    if let Some(merge_info) = info.merge_info() {
        pipeline.push(Arc::new(AddMergedTypeSelectionSets::new(
            subschema.schema().clone(),
            merge_info.clone(),
        )));
    }
    pipeline.extend(options.transforms.iter().cloned());
    pipeline.extend(subschema.transforms().iter().rev().cloned());
    pipeline.push(Arc::new(ExpandAbstractTypes::new(info.schema.schema(), target)));
    pipeline.push(Arc::new(FilterToSchema::new(target.clone())));
    pipeline.push(Arc::new(AddTypenameToAbstract::new(target.clone())));
    pipeline
}

/// Builds the request as the stitched schema sees it: one root field of the subschema, in the
/// subschema's naming after transforms.
fn build_request(
    options: &DelegateOptions,
    response_key: &Name,
    info: &ResolveInfo,
) -> Result<DelegationRequest, DelegationError> {
    let subschema = &options.subschema;
    let schema = subschema.schema();
    let no_matching_field = |type_name: &str| DelegationError::NoMatchingSubschemaField {
        service: subschema.name().to_string(),
        type_name: type_name.to_string(),
        field_name: options.field_name.to_string(),
    };
    let root = schema
        .root_operation(options.operation_type)
        .ok_or_else(|| no_matching_field(options.operation_type.name()))?;
    let definition = field_definition(schema, root, &options.field_name)
        .ok_or_else(|| no_matching_field(root))?;

    let mut request = DelegationRequest::new(options.operation_type, Vec::new());
    let arguments = match &options.args {
        Some(args) => {
            let mut arguments = Vec::with_capacity(args.len());
            for (name, value) in args.iter() {
                let Some(argument) = definition
                    .arguments
                    .iter()
                    .find(|argument| argument.name.as_str() == name.as_str())
                else {
                    debug!(
                        subschema = subschema.name(),
                        field = %options.field_name,
                        argument = name.as_str(),
                        "skipping argument the subschema field does not define"
                    );
                    continue;
                };
                let variable = Name::new(&format!("{ARGUMENT_VARIABLE_PREFIX}{}", argument.name))
                    .map_err(|_| DelegationError::InvalidArgument {
                        service: subschema.name().to_string(),
                        field_name: options.field_name.to_string(),
                        argument: argument.name.to_string(),
                        reason: "no valid variable name can carry it".to_string(),
                    })?;
                request
                    .variable_definitions
                    .push(Node::new(ast::VariableDefinition {
                        name: variable.clone(),
                        ty: argument.ty.clone(),
                        default_value: None,
                        directives: Default::default(),
                    }));
                request.variables.insert(variable.as_str(), value.clone());
                arguments.push(Node::new(ast::Argument {
                    name: argument.name.clone(),
                    value: Node::new(ast::Value::Variable(variable)),
                }));
            }
            arguments
        }
        None => info.arguments(),
    };
    let selection_set = options
        .selection_set
        .clone()
        .unwrap_or_else(|| info.selection_set());
    let alias = (*response_key != options.field_name).then(|| response_key.clone());
    request.selection_set = vec![field_selection(
        options.field_name.clone(),
        alias,
        arguments,
        selection_set,
    )];

    for name in collect_variables(&request.selection_set) {
        if request
            .variable_definitions
            .iter()
            .any(|definition| definition.name == name)
        {
            continue;
        }
        let definition = info
            .variable_definitions()
            .iter()
            .find(|definition| definition.name == name)
            .ok_or_else(|| DelegationError::MissingVariable {
                name: name.to_string(),
            })?;
        match info.variable_values.get(name.as_str()) {
            Some(value) => {
                request.variables.insert(name.as_str(), value.clone());
            }
            None if definition.ty.is_non_null() && definition.default_value.is_none() => {
                return Err(DelegationError::MissingVariable {
                    name: name.to_string(),
                });
            }
            None => {}
        }
        request.variable_definitions.push(definition.clone());
    }
    Ok(request)
}

/// Resolves a root field of the stitched schema by delegating it to the subschema defining it.
///
/// Subscription fields only delegate their subscription: the field's value is read from each
/// event by the default resolver of the stitched schema.
pub(crate) struct DelegatingResolver {
    subschema: Arc<Subschema>,
    operation_type: OperationType,
}

impl DelegatingResolver {
    pub(crate) fn new(subschema: Arc<Subschema>, operation_type: OperationType) -> Self {
        Self {
            subschema,
            operation_type,
        }
    }

    fn options(&self, info: &ResolveInfo) -> DelegateOptions {
        DelegateOptions::builder()
            .subschema(self.subschema.clone())
            .operation_type(self.operation_type)
            .field_name(info.field_name.clone())
            .build()
    }
}

#[async_trait]
impl FieldResolver for DelegatingResolver {
    async fn resolve(
        &self,
        _parent: &ExternalObject,
        _args: &Object,
        context: &Context,
        info: &ResolveInfo,
    ) -> Result<Resolved, graphql::Error> {
        Ok(delegate_to_schema(self.options(info), context, info).await)
    }
}

#[async_trait]
impl SubscriptionResolver for DelegatingResolver {
    async fn subscribe(
        &self,
        _parent: &ExternalObject,
        _args: &Object,
        context: &Context,
        info: &ResolveInfo,
    ) -> Result<EventStream, graphql::Error> {
        delegate_subscription(self.options(info), context, info).await
    }
}
