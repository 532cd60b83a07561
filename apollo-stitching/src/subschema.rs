//! Subschemas: the schemas a stitched schema delegates to.

use std::fmt;
use std::sync::Arc;

use apollo_compiler::Name;
use apollo_compiler::Schema;
use apollo_compiler::ast;
use apollo_compiler::collections::IndexMap;
use apollo_compiler::validation::Valid;
use async_trait::async_trait;
use itertools::Itertools;
use tracing::debug;

use crate::BoxError;
use crate::context::Context;
use crate::error::DelegationError;
use crate::error::StitchingError;
use crate::execution::ExecutableSchema;
use crate::execution::ExternalObject;
use crate::execution::ResolveInfo;
use crate::graphql;
use crate::graphql::ResponseStream;
use crate::json_ext::Object;
use crate::transforms::Transform;

/// Executes requests against a schema that is not held in memory.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(
        &self,
        request: graphql::Request,
        context: &Context,
    ) -> Result<graphql::Response, BoxError>;

    /// Opens a subscription. `None` when the fetcher cannot stream.
    async fn subscribe(
        &self,
        _request: graphql::Request,
        _context: &Context,
    ) -> Option<Result<ResponseStream, BoxError>> {
        None
    }
}

/// Where a subschema's requests are executed.
#[derive(Clone)]
pub enum Source {
    /// An executable schema in this process.
    Local(ExecutableSchema),
    /// A schema behind a fetcher.
    Remote {
        schema: Arc<Valid<Schema>>,
        fetcher: Arc<dyn Fetcher>,
    },
}

impl Source {
    fn schema(&self) -> &Valid<Schema> {
        match self {
            Source::Local(executable) => executable.schema(),
            Source::Remote { schema, .. } => schema,
        }
    }
}

/// Fetches the fields of a merged type from one subschema, for an object another subschema
/// returned.
#[async_trait]
pub trait MergedTypeResolver: Send + Sync {
    /// Returns the fields of `object` selected by `selection_set`, as provided by `subschema`.
    /// The result may be a complete replacement or a patch; fields `object` already has are
    /// kept.
    async fn resolve(
        &self,
        object: &ExternalObject,
        context: &Context,
        info: &ResolveInfo,
        subschema: &Arc<Subschema>,
        selection_set: Vec<ast::Selection>,
    ) -> Result<ExternalObject, graphql::Error>;
}

/// Computes the arguments of a merge query from the object being completed.
pub type MergeArgs = Arc<dyn Fn(&ExternalObject) -> Object + Send + Sync>;

/// How a subschema contributes to a merged type.
#[derive(Clone, Default)]
pub struct MergedTypeConfig {
    /// Fields the subschema needs to identify an object, such as `{ id }`.
    pub selection_set: Option<String>,
    /// Root query field that fetches an object by key.
    pub field_name: Option<Name>,
    /// Arguments of `field_name`. Defaults to the key fields of the object.
    pub args: Option<MergeArgs>,
    /// Replaces the query through `field_name`.
    pub resolve: Option<Arc<dyn MergedTypeResolver>>,
}

#[buildstructor::buildstructor]
impl MergedTypeConfig {
    #[builder(visibility = "pub")]
    fn new(
        selection_set: Option<String>,
        field_name: Option<Name>,
        args: Option<MergeArgs>,
        resolve: Option<Arc<dyn MergedTypeResolver>>,
    ) -> Self {
        Self {
            selection_set,
            field_name,
            args,
            resolve,
        }
    }

    /// Whether other subschemas' objects can be completed through this subschema.
    pub fn is_resolvable(&self) -> bool {
        self.field_name.is_some() || self.resolve.is_some()
    }
}

impl fmt::Debug for MergedTypeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MergedTypeConfig")
            .field("selection_set", &self.selection_set)
            .field("field_name", &self.field_name)
            .field("args", &self.args.is_some())
            .field("resolve", &self.resolve.is_some())
            .finish()
    }
}

/// Describes a subschema before its transforms are applied.
pub struct SubschemaConfig {
    name: String,
    source: Source,
    transforms: Vec<Box<dyn Transform>>,
    merged_types: IndexMap<Name, MergedTypeConfig>,
}

impl SubschemaConfig {
    /// A subschema executed in this process.
    pub fn local(name: impl Into<String>, schema: ExecutableSchema) -> Self {
        Self::new(name.into(), Source::Local(schema))
    }

    /// A subschema reached through `fetcher`. `schema` describes what the fetcher serves.
    pub fn remote(
        name: impl Into<String>,
        schema: Valid<Schema>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Self {
        Self::new(
            name.into(),
            Source::Remote {
                schema: Arc::new(schema),
                fetcher,
            },
        )
    }

    fn new(name: String, source: Source) -> Self {
        Self {
            name,
            source,
            transforms: Vec::new(),
            merged_types: IndexMap::default(),
        }
    }

    /// Appends a transform. Transforms apply to the schema in the order they are added.
    pub fn with_transform(mut self, transform: impl Transform + 'static) -> Self {
        self.transforms.push(Box::new(transform));
        self
    }

    pub fn with_transforms(mut self, transforms: Vec<Box<dyn Transform>>) -> Self {
        self.transforms.extend(transforms);
        self
    }

    /// Declares how this subschema contributes to the merged type `type_name`.
    pub fn with_merged_type(mut self, type_name: Name, config: MergedTypeConfig) -> Self {
        self.merged_types.insert(type_name, config);
        self
    }

    /// Applies the transforms to the schema, once.
    pub fn build(self) -> Result<Arc<Subschema>, StitchingError> {
        let target_schema = Arc::new(self.source.schema().clone());
        let mut schema = target_schema.as_ref().clone().into_inner();
        let mut transforms = Vec::with_capacity(self.transforms.len());
        for mut transform in self.transforms {
            debug!(subschema = %self.name, transform = transform.name(), "transforming schema");
            schema = transform.transform_schema(schema)?;
            transforms.push(Arc::<dyn Transform>::from(transform));
        }
        let schema = schema.validate().map_err(|with_errors| StitchingError::InvalidTransform {
            transform: transforms
                .iter()
                .map(|transform| transform.name())
                .join(", "),
            message: with_errors.errors.to_string(),
        })?;

        for (type_name, config) in &self.merged_types {
            if let Some(selection_set) = &config.selection_set {
                crate::schema::parse_selection_set(type_name, selection_set)?;
            }
        }

        Ok(Arc::new(Subschema {
            name: self.name,
            source: self.source,
            target_schema,
            schema: Arc::new(schema),
            transforms,
            merged_types: self.merged_types,
        }))
    }
}

/// A subschema with its transforms applied.
pub struct Subschema {
    name: String,
    source: Source,
    target_schema: Arc<Valid<Schema>>,
    schema: Arc<Valid<Schema>>,
    transforms: Vec<Arc<dyn Transform>>,
    merged_types: IndexMap<Name, MergedTypeConfig>,
}

impl Subschema {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The schema as the stitched schema sees it, after transforms.
    pub fn schema(&self) -> &Arc<Valid<Schema>> {
        &self.schema
    }

    /// The schema requests are finally executed against, before transforms.
    pub fn target_schema(&self) -> &Arc<Valid<Schema>> {
        &self.target_schema
    }

    pub fn transforms(&self) -> &[Arc<dyn Transform>] {
        &self.transforms
    }

    pub fn merged_types(&self) -> &IndexMap<Name, MergedTypeConfig> {
        &self.merged_types
    }

    pub fn merged_type(&self, type_name: &str) -> Option<&MergedTypeConfig> {
        self.merged_types.get(type_name)
    }

    pub(crate) async fn execute(
        &self,
        request: graphql::Request,
        context: &Context,
    ) -> Result<graphql::Response, DelegationError> {
        match &self.source {
            Source::Local(executable) => Ok(executable.execute(request, context).await),
            Source::Remote { fetcher, .. } => fetcher
                .fetch(request, context)
                .await
                .map_err(|error| DelegationError::SubrequestFailed {
                    service: self.name.clone(),
                    reason: error.to_string(),
                }),
        }
    }

    pub(crate) async fn subscribe(
        &self,
        request: graphql::Request,
        context: &Context,
    ) -> Result<ResponseStream, DelegationError> {
        match &self.source {
            Source::Local(executable) => {
                executable
                    .subscribe(request, context)
                    .await
                    .map_err(|response| DelegationError::SubrequestFailed {
                        service: self.name.clone(),
                        reason: response
                            .errors
                            .iter()
                            .map(|error| error.message.as_str())
                            .join("; "),
                    })
            }
            Source::Remote { fetcher, .. } => match fetcher.subscribe(request, context).await {
                Some(Ok(stream)) => Ok(stream),
                Some(Err(error)) => Err(DelegationError::SubrequestFailed {
                    service: self.name.clone(),
                    reason: error.to_string(),
                }),
                None => Err(DelegationError::SubscriptionUnsupported {
                    service: self.name.clone(),
                }),
            },
        }
    }
}

impl fmt::Debug for Subschema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subschema")
            .field("name", &self.name)
            .field(
                "transforms",
                &self
                    .transforms
                    .iter()
                    .map(|transform| transform.name())
                    .collect::<Vec<_>>(),
            )
            .field("merged_types", &self.merged_types)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use apollo_compiler::name;

    use super::*;
    use crate::execution::ResolverMap;

    #[test]
    fn test_invalid_key_selection_set_is_rejected() {
        let schema = ExecutableSchema::parse(
            "type Query { user(id: ID!): User } type User { id: ID! }",
            ResolverMap::new(),
        )
        .unwrap();
        let error = SubschemaConfig::local("users", schema)
            .with_merged_type(
                name!("User"),
                MergedTypeConfig::builder().selection_set("{ id").build(),
            )
            .build()
            .unwrap_err();
        assert!(matches!(error, StitchingError::InvalidSelectionSet { .. }));
    }

    #[tokio::test]
    async fn test_remote_subscription_without_support() {
        struct NoStreams;

        #[async_trait]
        impl Fetcher for NoStreams {
            async fn fetch(
                &self,
                _request: graphql::Request,
                _context: &Context,
            ) -> Result<graphql::Response, BoxError> {
                Ok(graphql::Response::default())
            }
        }

        let schema = Schema::parse_and_validate(
            "type Query { a: Int } type Subscription { b: Int }",
            "schema.graphql",
        )
        .unwrap();
        let subschema = SubschemaConfig::remote("remote", schema, Arc::new(NoStreams))
            .build()
            .unwrap();
        let error = match subschema
            .subscribe(graphql::Request::default(), &Context::new())
            .await
        {
            Err(error) => error,
            Ok(_) => panic!("expected an error"),
        };
        assert_eq!(
            error,
            DelegationError::SubscriptionUnsupported {
                service: "remote".to_string()
            }
        );
    }
}
