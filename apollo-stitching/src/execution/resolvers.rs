//! Resolver maps: the behaviour attached to a schema's types and fields.

use std::future::Future;
use std::sync::Arc;

use apollo_compiler::Name;
use apollo_compiler::collections::IndexMap;
use async_trait::async_trait;
use futures::stream::BoxStream;

use super::ResolveInfo;
use super::scalars;
use super::scalars::ScalarCoercion;
use super::value::ExternalObject;
use super::value::Resolved;
use crate::context::Context;
use crate::error::StitchingError;
use crate::graphql;
use crate::json_ext::Object;

/// The meta key assigning a [`TypeResolver`] to an abstract type.
pub const RESOLVE_TYPE: &str = "__resolveType";
/// Meta keys assigning a [`ScalarCoercion`] to a scalar type.
pub const SERIALIZE: &str = "__serialize";
pub const PARSE_VALUE: &str = "__parseValue";

/// Resolves the value of one field.
#[async_trait]
pub trait FieldResolver: Send + Sync {
    async fn resolve(
        &self,
        parent: &ExternalObject,
        args: &Object,
        context: &Context,
        info: &ResolveInfo,
    ) -> Result<Resolved, graphql::Error>;
}

/// A stream of root values, one per subscription event.
pub type EventStream = BoxStream<'static, ExternalObject>;

/// Produces the event stream of a subscription root field.
#[async_trait]
pub trait SubscriptionResolver: Send + Sync {
    async fn subscribe(
        &self,
        parent: &ExternalObject,
        args: &Object,
        context: &Context,
        info: &ResolveInfo,
    ) -> Result<EventStream, graphql::Error>;
}

/// Determines the concrete object type of a value of an abstract type.
pub trait TypeResolver: Send + Sync {
    fn resolve_type(&self, value: &ExternalObject, context: &Context, abstract_type: &Name)
    -> Option<Name>;
}

impl<F> TypeResolver for F
where
    F: Fn(&ExternalObject, &Context, &Name) -> Option<Name> + Send + Sync,
{
    fn resolve_type(
        &self,
        value: &ExternalObject,
        context: &Context,
        abstract_type: &Name,
    ) -> Option<Name> {
        self(value, context, abstract_type)
    }
}

struct FnResolver<F>(F);

#[async_trait]
impl<F> FieldResolver for FnResolver<F>
where
    F: Fn(&ExternalObject, &Object, &Context, &ResolveInfo) -> Result<Resolved, graphql::Error>
        + Send
        + Sync,
{
    async fn resolve(
        &self,
        parent: &ExternalObject,
        args: &Object,
        context: &Context,
        info: &ResolveInfo,
    ) -> Result<Resolved, graphql::Error> {
        (self.0)(parent, args, context, info)
    }
}

/// Wraps a synchronous closure into a [`FieldResolver`].
pub fn resolver_fn<F>(resolve: F) -> Arc<dyn FieldResolver>
where
    F: Fn(&ExternalObject, &Object, &Context, &ResolveInfo) -> Result<Resolved, graphql::Error>
        + Send
        + Sync
        + 'static,
{
    Arc::new(FnResolver(resolve))
}

struct AsyncFnResolver<F>(F);

#[async_trait]
impl<F, Fut> FieldResolver for AsyncFnResolver<F>
where
    F: Fn(ExternalObject, Object, Context, ResolveInfo) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Resolved, graphql::Error>> + Send + 'static,
{
    async fn resolve(
        &self,
        parent: &ExternalObject,
        args: &Object,
        context: &Context,
        info: &ResolveInfo,
    ) -> Result<Resolved, graphql::Error> {
        (self.0)(parent.clone(), args.clone(), context.clone(), info.clone()).await
    }
}

/// Wraps an asynchronous closure into a [`FieldResolver`]. The closure receives owned copies
/// of its inputs so that the future it returns may outlive the call.
pub fn async_resolver_fn<F, Fut>(resolve: F) -> Arc<dyn FieldResolver>
where
    F: Fn(ExternalObject, Object, Context, ResolveInfo) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Resolved, graphql::Error>> + Send + 'static,
{
    Arc::new(AsyncFnResolver(resolve))
}

struct FnSubscriber<F>(F);

#[async_trait]
impl<F> SubscriptionResolver for FnSubscriber<F>
where
    F: Fn(&Object, &Context) -> Result<EventStream, graphql::Error> + Send + Sync,
{
    async fn subscribe(
        &self,
        _parent: &ExternalObject,
        args: &Object,
        context: &Context,
        _info: &ResolveInfo,
    ) -> Result<EventStream, graphql::Error> {
        (self.0)(args, context)
    }
}

/// Wraps a closure returning an event stream into a [`SubscriptionResolver`].
pub fn subscriber_fn<F>(subscribe: F) -> Arc<dyn SubscriptionResolver>
where
    F: Fn(&Object, &Context) -> Result<EventStream, graphql::Error> + Send + Sync + 'static,
{
    Arc::new(FnSubscriber(subscribe))
}

/// Reads the field from the parent object, the way GraphQL resolves fields by default.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultFieldResolver;

#[async_trait]
impl FieldResolver for DefaultFieldResolver {
    async fn resolve(
        &self,
        parent: &ExternalObject,
        _args: &Object,
        _context: &Context,
        info: &ResolveInfo,
    ) -> Result<Resolved, graphql::Error> {
        Ok(parent
            .data
            .get(info.field_name.as_str())
            .cloned()
            .map(Resolved::Value)
            .unwrap_or_else(Resolved::null))
    }
}

/// The behaviour of one field.
#[derive(Clone, Default)]
pub struct FieldConfig {
    pub resolve: Option<Arc<dyn FieldResolver>>,
    pub subscribe: Option<Arc<dyn SubscriptionResolver>>,
    /// Fields of the parent type this resolver reads, such as `{ id }`. They are added to
    /// requests delegated for the parent type.
    pub selection_set: Option<String>,
}

#[buildstructor::buildstructor]
impl FieldConfig {
    #[builder]
    pub fn new(
        resolve: Option<Arc<dyn FieldResolver>>,
        subscribe: Option<Arc<dyn SubscriptionResolver>>,
        selection_set: Option<String>,
    ) -> Self {
        Self {
            resolve,
            subscribe,
            selection_set,
        }
    }
}

impl From<Arc<dyn FieldResolver>> for FieldConfig {
    fn from(resolve: Arc<dyn FieldResolver>) -> Self {
        Self {
            resolve: Some(resolve),
            ..Default::default()
        }
    }
}

/// One entry of a resolver map.
#[derive(Clone)]
pub enum ResolverEntry {
    Field(FieldConfig),
    ResolveType(Arc<dyn TypeResolver>),
    Scalar(Arc<dyn ScalarCoercion>),
}

/// Resolvers keyed by type name, then by field name or meta key.
#[derive(Clone, Default)]
pub struct ResolverMap {
    fields: IndexMap<Name, IndexMap<Name, FieldConfig>>,
    type_resolvers: IndexMap<Name, Arc<dyn TypeResolver>>,
    scalars: IndexMap<Name, Arc<dyn ScalarCoercion>>,
    default_resolver: Option<Arc<dyn FieldResolver>>,
}

impl ResolverMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entry. Keys starting with `__` assign the entry to the type itself and must
    /// carry the matching kind of entry.
    pub fn insert(
        &mut self,
        type_name: &str,
        key: &str,
        entry: ResolverEntry,
    ) -> Result<(), StitchingError> {
        let invalid = |message: &str| StitchingError::InvalidResolver {
            type_name: type_name.to_string(),
            key: key.to_string(),
            message: message.to_string(),
        };
        let type_name =
            Name::new(type_name).map_err(|_| invalid("type name is not a valid GraphQL name"))?;
        match (key, entry) {
            (RESOLVE_TYPE, ResolverEntry::ResolveType(resolver)) => {
                self.type_resolvers.insert(type_name, resolver);
            }
            (SERIALIZE | PARSE_VALUE, ResolverEntry::Scalar(coercion)) => {
                self.scalars.insert(type_name, coercion);
            }
            (RESOLVE_TYPE | SERIALIZE | PARSE_VALUE, _) => {
                return Err(invalid("meta key does not accept this kind of resolver"));
            }
            (key, _) if key.starts_with("__") => {
                return Err(invalid("unknown meta key"));
            }
            (key, ResolverEntry::Field(config)) => {
                let field_name =
                    Name::new(key).map_err(|_| invalid("field name is not a valid GraphQL name"))?;
                self.fields
                    .entry(type_name)
                    .or_default()
                    .insert(field_name, config);
            }
            (_, _) => {
                return Err(invalid("a field only accepts a field resolver"));
            }
        }
        Ok(())
    }

    pub fn with_field(mut self, type_name: Name, field_name: Name, config: impl Into<FieldConfig>) -> Self {
        self.fields
            .entry(type_name)
            .or_default()
            .insert(field_name, config.into());
        self
    }

    pub fn with_resolver(
        self,
        type_name: Name,
        field_name: Name,
        resolver: Arc<dyn FieldResolver>,
    ) -> Self {
        self.with_field(type_name, field_name, resolver)
    }

    pub fn with_type_resolver(mut self, type_name: Name, resolver: Arc<dyn TypeResolver>) -> Self {
        self.type_resolvers.insert(type_name, resolver);
        self
    }

    pub fn with_scalar(mut self, type_name: Name, coercion: Arc<dyn ScalarCoercion>) -> Self {
        self.scalars.insert(type_name, coercion);
        self
    }

    /// The resolver used for fields without one.
    pub fn with_default_resolver(mut self, resolver: Arc<dyn FieldResolver>) -> Self {
        self.default_resolver = Some(resolver);
        self
    }

    /// Adds every entry of `other`, replacing entries for the same keys.
    pub fn extend(&mut self, other: ResolverMap) {
        for (type_name, fields) in other.fields {
            self.fields.entry(type_name).or_default().extend(fields);
        }
        self.type_resolvers.extend(other.type_resolvers);
        self.scalars.extend(other.scalars);
        if other.default_resolver.is_some() {
            self.default_resolver = other.default_resolver;
        }
    }

    pub fn field_config(&self, type_name: &str, field_name: &str) -> Option<&FieldConfig> {
        self.fields.get(type_name)?.get(field_name)
    }

    pub(crate) fn fields(&self) -> impl Iterator<Item = (&Name, &Name, &FieldConfig)> {
        self.fields.iter().flat_map(|(type_name, fields)| {
            fields
                .iter()
                .map(move |(field_name, config)| (type_name, field_name, config))
        })
    }

    pub(crate) fn field_resolver(&self, type_name: &str, field_name: &str) -> Arc<dyn FieldResolver> {
        self.field_config(type_name, field_name)
            .and_then(|config| config.resolve.clone())
            .or_else(|| self.default_resolver.clone())
            .unwrap_or_else(|| Arc::new(DefaultFieldResolver))
    }

    pub(crate) fn type_resolver(&self, type_name: &str) -> Option<&Arc<dyn TypeResolver>> {
        self.type_resolvers.get(type_name)
    }

    pub(crate) fn type_resolver_names(&self) -> impl Iterator<Item = &Name> {
        self.type_resolvers.keys()
    }

    pub(crate) fn scalar_names(&self) -> impl Iterator<Item = &Name> {
        self.scalars.keys()
    }

    /// The coercion for scalar `type_name`: a registered one, a built-in one, or identity.
    pub fn scalar(&self, type_name: &str) -> Arc<dyn ScalarCoercion> {
        self.scalars
            .get(type_name)
            .cloned()
            .or_else(|| scalars::built_in(type_name))
            .unwrap_or_else(|| Arc::new(scalars::Identity))
    }
}
