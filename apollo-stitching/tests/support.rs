use std::sync::Arc;

use apollo_stitching::Context;
use apollo_stitching::ExecutableSchema;
use apollo_stitching::ResolverMap;
use apollo_stitching::SchemaSource;
use apollo_stitching::Subschema;
use apollo_stitching::SubschemaConfig;
use apollo_stitching::graphql;
use apollo_stitching::json_ext::Object;
use apollo_stitching::json_ext::Value;
use apollo_stitching::merge_schemas;
use apollo_stitching::MergeSchemasOptions;
use parking_lot::Mutex;

/// Arguments received by a resolver, one entry per call.
#[derive(Clone, Default)]
pub(crate) struct Calls(Arc<Mutex<Vec<Value>>>);

impl Calls {
    pub(crate) fn record(&self, value: Value) {
        self.0.lock().push(value);
    }

    pub(crate) fn recorded(&self) -> Vec<Value> {
        self.0.lock().clone()
    }
}

pub(crate) fn local(name: &str, type_defs: &str, resolvers: ResolverMap) -> SubschemaConfig {
    SubschemaConfig::local(
        name,
        ExecutableSchema::parse(type_defs, resolvers).unwrap(),
    )
}

pub(crate) fn stitch(sources: Vec<SchemaSource>) -> ExecutableSchema {
    merge_schemas(MergeSchemasOptions::builder().sources(sources).build()).unwrap()
}

pub(crate) fn stitch_subschemas(subschemas: &[Arc<Subschema>]) -> ExecutableSchema {
    stitch(subschemas.iter().cloned().map(SchemaSource::from).collect())
}

pub(crate) async fn execute(schema: &ExecutableSchema, query: &str) -> graphql::Response {
    execute_with_variables(schema, query, Object::new()).await
}

pub(crate) async fn execute_with_variables(
    schema: &ExecutableSchema,
    query: &str,
    variables: Object,
) -> graphql::Response {
    schema
        .execute(
            graphql::Request::builder()
                .query(query)
                .variables(variables)
                .build(),
            &Context::new(),
        )
        .await
}

pub(crate) fn object(value: Value) -> Object {
    value.as_object().cloned().unwrap()
}
