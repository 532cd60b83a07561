use std::sync::Arc;

use apollo_compiler::Schema;
use apollo_compiler::name;
use apollo_stitching::BoxError;
use apollo_stitching::Configuration;
use apollo_stitching::Context;
use apollo_stitching::ExecutableSchema;
use apollo_stitching::MergeSchemasOptions;
use apollo_stitching::ResolverMap;
use apollo_stitching::SchemaSource;
use apollo_stitching::SubschemaConfig;
use apollo_stitching::execution::Resolved;
use apollo_stitching::execution::resolver_fn;
use apollo_stitching::graphql;
use apollo_stitching::json_ext::Path;
use apollo_stitching::json_ext::Value;
use apollo_stitching::merge_schemas;
use apollo_stitching::subschema::Fetcher;
use apollo_stitching::subschema::MergedTypeConfig;
use async_trait::async_trait;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serde_json_bytes::json;
use test_log::test;

use crate::support::execute;
use crate::support::local;
use crate::support::stitch_subschemas;

const PRODUCTS: &str = r#"
    type Query { product(upc: String!): Product topProducts: [Product] }
    type Product { upc: String! name: String price: Int! }
"#;

/// Answers every request with the same response, or fails.
struct CannedFetcher {
    response: Option<graphql::Response>,
    queries: Mutex<Vec<String>>,
}

impl CannedFetcher {
    fn new(response: Value) -> Self {
        Self {
            response: Some(serde_json_bytes::from_value(response).unwrap()),
            queries: Default::default(),
        }
    }

    fn failing() -> Self {
        Self {
            response: None,
            queries: Default::default(),
        }
    }
}

#[async_trait]
impl Fetcher for CannedFetcher {
    async fn fetch(
        &self,
        request: graphql::Request,
        _context: &Context,
    ) -> Result<graphql::Response, BoxError> {
        self.queries.lock().push(request.query.unwrap_or_default());
        self.response.clone().ok_or_else(|| "connection refused".into())
    }
}

fn remote(name: &str, type_defs: &str, fetcher: Arc<CannedFetcher>) -> SchemaSource {
    SubschemaConfig::remote(
        name,
        Schema::parse_and_validate(type_defs, "remote.graphql").unwrap(),
        fetcher,
    )
    .build()
    .unwrap()
    .into()
}

fn products(fetcher: Arc<CannedFetcher>) -> SchemaSource {
    remote("products", PRODUCTS, fetcher)
}

fn stitch_products(fetcher: Arc<CannedFetcher>, configuration: Configuration) -> ExecutableSchema {
    merge_schemas(
        MergeSchemasOptions::builder()
            .source(products(fetcher))
            .configuration(Arc::new(configuration))
            .build(),
    )
    .unwrap()
}

#[test(tokio::test)]
async fn non_null_errors_propagate_to_the_nearest_nullable_field_once() {
    let fetcher = Arc::new(CannedFetcher::new(json!({
        "data": { "product": null },
        "errors": [{ "message": "price unavailable", "path": ["product", "price"] }]
    })));
    let stitched = stitch_products(fetcher.clone(), Configuration::default());

    let response = execute(&stitched, r#"{ product(upc: "1") { name price } }"#).await;

    assert_eq!(response.data, Some(json!({ "product": null })));
    assert_eq!(response.errors.len(), 1);
    assert_eq!(response.errors[0].message, "price unavailable");
    assert_eq!(response.errors[0].path, Some(Path::from("product/price")));
    assert_eq!(fetcher.queries.lock().len(), 1);
}

#[test(tokio::test)]
async fn errors_below_a_null_object_reach_their_field() {
    let fetcher = Arc::new(CannedFetcher::new(json!({
        "data": { "product": null },
        "errors": [{ "message": "name exploded", "path": ["product", "name"] }]
    })));
    let stitched = stitch_products(fetcher, Configuration::default());

    let response = execute(&stitched, r#"{ product(upc: "1") { name } }"#).await;

    assert_eq!(response.data, Some(json!({ "product": { "name": null } })));
    assert_eq!(response.errors.len(), 1);
    assert_eq!(response.errors[0].message, "name exploded");
    assert_eq!(response.errors[0].path, Some(Path::from("product/name")));
}

#[test(tokio::test)]
async fn list_errors_without_an_index_are_reported_at_the_list() {
    let fetcher = Arc::new(CannedFetcher::new(json!({
        "data": { "topProducts": [{ "upc": "1", "name": "Table", "price": 10 }] },
        "errors": [{ "message": "ranking degraded", "path": ["topProducts", "name"] }]
    })));
    let stitched = stitch_products(fetcher, Configuration::default());

    let response = execute(&stitched, "{ topProducts { name } }").await;

    assert_eq!(response.data, Some(json!({ "topProducts": [{ "name": "Table" }] })));
    assert_eq!(response.errors.len(), 1);
    assert_eq!(response.errors[0].message, "ranking degraded");
    assert_eq!(response.errors[0].path, Some(Path::from("topProducts")));
}

#[test(tokio::test)]
async fn null_lists_keep_item_errors_and_report_the_others() {
    let fetcher = Arc::new(CannedFetcher::new(json!({
        "data": { "topProducts": null },
        "errors": [
            { "message": "name unavailable", "path": ["topProducts", 1, "name"] },
            { "message": "ranking degraded", "path": ["topProducts", "name"] }
        ]
    })));
    let stitched = stitch_products(fetcher, Configuration::default());

    let response = execute(&stitched, "{ topProducts { name } }").await;

    assert_eq!(
        response.data,
        Some(json!({ "topProducts": [null, { "name": null }] }))
    );
    let mut errors: Vec<(String, Option<Path>)> = response
        .errors
        .into_iter()
        .map(|error| (error.message, error.path))
        .collect();
    errors.sort_by(|a, b| a.0.cmp(&b.0));
    assert_eq!(
        errors,
        vec![
            ("name unavailable".to_string(), Some(Path::from("topProducts/1/name"))),
            ("ranking degraded".to_string(), Some(Path::from("topProducts"))),
        ]
    );
}

#[test(tokio::test)]
async fn unknown_enum_values_from_subschemas_are_field_errors() {
    let fetcher = Arc::new(CannedFetcher::new(json!({
        "data": { "light": { "color": "TEAL", "brightness": 3 } }
    })));
    let stitched = merge_schemas(
        MergeSchemasOptions::builder()
            .source(remote(
                "lights",
                "type Query { light: Light } type Light { color: Color brightness: Int } enum Color { RED GREEN }",
                fetcher,
            ))
            .build(),
    )
    .unwrap();

    let response = execute(&stitched, "{ light { color brightness } }").await;

    assert_eq!(
        response.data,
        Some(json!({ "light": { "color": null, "brightness": 3 } }))
    );
    assert_eq!(response.errors.len(), 1);
    assert!(response.errors[0].message.contains("Color"));
    assert!(response.errors[0].message.contains("TEAL"));
    assert_eq!(response.errors[0].path, Some(Path::from("light/color")));
}

#[test(tokio::test)]
async fn nullable_errors_keep_sibling_values() {
    let fetcher = Arc::new(CannedFetcher::new(json!({
        "data": { "topProducts": [
            { "upc": "1", "name": "Table", "price": 10 },
            { "upc": "2", "name": null, "price": 20 }
        ] },
        "errors": [{ "message": "name unavailable", "path": ["topProducts", 1, "name"] }]
    })));
    let stitched = stitch_products(fetcher, Configuration::default());

    let response = execute(&stitched, "{ topProducts { name price } }").await;

    assert_eq!(
        response.data,
        Some(json!({ "topProducts": [
            { "name": "Table", "price": 10 },
            { "name": null, "price": 20 }
        ] }))
    );
    assert_eq!(response.errors.len(), 1);
    assert_eq!(response.errors[0].path, Some(Path::from("topProducts/1/name")));
}

#[test(tokio::test)]
async fn failed_subrequests_are_field_errors() {
    let stitched = stitch_products(Arc::new(CannedFetcher::failing()), Configuration::default());

    let response = execute(&stitched, r#"{ product(upc: "1") { name } }"#).await;

    assert_eq!(response.data, Some(json!({ "product": null })));
    assert_eq!(response.errors.len(), 1);
    assert_eq!(
        response.errors[0].extension_code().as_deref(),
        Some("SUBREQUEST_FAILED")
    );
    assert_eq!(response.errors[0].path, Some(Path::from("product")));
}

#[test(tokio::test)]
async fn relocated_errors_name_their_subschema_when_configured() {
    let fetcher = Arc::new(CannedFetcher::new(json!({
        "data": { "product": null },
        "errors": [{ "message": "not found", "path": ["product"] }]
    })));
    let configuration = Configuration::from_yaml(
        r#"
errors:
  include_subschema_name: true
"#,
    )
    .unwrap();
    let stitched = stitch_products(fetcher, configuration);

    let response = execute(&stitched, r#"{ product(upc: "1") { name } }"#).await;

    assert_eq!(response.errors.len(), 1);
    assert_eq!(
        response.errors[0].extensions.get("service"),
        Some(&Value::from("products"))
    );
    assert_eq!(response.errors[0].path, Some(Path::from("product")));
}

#[test(tokio::test)]
async fn merge_failures_only_null_the_fields_they_were_responsible_for() {
    let accounts = local(
        "accounts",
        "type Query { user(id: ID!): User } type User { id: ID! email: String }",
        ResolverMap::new().with_resolver(
            name!("Query"),
            name!("user"),
            resolver_fn(|_, _, _, _| {
                Ok(Resolved::Value(json!({ "id": "1", "email": "ada@example.com" })))
            }),
        ),
    )
    .with_merged_type(
        name!("User"),
        MergedTypeConfig::builder()
            .selection_set("{ id }")
            .field_name(name!("user"))
            .build(),
    )
    .build()
    .unwrap();
    let reviews = local(
        "reviews",
        "type Query { userById(id: ID!): User } type User { id: ID! posts: [String] }",
        ResolverMap::new().with_resolver(
            name!("Query"),
            name!("userById"),
            resolver_fn(|_, _, _, _| {
                Err(graphql::Error::builder()
                    .message("reviews unavailable")
                    .build())
            }),
        ),
    )
    .with_merged_type(
        name!("User"),
        MergedTypeConfig::builder()
            .selection_set("{ id }")
            .field_name(name!("userById"))
            .build(),
    )
    .build()
    .unwrap();
    let stitched = stitch_subschemas(&[accounts, reviews]);

    let response = execute(&stitched, r#"{ user(id: "1") { email posts } }"#).await;

    assert_eq!(
        response.data,
        Some(json!({ "user": { "email": "ada@example.com", "posts": null } }))
    );
    assert_eq!(response.errors.len(), 1);
    assert_eq!(response.errors[0].message, "reviews unavailable");
    assert_eq!(response.errors[0].path, Some(Path::from("user/posts")));
}
