use std::sync::Arc;

use apollo_compiler::name;
use apollo_stitching::Context;
use apollo_stitching::DelegateOptions;
use apollo_stitching::MergeSchemasOptions;
use apollo_stitching::ResolverMap;
use apollo_stitching::SchemaSource;
use apollo_stitching::Subschema;
use apollo_stitching::delegate_to_schema;
use apollo_stitching::execution::Resolved;
use apollo_stitching::graphql;
use apollo_stitching::execution::async_resolver_fn;
use apollo_stitching::execution::resolver_fn;
use apollo_stitching::json_ext::Path;
use apollo_stitching::json_ext::Value;
use apollo_stitching::merge_schemas;
use pretty_assertions::assert_eq;
use serde_json_bytes::json;
use test_log::test;

use crate::support::Calls;
use crate::support::execute;
use crate::support::execute_with_variables;
use crate::support::local;
use crate::support::object;
use crate::support::stitch_subschemas;

const ACCOUNTS: &str = r#"
    type Query { user(id: ID!): User users: [User] }
    type User { id: ID! name: String }
"#;

fn accounts(calls: &Calls) -> Arc<Subschema> {
    let user_calls = calls.clone();
    local(
        "accounts",
        ACCOUNTS,
        ResolverMap::new()
            .with_resolver(
                name!("Query"),
                name!("user"),
                resolver_fn(move |_, args, _, _| {
                    let id = args.get("id").cloned().unwrap_or(Value::Null);
                    user_calls.record(id.clone());
                    Ok(Resolved::Value(json!({ "id": id, "name": "Ada" })))
                }),
            )
            .with_resolver(
                name!("Query"),
                name!("users"),
                resolver_fn(|_, _, _, _| {
                    Ok(Resolved::Value(json!([
                        { "id": "1", "name": "Ada" },
                        { "id": "2", "name": "Grace" }
                    ])))
                }),
            ),
    )
    .build()
    .unwrap()
}

#[test(tokio::test)]
async fn root_fields_are_delegated_with_their_arguments() {
    let calls = Calls::default();
    let stitched = stitch_subschemas(&[accounts(&calls)]);

    let response = execute(&stitched, r#"{ user(id: "1") { name } }"#).await;

    assert_eq!(response.errors, vec![]);
    assert_eq!(response.data, Some(json!({ "user": { "name": "Ada" } })));
    assert_eq!(calls.recorded(), vec![json!("1")]);
}

#[test(tokio::test)]
async fn variables_are_forwarded() {
    let calls = Calls::default();
    let stitched = stitch_subschemas(&[accounts(&calls)]);

    let response = execute_with_variables(
        &stitched,
        r#"query User($id: ID!) { user(id: $id) { name } }"#,
        object(json!({ "id": "7" })),
    )
    .await;

    assert_eq!(response.errors, vec![]);
    assert_eq!(calls.recorded(), vec![json!("7")]);
}

#[test(tokio::test)]
async fn aliases_and_lists_are_preserved() {
    let stitched = stitch_subschemas(&[accounts(&Calls::default())]);

    let response = execute(
        &stitched,
        r#"{ people: users { handle: name } first: user(id: "1") { id } }"#,
    )
    .await;

    assert_eq!(response.errors, vec![]);
    assert_eq!(
        response.data,
        Some(json!({
            "people": [{ "handle": "Ada" }, { "handle": "Grace" }],
            "first": { "id": "1" }
        }))
    );
}

#[test(tokio::test)]
async fn resolvers_delegate_through_merge_info() {
    let calls = Calls::default();
    let accounts = accounts(&calls);
    let target = accounts.clone();
    let stitched = merge_schemas(
        MergeSchemasOptions::builder()
            .sources(vec![
                SchemaSource::from(accounts),
                SchemaSource::from("type Query { me: User }"),
            ])
            .resolvers(ResolverMap::new().with_resolver(
                name!("Query"),
                name!("me"),
                async_resolver_fn(move |_, _, context, info| {
                    let target = target.clone();
                    async move {
                        let Some(merge_info) = info.merge_info().cloned() else {
                            return Ok(Resolved::null());
                        };
                        let options = DelegateOptions::builder()
                            .subschema(target)
                            .field_name(name!("user"))
                            // `user` takes no locale: it is left out of the request.
                            .args(object(json!({ "id": "42", "locale": "fr" })))
                            .build();
                        Ok(merge_info.delegate_to_schema(options, &context, &info).await)
                    }
                }),
            ))
            .build(),
    )
    .unwrap();

    let response = execute(&stitched, "{ me { id name } }").await;

    assert_eq!(response.errors, vec![]);
    assert_eq!(
        response.data,
        Some(json!({ "me": { "id": "42", "name": "Ada" } }))
    );
    assert_eq!(calls.recorded(), vec![json!("42")]);
}

#[test(tokio::test)]
async fn missing_subschema_field_is_a_field_error() {
    let accounts = accounts(&Calls::default());
    let target = accounts.clone();
    let stitched = merge_schemas(
        MergeSchemasOptions::builder()
            .sources(vec![
                SchemaSource::from(accounts),
                SchemaSource::from("extend type Query { ghost: User }"),
            ])
            .resolvers(ResolverMap::new().with_resolver(
                name!("Query"),
                name!("ghost"),
                async_resolver_fn(move |_, _, context, info| {
                    let target = target.clone();
                    async move {
                        let options = DelegateOptions::builder()
                            .subschema(target)
                            .field_name(name!("ghost"))
                            .build();
                        Ok(delegate_to_schema(options, &context, &info).await)
                    }
                }),
            ))
            .build(),
    )
    .unwrap();

    let response = execute(&stitched, r#"{ ghost { id } user(id: "1") { name } }"#).await;

    assert_eq!(
        response.data,
        Some(json!({ "ghost": null, "user": { "name": "Ada" } }))
    );
    assert_eq!(response.errors.len(), 1);
    assert_eq!(
        response.errors[0].extension_code().as_deref(),
        Some("NO_MATCHING_SUBSCHEMA_FIELD")
    );
    assert_eq!(
        response.errors[0].path,
        Some(Path::from("ghost"))
    );
}

#[test(tokio::test)]
async fn the_client_context_reaches_subschema_resolvers() {
    let viewer = local(
        "viewer",
        "type Query { greeting: String }",
        ResolverMap::new().with_resolver(
            name!("Query"),
            name!("greeting"),
            resolver_fn(|_, _, context, _| {
                let name: Option<String> = context.get("viewer").map_err(|error| {
                    graphql::Error::builder().message(error.to_string()).build()
                })?;
                let _ = context.insert("greeted", true);
                let greeting = format!("Hello, {}", name.unwrap_or_default());
                Ok(Resolved::Value(Value::from(greeting)))
            }),
        ),
    )
    .build()
    .unwrap();
    let stitched = stitch_subschemas(&[viewer]);
    let context = Context::new();
    context.insert("viewer", "Ada".to_string()).unwrap();

    let response = stitched
        .execute(
            graphql::Request::builder().query("{ greeting }").build(),
            &context,
        )
        .await;

    assert_eq!(response.data, Some(json!({ "greeting": "Hello, Ada" })));
    assert_eq!(context.get::<_, bool>("greeted").unwrap(), Some(true));
}
