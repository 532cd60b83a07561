use apollo_compiler::name;
use apollo_stitching::ExecutableSchema;
use apollo_stitching::ResolverMap;
use apollo_stitching::SubschemaConfig;
use apollo_stitching::execution::FieldConfig;
use apollo_stitching::execution::Resolved;
use apollo_stitching::execution::resolver_fn;
use apollo_stitching::json_ext::Value;
use apollo_stitching::transforms::ExtendSchema;
use apollo_stitching::transforms::FilterObjectFields;
use apollo_stitching::transforms::RenameRootFields;
use apollo_stitching::transforms::RenameTypes;
use apollo_stitching::transforms::WrapFields;
use pretty_assertions::assert_eq;
use serde_json_bytes::json;
use test_log::test;

use crate::support::execute;
use crate::support::stitch_subschemas;

const ACCOUNTS: &str = r#"
    type Query { account: Account }
    type Account { id: ID! name: String secret: String kind: Kind }
    enum Kind { ADMIN MEMBER }
"#;

fn accounts() -> ExecutableSchema {
    ExecutableSchema::parse(
        ACCOUNTS,
        ResolverMap::new().with_resolver(
            name!("Query"),
            name!("account"),
            resolver_fn(|_, _, _, _| {
                Ok(Resolved::Value(json!({
                    "id": "1",
                    "name": "Ada",
                    "secret": "hunter2",
                    "kind": "ADMIN"
                })))
            }),
        ),
    )
    .unwrap()
}

fn without_typename(mut value: Value) -> Value {
    if let Some(account) = value
        .as_object_mut()
        .and_then(|data| data.get_mut("account"))
        .and_then(Value::as_object_mut)
    {
        account.remove("__typename");
    }
    value
}

#[test(tokio::test)]
async fn renamed_types_return_the_original_data() {
    let subschema = SubschemaConfig::local("accounts", accounts())
        .with_transform(RenameTypes::new(|name| Some(format!("Acc_{name}"))))
        .build()
        .unwrap();
    let stitched = stitch_subschemas(&[subschema]);
    assert!(stitched.schema().get_object("Acc_Account").is_some());
    assert!(stitched.schema().get_object("Account").is_none());

    let renamed = execute(
        &stitched,
        "{ account { __typename id kind ... on Acc_Account { name } } }",
    )
    .await;
    let original = execute(
        &accounts(),
        "{ account { __typename id kind ... on Account { name } } }",
    )
    .await;

    assert_eq!(renamed.errors, vec![]);
    assert_eq!(
        renamed.data.as_ref().and_then(|data| data.get("account")?.get("__typename")),
        Some(&Value::from("Acc_Account"))
    );
    assert_eq!(
        renamed.data.map(without_typename),
        original.data.map(without_typename)
    );
}

#[test(tokio::test)]
async fn renamed_root_fields_are_delegated_under_their_original_name() {
    let subschema = SubschemaConfig::local("accounts", accounts())
        .with_transform(RenameRootFields::new(|_, name, _| {
            Some(format!("accounts_{name}"))
        }))
        .build()
        .unwrap();
    let stitched = stitch_subschemas(&[subschema]);

    let response = execute(&stitched, "{ accounts_account { name } }").await;

    assert_eq!(response.errors, vec![]);
    assert_eq!(
        response.data,
        Some(json!({ "accounts_account": { "name": "Ada" } }))
    );
}

#[test(tokio::test)]
async fn filtered_fields_are_unknown_to_clients() {
    let subschema = SubschemaConfig::local("accounts", accounts())
        .with_transform(FilterObjectFields::new(|type_name, field_name, _| {
            !(type_name == "Account" && field_name == "secret")
        }))
        .build()
        .unwrap();
    let stitched = stitch_subschemas(&[subschema]);

    let response = execute(&stitched, "{ account { name secret } }").await;

    assert_eq!(response.data, None);
    assert_eq!(response.errors.len(), 1);
    assert!(response.errors[0].message.contains("secret"));
    assert!(response.errors[0].message.contains("Account"));
}

#[test(tokio::test)]
async fn wrapped_fields_keep_their_values() {
    let widgets = ExecutableSchema::parse(
        "type Query { widget: Widget } type Widget { a: String b: String c: String }",
        ResolverMap::new().with_resolver(
            name!("Query"),
            name!("widget"),
            resolver_fn(|_, _, _, _| Ok(Resolved::Value(json!({ "a": "A", "b": "B", "c": "C" })))),
        ),
    )
    .unwrap();
    let subschema = SubschemaConfig::local("widgets", widgets.clone())
        .with_transform(WrapFields::new(
            name!("Widget"),
            [name!("a"), name!("b")],
            name!("Inner"),
            name!("inner"),
        ))
        .build()
        .unwrap();
    let stitched = stitch_subschemas(&[subschema]);

    let wrapped = execute(&stitched, "{ widget { inner { a } } }").await;
    let unwrapped = execute(&widgets, "{ widget { a } }").await;

    assert_eq!(wrapped.errors, vec![]);
    assert_eq!(wrapped.data, Some(json!({ "widget": { "inner": { "a": "A" } } })));
    assert_eq!(
        wrapped
            .data
            .as_ref()
            .and_then(|data| data.get("widget")?.get("inner")?.get("a")),
        unwrapped
            .data
            .as_ref()
            .and_then(|data| data.get("widget")?.get("a"))
    );
}

#[test(tokio::test)]
async fn extension_fields_resolve_from_their_requirements() {
    let subschema = SubschemaConfig::local("accounts", accounts())
        .with_transform(
            ExtendSchema::new("extend type Account { greeting: String }").with_field(
                name!("Account"),
                name!("greeting"),
                FieldConfig::builder()
                    .resolve(resolver_fn(|parent, _, _, _| {
                        let name = parent
                            .data
                            .get("name")
                            .and_then(Value::as_str)
                            .unwrap_or("stranger");
                        Ok(Resolved::Value(Value::from(format!("Hello, {name}"))))
                    }))
                    .selection_set("{ name }")
                    .build(),
            ),
        )
        .build()
        .unwrap();
    let stitched = stitch_subschemas(&[subschema]);

    let response = execute(&stitched, "{ account { greeting } }").await;

    assert_eq!(response.errors, vec![]);
    assert_eq!(
        response.data,
        Some(json!({ "account": { "greeting": "Hello, Ada" } }))
    );
}
