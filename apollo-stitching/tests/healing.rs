use apollo_compiler::Schema;
use apollo_compiler::name;
use apollo_stitching::ExecutableSchema;
use apollo_stitching::ResolverMap;
use apollo_stitching::SubschemaConfig;
use apollo_stitching::schema::HealOptions;
use apollo_stitching::schema::heal_schema;
use apollo_stitching::schema::rename_type;
use apollo_stitching::transforms::FilterObjectFields;
use pretty_assertions::assert_eq;
use rstest::rstest;

const SCHEMA: &str = r#"
    type Query { node: Node user: User search: [Result] }
    interface Node { id: ID! }
    type User implements Node { id: ID! name: String }
    type Post implements Node { id: ID! author: User }
    union Result = User | Post
"#;

#[rstest]
#[case::pruned(true)]
#[case::kept(false)]
fn healing_twice_changes_nothing(#[case] prune: bool) {
    let mut schema = Schema::parse(SCHEMA, "schema.graphql").unwrap();
    let renamed = rename_type(&schema.types["User"], name!("Account"));
    schema.types.insert(name!("User"), renamed);
    schema.types.shift_remove("Post");

    heal_schema(&mut schema, HealOptions { prune }).unwrap();
    let healed = schema.serialize().to_string();
    heal_schema(&mut schema, HealOptions { prune }).unwrap();

    assert_eq!(schema.serialize().to_string(), healed);
}

#[test]
fn healing_follows_renamed_types() {
    let mut schema = Schema::parse(SCHEMA, "schema.graphql").unwrap();
    let renamed = rename_type(&schema.types["User"], name!("Account"));
    schema.types.insert(name!("User"), renamed);

    heal_schema(&mut schema, HealOptions::default()).unwrap();

    assert!(schema.types.get("User").is_none());
    let query = schema.get_object("Query").unwrap();
    assert_eq!(query.fields["user"].ty.inner_named_type().as_str(), "Account");
    let post = schema.get_object("Post").unwrap();
    assert_eq!(post.fields["author"].ty.inner_named_type().as_str(), "Account");
    assert!(schema.validate().is_ok());
}

#[test]
fn pruning_cascades_to_interfaces_left_without_implementers() {
    let executable = ExecutableSchema::parse(
        r#"
            type Query { node: Node other: String }
            interface Node { id: ID }
            type Thing implements Node { id: ID }
        "#,
        ResolverMap::new(),
    )
    .unwrap();
    let subschema = SubschemaConfig::local("things", executable)
        .with_transform(FilterObjectFields::new(|type_name, field_name, _| {
            !(type_name == "Thing" && field_name == "id")
        }))
        .build()
        .unwrap();

    let schema = subschema.schema();
    assert!(schema.types.get("Thing").is_none());
    assert!(schema.types.get("Node").is_none());
    let query = schema.get_object("Query").unwrap();
    assert!(!query.fields.contains_key("node"));
    assert!(query.fields.contains_key("other"));
}
