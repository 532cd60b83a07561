use apollo_compiler::name;
use apollo_stitching::Context;
use apollo_stitching::PubSub;
use apollo_stitching::ResolverMap;
use apollo_stitching::execution::ExternalObject;
use apollo_stitching::execution::FieldConfig;
use apollo_stitching::execution::subscriber_fn;
use apollo_stitching::graphql;
use futures::StreamExt;
use pretty_assertions::assert_eq;
use serde_json_bytes::json;
use test_log::test;

use crate::support::local;
use crate::support::object;
use crate::support::stitch_subschemas;

const MESSAGES: &str = r#"
    type Query { ping: String }
    type Subscription { messageAdded: Message }
    type Message { id: ID! text: String }
"#;

fn messages(pubsub: &PubSub) -> ResolverMap {
    let pubsub = pubsub.clone();
    ResolverMap::new().with_field(
        name!("Subscription"),
        name!("messageAdded"),
        FieldConfig::builder()
            .subscribe(subscriber_fn(move |_, _| {
                Ok(pubsub
                    .subscribe("MESSAGE_ADDED")
                    .map(|message| ExternalObject::new(object(json!({ "messageAdded": message }))))
                    .boxed())
            }))
            .build(),
    )
}

#[test(tokio::test)]
async fn every_subscriber_receives_every_event_once() {
    let pubsub = PubSub::new();
    let subschema = local("messages", MESSAGES, messages(&pubsub)).build().unwrap();
    let stitched = stitch_subschemas(&[subschema]);
    let request = || {
        graphql::Request::builder()
            .query("subscription { messageAdded { text } }")
            .build()
    };

    let mut first = stitched.subscribe(request(), &Context::new()).await.unwrap();
    let mut second = stitched.subscribe(request(), &Context::new()).await.unwrap();
    assert_eq!(pubsub.listener_count("MESSAGE_ADDED"), 2);

    assert_eq!(
        pubsub.publish("MESSAGE_ADDED", json!({ "id": "1", "text": "hello" })),
        2
    );
    assert_eq!(
        pubsub.publish("MESSAGE_ADDED", json!({ "id": "2", "text": "again" })),
        2
    );

    for stream in [&mut first, &mut second] {
        let hello = stream.next().await.unwrap();
        assert_eq!(hello.errors, vec![]);
        assert_eq!(hello.data, Some(json!({ "messageAdded": { "text": "hello" } })));
        let again = stream.next().await.unwrap();
        assert_eq!(again.data, Some(json!({ "messageAdded": { "text": "again" } })));
    }

    drop(first);
    assert_eq!(pubsub.listener_count("MESSAGE_ADDED"), 1);
    drop(second);
    assert_eq!(pubsub.listener_count("MESSAGE_ADDED"), 0);
}

#[test(tokio::test)]
async fn queries_are_rejected_by_subscribe() {
    let pubsub = PubSub::new();
    let subschema = local("messages", MESSAGES, messages(&pubsub)).build().unwrap();
    let stitched = stitch_subschemas(&[subschema]);

    let rejected = stitched
        .subscribe(
            graphql::Request::builder().query("{ ping }").build(),
            &Context::new(),
        )
        .await;

    assert!(rejected.is_err());
    assert_eq!(pubsub.listener_count("MESSAGE_ADDED"), 0);
}
