//! End-to-end tests against the mock transport
//!
//! Drives the client, serializers and schema manager through the same
//! protocol code used in production, with no network.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::json;

use registry_serde::{
    wire, CompatibilityType, Deserializer, Method, MockTransport, PolySerializer,
    RecordNameSchemaManager, RegistryClient, RegistryError, SchemaBody, Serializer,
};

const URL: &str = "http://registry:8081";

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct MyAppA {
    field1: i32,
    field2: String,
}

fn myapp_a() -> SchemaBody {
    SchemaBody::parse(json!({
        "type": "record",
        "name": "a",
        "namespace": "myapp",
        "fields": [
            {"name": "field1", "type": "int"},
            {"name": "field2", "type": "string"}
        ]
    }))
    .unwrap()
}

fn hello() -> MyAppA {
    MyAppA {
        field1: 42,
        field2: "Hello world".to_string(),
    }
}

fn registry(mock: &Arc<MockTransport>) -> RegistryClient {
    RegistryClient::new(URL, mock.clone())
}

// =============================================================================
// Serialization
// =============================================================================

#[tokio::test]
async fn test_record_name_round_trip() {
    let mock = Arc::new(MockTransport::new());
    mock.on(Method::Post, "/subjects/myapp.a/versions", 200, json!({"id": 7}));
    mock.on(Method::Get, "/schemas/ids/7", 200, json!({"schema": myapp_a().to_registry_string()}));

    let client = registry(&mock);
    let serializer = Serializer::new(client.clone(), myapp_a());
    assert_eq!(serializer.register().await.unwrap(), 7);

    let message = serializer.serialize(&hello()).unwrap();
    assert_eq!(message[0], 0);
    assert_eq!(wire::decode(&message).unwrap().0, 7);

    // A fresh client has to fetch the writer schema
    let reader = Deserializer::new(registry(&mock));
    let info = reader.deserialize(&message).await.unwrap();
    assert_eq!(info.id, 7);
    assert_eq!(*info.schema, myapp_a());
    let decoded: MyAppA = apache_avro::from_value(&info.message).unwrap();
    assert_eq!(decoded, hello());
    assert_eq!(mock.calls_to(Method::Get, "/schemas/ids/7"), 1);
}

#[tokio::test]
async fn test_deserialize_unknown_id() {
    let mock = Arc::new(
        MockTransport::new().with_default(404, json!({"error_code": 40403, "message": "Schema not found"})),
    );
    let reader = Deserializer::new(registry(&mock));

    let err = reader.deserialize(&wire::encode(99, b"")).await.unwrap_err();
    assert!(matches!(err, RegistryError::SchemaNotFound(_)));
}

#[tokio::test]
async fn test_poly_serializer_shares_client_cache() {
    let mock = Arc::new(MockTransport::new());
    mock.on(Method::Post, "/subjects/myapp.a/versions", 200, json!({"id": 3}));

    let client = registry(&mock);
    let poly = PolySerializer::new(client.clone());
    poly.register_schema("myapp.a", myapp_a()).await.unwrap();

    // The registration seeded the ID cache, so reading needs no request
    let message = poly.serialize(&hello(), "myapp.a").unwrap();
    let decoded: MyAppA = Deserializer::new(client).deserialize_into(&message).await.unwrap();
    assert_eq!(decoded, hello());
    assert_eq!(mock.call_count(), 1);
}

// =============================================================================
// Caching and coalescing
// =============================================================================

#[tokio::test]
async fn test_concurrent_lookups_share_one_request() {
    let mock = Arc::new(MockTransport::new().with_latency(Duration::from_millis(20)));
    mock.on(Method::Get, "/schemas/ids/1", 200, json!({"schema": myapp_a().to_registry_string()}));
    let client = registry(&mock);

    let results = join_all((0..16).map(|_| client.get_schema_by_id(1))).await;
    let bodies: Vec<_> = results.into_iter().map(Result::unwrap).collect();

    assert_eq!(mock.call_count(), 1);
    assert!(bodies.iter().all(|b| Arc::ptr_eq(b, &bodies[0])));
}

#[tokio::test]
async fn test_concurrent_registrations_share_one_request() {
    let mock = Arc::new(MockTransport::new().with_latency(Duration::from_millis(20)));
    mock.on(Method::Post, "/subjects/myapp.a/versions", 200, json!({"id": 5}));
    let client = registry(&mock);
    let body = myapp_a();

    let ids = join_all((0..8).map(|_| client.register_schema("myapp.a", &body))).await;
    assert!(ids.into_iter().all(|id| id.unwrap() == 5));
    assert_eq!(mock.call_count(), 1);
}

#[tokio::test]
async fn test_concurrent_failures_are_shared_and_not_cached() {
    let mock = Arc::new(MockTransport::new().with_latency(Duration::from_millis(20)));
    mock.on(Method::Get, "/schemas/ids/2", 404, json!({"error_code": 40403, "message": "Schema not found"}));
    let client = registry(&mock);

    let results = join_all((0..4).map(|_| client.get_schema_by_id(2))).await;
    assert!(results
        .iter()
        .all(|r| matches!(r, Err(RegistryError::SchemaNotFound(_)))));
    assert_eq!(mock.call_count(), 1);

    // Once the registry knows the ID, the next lookup succeeds
    mock.on(Method::Get, "/schemas/ids/2", 200, json!({"schema": myapp_a().to_registry_string()}));
    assert_eq!(*client.get_schema_by_id(2).await.unwrap(), myapp_a());
    assert_eq!(mock.call_count(), 2);
}

#[tokio::test]
async fn test_cancelled_waiter_does_not_cancel_lookup() {
    let mock = Arc::new(MockTransport::new().with_latency(Duration::from_millis(50)));
    mock.on(Method::Get, "/schemas/ids/1", 200, json!({"schema": myapp_a().to_registry_string()}));
    let client = registry(&mock);

    let abandoned = tokio::time::timeout(Duration::from_millis(5), client.get_schema_by_id(1)).await;
    assert!(abandoned.is_err());

    // The second caller picks up the request already in flight
    let body = client.get_schema_by_id(1).await.unwrap();
    assert_eq!(*body, myapp_a());
    assert_eq!(mock.call_count(), 1);
}

#[tokio::test]
async fn test_abandoned_lookup_still_fills_cache() {
    let mock = Arc::new(MockTransport::new().with_latency(Duration::from_millis(20)));
    mock.on(Method::Get, "/schemas/ids/1", 200, json!({"schema": myapp_a().to_registry_string()}));
    let client = registry(&mock);

    let abandoned = tokio::time::timeout(Duration::from_millis(5), client.get_schema_by_id(1)).await;
    assert!(abandoned.is_err());

    // Nobody is waiting, but the lookup runs to completion
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(*client.cached_schema(1).unwrap(), myapp_a());
    assert_eq!(mock.call_count(), 1);
}

#[tokio::test]
async fn test_changed_body_reaches_registry() {
    let mock = Arc::new(MockTransport::new());
    mock.on(Method::Post, "/subjects/myapp.a/versions", 200, json!({"id": 1}));
    let client = registry(&mock);

    client.register_schema("myapp.a", &myapp_a()).await.unwrap();

    let mut evolved = myapp_a().definition().clone();
    evolved["fields"]
        .as_array_mut()
        .unwrap()
        .push(json!({"name": "field3", "type": ["null", "string"], "default": null}));
    let evolved = SchemaBody::parse(evolved).unwrap();

    mock.on(Method::Post, "/subjects/myapp.a/versions", 200, json!({"id": 2}));
    assert_eq!(client.register_schema("myapp.a", &evolved).await.unwrap(), 2);
    assert_eq!(client.register_schema("myapp.a", &myapp_a()).await.unwrap(), 1);
    assert_eq!(mock.call_count(), 2);
}

#[tokio::test]
async fn test_added_default_reaches_registry() {
    let mock = Arc::new(MockTransport::new());
    mock.on(Method::Post, "/subjects/myapp.a/versions", 200, json!({"id": 1}));
    let client = registry(&mock);
    client.register_schema("myapp.a", &myapp_a()).await.unwrap();

    let mut evolved = myapp_a().definition().clone();
    evolved["doc"] = json!("greetings");
    evolved["fields"][1]["default"] = json!("fallback");
    let evolved = SchemaBody::parse(evolved).unwrap();

    mock.on(Method::Post, "/subjects/myapp.a/versions", 200, json!({"id": 2}));
    let serializer = Serializer::new(client, evolved);
    assert_eq!(serializer.register().await.unwrap(), 2);
    assert_eq!(mock.call_count(), 2);

    let message = serializer.serialize(&hello()).unwrap();
    assert_eq!(wire::decode(&message).unwrap().0, 2);
}

// =============================================================================
// Low-level verbs
// =============================================================================

#[tokio::test]
async fn test_every_verb_returns_body() {
    let mock = Arc::new(MockTransport::new());
    mock.on(Method::Put, "/config/myapp.a", 200, json!({"compatibility": "FULL"}));
    mock.on(Method::Patch, "/mode/myapp.a", 200, json!({"mode": "READONLY"}));
    mock.on(Method::Delete, "/subjects/myapp.a", 200, json!([1, 2, 3]));
    mock.on(Method::Post, "/subjects/myapp.a/versions", 200, json!({"id": 1}));
    mock.on(Method::Get, "/subjects", 200, json!(["myapp.a"]));
    let client = registry(&mock);
    let vars = [("subject", "myapp.a".to_string())];

    let put = client
        .put("/config{/subject}", &vars, Some(&json!({"compatibility": "FULL"})))
        .await
        .unwrap();
    assert_eq!(put, json!({"compatibility": "FULL"}));

    let patch = client
        .patch("/mode/{subject}", &vars, &json!({"mode": "READONLY"}))
        .await
        .unwrap();
    assert_eq!(patch, json!({"mode": "READONLY"}));

    let delete = client.delete("/subjects/{subject}", &vars, None).await.unwrap();
    assert_eq!(delete, json!([1, 2, 3]));

    let post = client
        .post("/subjects/{subject}/versions", &vars, &json!({"schema": "\"string\""}))
        .await
        .unwrap();
    assert_eq!(post, json!({"id": 1}));

    assert_eq!(client.get("/subjects", &[]).await.unwrap(), json!(["myapp.a"]));
}

#[tokio::test]
async fn test_subject_names_are_escaped() {
    let mock = Arc::new(MockTransport::new());
    let client = registry(&mock);

    client
        .get("/subjects/{subject}/versions", &[("subject", "my topic/value".to_string())])
        .await
        .unwrap();
    assert_eq!(
        mock.last_request().unwrap().url,
        "http://registry:8081/subjects/my%20topic%2Fvalue/versions"
    );
}

#[tokio::test]
async fn test_server_error_is_transport_failure() {
    let mock = Arc::new(
        MockTransport::new().with_default(500, json!({"error_code": 50001, "message": "Error in the backend"})),
    );
    let client = registry(&mock);

    let err = client.get_versions("myapp.a").await.unwrap_err();
    assert!(err.is_server_error());
    match err {
        RegistryError::Transport { method, error_code, message, .. } => {
            assert_eq!(method, Method::Get);
            assert_eq!(error_code, Some(50001));
            assert_eq!(message, "Error in the backend");
        }
        other => panic!("Expected Transport, got {:?}", other),
    }
}

// =============================================================================
// Record-name schema manager
// =============================================================================

#[tokio::test]
async fn test_manager_registers_suffixed_subjects() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("myapp.a.json"),
        myapp_a().definition().to_string(),
    )
    .unwrap();

    let mock = Arc::new(MockTransport::new());
    mock.on(Method::Get, "/config/myapp.a_dev1", 404, json!({"error_code": 40401, "message": "Subject not found"}));
    mock.on(Method::Put, "/config/myapp.a_dev1", 200, json!({"compatibility": "BACKWARD"}));
    mock.on(Method::Post, "/subjects/myapp.a_dev1/versions", 200, json!({"id": 12}));

    let client = registry(&mock);
    let manager = RecordNameSchemaManager::from_dir(client.clone(), dir.path(), "_dev1").unwrap();
    assert_eq!(manager.schema_names(), vec!["myapp.a_dev1".to_string()]);

    manager
        .register_schemas(Some(CompatibilityType::Backward))
        .await
        .unwrap();

    let data = json!({"field1": 42, "field2": "Hello world"});
    let message = manager.serialize(&data, "myapp.a_dev1").unwrap();
    assert_eq!(message[0], 0);
    assert_eq!(wire::decode(&message).unwrap().0, 12);

    let info = Deserializer::new(client).deserialize(&message).await.unwrap();
    assert_eq!(info.id, 12);
    assert_eq!(
        info.message,
        apache_avro::types::Value::Record(vec![
            ("field1".to_string(), apache_avro::types::Value::Int(42)),
            ("field2".to_string(), apache_avro::types::Value::String("Hello world".to_string())),
        ])
    );
    let decoded: serde_json::Value = apache_avro::from_value(&info.message).unwrap();
    assert_eq!(decoded, data);

    let overflow = json!({"field1": 4294967338i64, "field2": "Hello world"});
    assert!(matches!(
        manager.serialize(&overflow, "myapp.a_dev1"),
        Err(RegistryError::Encoding(_))
    ));

    let err = manager.serialize(&hello(), "myapp.a").unwrap_err();
    assert!(matches!(err, RegistryError::UnknownSchema { .. }));
}

#[tokio::test]
async fn test_manager_surfaces_incompatibility() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("myapp.a.json"),
        myapp_a().definition().to_string(),
    )
    .unwrap();

    let mock = Arc::new(MockTransport::new());
    mock.on(Method::Get, "/config/myapp.a", 200, json!({"compatibilityLevel": "BACKWARD"}));
    mock.on(
        Method::Post,
        "/subjects/myapp.a/versions",
        409,
        json!({"error_code": 409, "message": "Schema being registered is incompatible with an earlier schema"}),
    );

    let manager = RecordNameSchemaManager::from_dir(registry(&mock), dir.path(), "").unwrap();
    let err = manager
        .register_schemas(Some(CompatibilityType::Backward))
        .await
        .unwrap_err();

    assert!(matches!(err, RegistryError::IncompatibleSchema { ref subject, .. } if subject == "myapp.a"));
    assert_eq!(mock.calls_to(Method::Put, "/config/myapp.a"), 0);
    assert!(manager.id_of("myapp.a").is_none());
}
