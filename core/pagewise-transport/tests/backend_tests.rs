use pagewise_transport::{
    BackendKind, DataTransport, HttpMethod, HttpRequest, MessageFormat, Transport, TransportConfig,
    TransportError, TransportFactory,
};
use pretty_assertions::assert_eq;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use wiremock::matchers::{body_json, body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Item {
    id: i64,
    name: String,
}

fn transport(kind: BackendKind, server: &MockServer) -> Transport {
    TransportFactory::create(kind, TransportConfig::new(server.uri())).unwrap()
}

fn item(id: i64, name: &str) -> Item {
    Item {
        id,
        name: name.to_string(),
    }
}

// ── Async operations, every backend ─────────────────────────────

#[tokio::test]
async fn get_single_json_on_every_backend() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/Items(1)"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": 1,
            "name": "first"
        })))
        .expect(4)
        .mount(&server)
        .await;

    for kind in BackendKind::ALL {
        let transport = transport(kind, &server);
        let got: Item = transport.get_single("/Items(1)").await.unwrap();
        assert_eq!(got, item(1, "first"), "backend {kind}");
    }
}

#[tokio::test]
async fn get_list_json_on_every_backend() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/Items"))
        .and(query_param("$top", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            { "id": 1, "name": "a" },
            { "id": 2, "name": "b" }
        ])))
        .mount(&server)
        .await;

    for kind in BackendKind::ALL {
        let transport = transport(kind, &server);
        let got: Vec<Item> = transport.get_list("Items?$top=2").await.unwrap();
        assert_eq!(got, vec![item(1, "a"), item(2, "b")], "backend {kind}");
    }
}

#[tokio::test]
async fn get_list_xml_is_sniffed_on_every_backend() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/Items"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            "<ArrayOfItem><Item><id>5</id><name>x</name></Item><Item><id>6</id><name>y</name></Item></ArrayOfItem>",
            "application/xml",
        ))
        .mount(&server)
        .await;

    for kind in BackendKind::ALL {
        let transport = transport(kind, &server);
        let got: Vec<Item> = transport.get_list("Items").await.unwrap();
        assert_eq!(got, vec![item(5, "x"), item(6, "y")], "backend {kind}");
    }
}

#[tokio::test]
async fn get_single_string_from_xml() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/Version"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            r#"<string xmlns="http://schemas.microsoft.com/2003/10/Serialization/">2.4 &amp; up</string>"#,
            "application/xml",
        ))
        .mount(&server)
        .await;

    for kind in BackendKind::ALL {
        let transport = transport(kind, &server);
        let got: String = transport.get_single("Version").await.unwrap();
        assert_eq!(got, "2.4 & up", "backend {kind}");
    }
}

#[tokio::test]
async fn post_with_body_sends_json_on_every_backend() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/Items"))
        .and(header("content-type", "application/json; charset=utf-8"))
        .and(body_json(serde_json::json!({ "id": 9, "name": "new" })))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
            "id": 9,
            "name": "new"
        })))
        .expect(4)
        .mount(&server)
        .await;

    for kind in BackendKind::ALL {
        let transport = transport(kind, &server);
        let echoed: Item = transport
            .post_with_body("Items", &item(9, "new"), None)
            .await
            .unwrap();
        assert_eq!(echoed, item(9, "new"), "backend {kind}");
    }
}

#[tokio::test]
async fn post_with_body_xml_carries_namespace() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/Items"))
        .and(header("content-type", "application/xml; charset=utf-8"))
        .and(body_string_contains(r#"<Item xmlns="urn:override">"#))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": 3,
            "name": "xml"
        })))
        .expect(4)
        .mount(&server)
        .await;

    for kind in BackendKind::ALL {
        let config = TransportConfig::new(server.uri())
            .with_format(MessageFormat::Xml)
            .with_namespace("urn:default");
        let transport = TransportFactory::create(kind, config).unwrap();
        let echoed: Item = transport
            .post_with_body("Items", &item(3, "xml"), Some("urn:override"))
            .await
            .unwrap();
        assert_eq!(echoed.id, 3, "backend {kind}");
    }
}

#[tokio::test]
async fn post_empty_and_post_single() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/Reset"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/Next"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": 11,
            "name": "next"
        })))
        .mount(&server)
        .await;

    for kind in BackendKind::ALL {
        let transport = transport(kind, &server);
        transport.post_empty("Reset").await.unwrap();
        let next: Item = transport.post_single("Next").await.unwrap();
        assert_eq!(next.id, 11, "backend {kind}");
    }
}

// ── Failures ────────────────────────────────────────────────────

#[tokio::test]
async fn non_success_status_surfaces_status_and_body() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/Items(404)"))
        .respond_with(ResponseTemplate::new(404).set_body_string("no such item"))
        .mount(&server)
        .await;

    for kind in BackendKind::ALL {
        let transport = transport(kind, &server);
        let err = transport.get_single::<Item>("Items(404)").await.unwrap_err();
        match err {
            TransportError::Status { status, body } => {
                assert_eq!(status, 404, "backend {kind}");
                assert_eq!(body, "no such item");
            }
            other => panic!("backend {kind}: expected status error, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn exchange_returns_non_success_responses() {
    let server = MockServer::start().await;

    Mock::given(method("PATCH"))
        .and(path("/Items(1)"))
        .respond_with(ResponseTemplate::new(412).insert_header("ETag", "W/\"9\""))
        .mount(&server)
        .await;

    let transport = transport(BackendKind::Buffered, &server);
    let request = HttpRequest::new(HttpMethod::Patch, transport.resolve("Items(1)"));
    let response = transport.exchange(request).await.unwrap();
    assert_eq!(response.status, 412);
    assert_eq!(response.header("etag"), Some("W/\"9\""));
}

#[tokio::test]
async fn undecodable_body_is_a_deserialize_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/Items(1)"))
        .respond_with(ResponseTemplate::new(200).set_body_string("definitely not a payload"))
        .mount(&server)
        .await;

    for kind in BackendKind::ALL {
        let transport = transport(kind, &server);
        let err = transport.get_single::<Item>("Items(1)").await.unwrap_err();
        assert!(
            matches!(err, TransportError::Deserialize(_)),
            "backend {kind}: {err:?}"
        );
    }
}

#[tokio::test]
async fn unreachable_host_is_a_flattened_network_error() {
    for kind in BackendKind::ALL {
        let transport =
            TransportFactory::create(kind, TransportConfig::new("http://127.0.0.1:1")).unwrap();
        let err = transport.get_single::<Item>("Items").await.unwrap_err();
        assert!(
            matches!(err, TransportError::Network(ref msg) if !msg.is_empty()),
            "backend {kind}: {err:?}"
        );
    }
}

#[tokio::test]
async fn slow_server_hits_timeout() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/Slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
        .mount(&server)
        .await;

    let mut config = TransportConfig::new(server.uri());
    config.timeout_secs = 1;
    let transport = TransportFactory::create(BackendKind::Buffered, config).unwrap();
    let err = transport.get_single::<Item>("Slow").await.unwrap_err();
    assert!(matches!(err, TransportError::Timeout(1)), "{err:?}");
}

// ── Cancellation ────────────────────────────────────────────────

#[tokio::test]
async fn cancelled_transport_never_touches_network() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
        .expect(0)
        .mount(&server)
        .await;

    for kind in BackendKind::ALL {
        let transport = transport(kind, &server);
        transport.cancel();
        assert!(transport.cancellation().is_cancelled());
        let err = transport.get_list::<Item>("Items").await.unwrap_err();
        assert!(err.is_cancelled(), "backend {kind}: {err:?}");
    }
}

#[tokio::test]
async fn cancel_interrupts_in_flight_call() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/Slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
        .mount(&server)
        .await;

    let transport = transport(BackendKind::Buffered, &server);
    let scope = transport.cancellation().clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        scope.cancel();
    });

    let err = transport.get_single::<Item>("Slow").await.unwrap_err();
    assert!(err.is_cancelled(), "{err:?}");
}

// ── Blocking variants ───────────────────────────────────────────

#[test]
fn blocking_variants_on_every_backend() {
    let setup = tokio::runtime::Runtime::new().unwrap();
    let server = setup.block_on(async {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/Items(2)"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": 2,
                "name": "two"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/Items"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                { "id": 2, "name": "two" }
            ])))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/Items"))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "id": 8,
                "name": "made"
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/Ping"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;
        server
    });

    for kind in BackendKind::ALL {
        let transport = transport(kind, &server);

        let single: Item = transport.get_single_blocking("Items(2)").unwrap();
        assert_eq!(single, item(2, "two"), "backend {kind}");

        let list: Vec<Item> = transport.get_list_blocking("Items").unwrap();
        assert_eq!(list.len(), 1);

        transport.post_empty_blocking("Ping").unwrap();

        let made: Item = transport
            .post_with_body_blocking("Items", &item(8, "made"), None)
            .unwrap();
        assert_eq!(made.id, 8);

        let posted: Item = transport.post_single_blocking("Items").unwrap();
        assert_eq!(posted.name, "made");
    }

    drop(server);
}

#[tokio::test]
async fn blocking_variant_inside_runtime_is_rejected() {
    let transport =
        TransportFactory::create(BackendKind::Buffered, TransportConfig::new("http://127.0.0.1:1"))
            .unwrap();
    let err = transport.get_single_blocking::<Item>("Items").unwrap_err();
    assert!(matches!(err, TransportError::Precondition(_)), "{err:?}");
}
