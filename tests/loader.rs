mod common;

use std::sync::Arc;

use common::{EventLog, observe_all, print_capture};
use fluxgraph::event_bus::{EventEnvelope, SchedulerEvent, names};
use fluxgraph::loader::HttpFetcher;
use fluxgraph::scheduler::{DEFAULT_VECTOR_PATH, GRAPH_PATH_ENV, Scheduler, SchedulerBuilder};
use httpmock::prelude::*;
use serde_json::{Value, json};

fn inner_graph_artifact() -> Value {
    json!({
        "id": "inner", "url": "", "version": 0, "properties": {},
        "vectors": [{
            "id": "i1", "graphId": "inner", "version": 0, "url": "",
            "edges": [], "template": {"set": "print(\"inner:\" + value);"},
            "data": null, "properties": {}
        }]
    })
}

fn outer_graph() -> fluxgraph::Graph {
    serde_json::from_value(json!({
        "id": "g1", "url": "", "version": 0, "properties": {},
        "vectors": [{
            "id": "h", "graphId": "g1", "version": 0, "url": "index",
            "edges": [], "template": {"set": ""},
            "data": null, "properties": {},
            "linkedGraph": {
                "id": "inner", "version": 0, "loaded": false,
                "data": {}, "properties": {},
                "fields": {
                    "inputs": {"input": {"id": "i1", "field": "input"}},
                    "outputs": {}
                }
            }
        }]
    }))
    .unwrap()
}

#[tokio::test]
async fn linked_graph_is_fetched_once_until_cache_clear() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/artifacts/graph/inner.0");
            then.status(200).json_body(inner_graph_artifact());
        })
        .await;

    let (hook, printed) = print_capture();
    let mut scheduler = Scheduler::builder(outer_graph())
        .fetcher(Arc::new(HttpFetcher::new()))
        .graph_path(format!(
            "{}/artifacts/graph/{{id}}.{{version}}",
            server.base_url()
        ))
        .print_hook(hook)
        .build();

    scheduler.url("index", json!("a"), "input").await;
    scheduler.url("index", json!("b"), "input").await;
    assert_eq!(mock.hits_async().await, 1);

    scheduler.graph_loader_mut().clear_cache();
    scheduler.url("index", json!("c"), "input").await;
    assert_eq!(mock.hits_async().await, 2);

    assert_eq!(
        *printed.lock(),
        vec![
            "inner:a".to_string(),
            "inner:b".to_string(),
            "inner:c".to_string()
        ]
    );
}

#[tokio::test]
async fn missing_fetch_surfaces_as_an_error_event() {
    let g: fluxgraph::Graph = serde_json::from_value(json!({
        "id": "g1", "url": "", "version": 0, "properties": {},
        "vectors": [{
            "id": "h", "graphId": "g1", "version": 0, "url": "index",
            "edges": [], "template": {"set": ""},
            "data": null, "properties": {},
            "linkedVector": {"id": "lib", "version": 0, "loaded": false}
        }]
    }))
    .unwrap();
    let mut scheduler = Scheduler::new(g);
    let log = EventLog::new();
    observe_all(&mut scheduler, &log);

    scheduler.url("index", json!("x"), "input").await;

    assert!(
        log.errors()
            .iter()
            .any(|m| m.contains("Fetch is not defined.")),
        "{:?}",
        log.errors()
    );
}

#[tokio::test]
async fn listener_override_takes_precedence_over_the_network() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/artifacts/graph/inner.0");
            then.status(200).json_body(inner_graph_artifact());
        })
        .await;

    let (hook, printed) = print_capture();
    let mut scheduler = Scheduler::builder(outer_graph())
        .fetcher(Arc::new(HttpFetcher::new()))
        .graph_path(format!(
            "{}/artifacts/graph/{{id}}.{{version}}",
            server.base_url()
        ))
        .print_hook(hook)
        .build();
    let graph_url = format!("{}/artifacts/graph/inner.0", server.base_url());
    scheduler.add_event_listener(
        names::LOAD,
        Arc::new(move |envelope: &EventEnvelope| {
            if let SchedulerEvent::Load { url, set_value } = &envelope.event
                && url == &graph_url
            {
                set_value.set(inner_graph_artifact());
            }
        }),
    );

    scheduler.url("index", json!("x"), "input").await;

    assert_eq!(mock.hits_async().await, 0);
    assert_eq!(*printed.lock(), vec!["inner:x".to_string()]);
}

#[tokio::test]
async fn linked_vector_artifact_is_fetched_over_http() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/artifacts/vectors/lib.0");
            then.status(200).json_body(json!({
                "id": "lib", "graphId": "libs", "version": 0, "url": "",
                "edges": [], "template": {"set": "print(\"lib:\" + value);"},
                "data": null, "properties": {}
            }));
        })
        .await;

    let g: fluxgraph::Graph = serde_json::from_value(json!({
        "id": "g1", "url": "", "version": 0, "properties": {},
        "vectors": [{
            "id": "h", "graphId": "g1", "version": 0, "url": "index",
            "edges": [], "template": {"set": ""},
            "data": null, "properties": {},
            "linkedVector": {"id": "lib", "version": 0, "loaded": false}
        }]
    }))
    .unwrap();
    let (hook, printed) = print_capture();
    let mut scheduler = Scheduler::builder(g)
        .fetcher(Arc::new(HttpFetcher::new()))
        .vector_path(format!(
            "{}/artifacts/vectors/{{id}}.{{version}}",
            server.base_url()
        ))
        .print_hook(hook)
        .build();

    scheduler.url("index", json!("v"), "input").await;
    scheduler.url("index", json!("w"), "input").await;

    // Resolved once, substituted on every subsequent invocation.
    assert_eq!(mock.hits_async().await, 1);
    assert_eq!(
        *printed.lock(),
        vec!["lib:v".to_string(), "lib:w".to_string()]
    );
}

#[tokio::test]
async fn fetch_failure_is_contained_as_an_error_event() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/artifacts/graph/inner.0");
            then.status(404);
        })
        .await;

    let mut scheduler = Scheduler::builder(outer_graph())
        .fetcher(Arc::new(HttpFetcher::new()))
        .graph_path(format!(
            "{}/artifacts/graph/{{id}}.{{version}}",
            server.base_url()
        ))
        .build();
    let log = EventLog::new();
    observe_all(&mut scheduler, &log);

    scheduler.url("index", json!("x"), "input").await;

    assert_eq!(log.count(names::ERROR), 1);
    // The traversal still settled.
    assert_eq!(log.count(names::END), 1);
}

#[test]
fn url_templates_honor_environment_overrides() {
    // The only test touching this env var, so no cross-test races.
    unsafe {
        std::env::set_var(GRAPH_PATH_ENV, "mirror/graph/{id}-{version}.json");
    }
    let builder = SchedulerBuilder::new(common::graph("g1", vec![]));
    let scheduler = builder.build();
    unsafe {
        std::env::remove_var(GRAPH_PATH_ENV);
    }

    assert_eq!(scheduler.graph_path, "mirror/graph/{id}-{version}.json");
    assert_eq!(scheduler.vector_path, DEFAULT_VECTOR_PATH);
}
