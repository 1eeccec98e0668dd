//! Session Gateway end to end
//!
//! A real rmcp client talks to the gateway, which talks to in-process rmcp
//! upstreams over duplex pipes.

use std::time::Duration;

use pretty_assertions::assert_eq;
use rmcp::model::{ErrorCode, GetPromptRequestParams, ReadResourceRequestParams};
use rmcp::{ClientHandler, RoleClient, ServiceError, ServiceExt};
use serde_json::{json, Value};
use slop_core::{DomainEvent, GatewaySettings, RequestTimeouts, UpstreamState};
use slop_gateway::{server, HttpConfig, Orchestrator};
use tests::gateway::{call, client_info, connect, connect_with, start, upstream_config, ListChangedClient};
use tests::mock::FAIL_CODE;
use tests::{text_of, wait_until, with_timeout, MockUpstream};
use tokio_util::sync::CancellationToken;

const LONG: Duration = Duration::from_secs(5);

async fn tool_names<H: ClientHandler>(client: &rmcp::service::RunningService<RoleClient, H>) -> Vec<String> {
    client
        .list_tools(Default::default())
        .await
        .unwrap()
        .tools
        .into_iter()
        .map(|t| t.name.to_string())
        .collect()
}

fn mcp_error<T: std::fmt::Debug>(result: Result<T, ServiceError>) -> rmcp::ErrorData {
    match result {
        Err(ServiceError::McpError(e)) => e,
        other => panic!("expected a JSON-RPC error, got {other:?}"),
    }
}

fn structured<T: serde::Serialize>(result: &T) -> Value {
    serde_json::to_value(result).unwrap()["structuredContent"].clone()
}

/// `a` registers before `b`, so `a` owns shared names
async fn start_in_order(mocks: &[MockUpstream], settings: GatewaySettings) -> Orchestrator {
    let first = upstream_config(&mocks[0].name);
    let orchestrator = start(mocks, vec![first], settings).await;
    for mock in &mocks[1..] {
        orchestrator
            .upstreams()
            .add_upstream(upstream_config(&mock.name))
            .await
            .unwrap();
    }
    orchestrator
}

fn short_timeouts(timeout: Duration) -> GatewaySettings {
    GatewaySettings {
        timeouts: RequestTimeouts::uniform(timeout),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_lists_meta_and_upstream_tools_and_calls_through() {
    tests::init_tracing();
    let a = MockUpstream::new("a").with_tools(&["echo"]);
    let b = MockUpstream::new("b").with_tools(&["whoami"]);
    let orchestrator = start_in_order(&[a, b], GatewaySettings::default()).await;
    let client = connect(orchestrator.gateway().clone()).await;

    assert_eq!(
        tool_names(&client).await,
        vec!["search_tools", "execute_tool", "get_metadata", "manage_mcps", "echo", "whoami"]
    );

    let result = client
        .call_tool(call("echo", json!({"text": "hello"})))
        .await
        .unwrap();
    assert_eq!(text_of(&result), "hello");
    let result = client.call_tool(call("whoami", json!({}))).await.unwrap();
    assert_eq!(text_of(&result), "b");

    assert!(orchestrator.gateway().router().pending().is_empty());
    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_meta_tools_can_be_disabled() {
    let a = MockUpstream::new("a").with_tools(&["echo"]);
    let settings = GatewaySettings {
        meta_tools: false,
        ..Default::default()
    };
    let orchestrator = start(&[a], vec![upstream_config("a")], settings).await;
    let client = connect(orchestrator.gateway().clone()).await;

    assert_eq!(tool_names(&client).await, vec!["echo"]);
    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_unknown_tool_suggests_close_names() {
    let a = MockUpstream::new("a").with_tools(&["echo", "read_file"]);
    let orchestrator = start(&[a], vec![upstream_config("a")], GatewaySettings::default()).await;
    let client = connect(orchestrator.gateway().clone()).await;

    let err = mcp_error(client.call_tool(call("ecko", json!({}))).await);
    assert_eq!(err.code, ErrorCode(-32602));
    let suggestions = err.data.unwrap()["suggestions"].clone();
    assert!(
        suggestions.as_array().unwrap().contains(&json!("echo")),
        "suggestions: {suggestions}"
    );
    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_upstream_error_reaches_client_unchanged() {
    let a = MockUpstream::new("a").with_tools(&["fail"]);
    let orchestrator = start(&[a], vec![upstream_config("a")], GatewaySettings::default()).await;
    let client = connect(orchestrator.gateway().clone()).await;

    let err = mcp_error(client.call_tool(call("fail", json!({}))).await);
    assert_eq!(err.code, ErrorCode(FAIL_CODE));
    assert_eq!(err.message, "boom");
    // Not a transient failure: the upstream stays healthy
    assert_eq!(orchestrator.upstreams().state("a"), Some(UpstreamState::Ready));
    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_timeout_is_reported_with_upstream() {
    let a = MockUpstream::new("a").with_tools(&["echo"]);
    let orchestrator = start(
        &[a.clone()],
        vec![upstream_config("a")],
        short_timeouts(Duration::from_millis(200)),
    )
    .await;
    let client = connect(orchestrator.gateway().clone()).await;

    a.stall(true);
    let err = mcp_error(client.call_tool(call("echo", json!({"text": "x"}))).await);
    assert_eq!(err.code, ErrorCode(-32002));
    assert_eq!(err.data.unwrap()["upstream"], json!("a"));

    assert!(wait_until(LONG, || a.cancelled() == 1).await);
    assert!(orchestrator.gateway().router().pending().is_empty());
    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_timeout_falls_back_to_next_owner() {
    let a = MockUpstream::new("a").with_tools(&["whoami"]);
    let b = MockUpstream::new("b").with_tools(&["whoami"]);
    let orchestrator = start_in_order(
        &[a.clone(), b.clone()],
        short_timeouts(Duration::from_millis(200)),
    )
    .await;
    let client = connect(orchestrator.gateway().clone()).await;

    a.stall(true);
    let result = client.call_tool(call("whoami", json!({}))).await.unwrap();
    assert_eq!(text_of(&result), "b");
    assert!(wait_until(LONG, || a.cancelled() == 1).await);
    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_repeated_timeouts_degrade_then_recover() {
    let a = MockUpstream::new("a").with_tools(&["echo"]);
    let settings = GatewaySettings {
        degrade_after_timeouts: 2,
        initial_backoff: Duration::from_millis(500),
        max_backoff: Duration::from_secs(1),
        ..short_timeouts(Duration::from_millis(200))
    };
    let orchestrator = start(&[a.clone()], vec![upstream_config("a")], settings).await;
    let mut events = orchestrator.subscribe();
    let client = connect(orchestrator.gateway().clone()).await;

    a.stall(true);
    for _ in 0..2 {
        let err = mcp_error(client.call_tool(call("echo", json!({}))).await);
        assert_eq!(err.code, ErrorCode(-32002));
    }

    assert_eq!(orchestrator.upstreams().state("a"), Some(UpstreamState::Degraded));
    // Hidden from routing while degraded
    assert!(!tool_names(&client).await.contains(&"echo".to_string()));
    let err = mcp_error(client.call_tool(call("echo", json!({}))).await);
    assert_eq!(err.code, ErrorCode(-32602));

    a.stall(false);
    let upstreams = orchestrator.upstreams().clone();
    assert!(
        wait_until(LONG, || upstreams.state("a") == Some(UpstreamState::Ready)).await,
        "upstream never recovered"
    );
    let result = client
        .call_tool(call("echo", json!({"text": "back"})))
        .await
        .unwrap();
    assert_eq!(text_of(&result), "back");

    let mut seen = Vec::new();
    while let Some(event) = events.try_recv() {
        if let DomainEvent::UpstreamStateChanged { to, .. } = event {
            seen.push(to);
        }
    }
    assert_eq!(seen, vec![UpstreamState::Degraded, UpstreamState::Ready]);
    orchestrator.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_exhausted_recovery_evicts_upstream() {
    let a = MockUpstream::new("a").with_tools(&["alpha"]);
    let b = MockUpstream::new("b").with_tools(&["beta"]);
    let settings = GatewaySettings {
        initial_backoff: Duration::from_millis(50),
        max_backoff: Duration::from_millis(100),
        ..Default::default()
    };
    let orchestrator = start(
        &[a.clone(), b],
        vec![
            upstream_config("a").with_max_retries(1),
            upstream_config("b"),
        ],
        settings,
    )
    .await;
    let mut events = orchestrator.subscribe();
    let client = connect(orchestrator.gateway().clone()).await;
    assert!(tool_names(&client).await.contains(&"alpha".to_string()));

    a.fail_launches(true);
    a.disconnect();

    let evicted = with_timeout(
        events.recv_matching(|e| matches!(e, DomainEvent::UpstreamEvicted { .. })),
    )
    .await
    .expect("event bus closed");
    assert_eq!(evicted.upstream(), Some("a"));
    assert_eq!(orchestrator.upstreams().state("a"), Some(UpstreamState::Closed));
    assert_eq!(a.launches(), 2);

    let names = tool_names(&client).await;
    assert!(!names.contains(&"alpha".to_string()));
    assert!(names.contains(&"beta".to_string()));
    orchestrator.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_client_disconnect_cancels_everything_in_flight() {
    let a = MockUpstream::new("a").with_tools(&["slow"]);
    let orchestrator = start(&[a.clone()], vec![upstream_config("a")], GatewaySettings::default()).await;
    let gateway = orchestrator.gateway().clone();
    let client = connect(gateway.clone()).await;
    assert_eq!(gateway.session_count(), 1);

    let peer = client.peer().clone();
    for _ in 0..3 {
        let peer = peer.clone();
        tokio::spawn(async move {
            let _ = peer.call_tool(call("slow", json!({"ms": 30_000}))).await;
        });
    }
    assert!(wait_until(LONG, || a.started() == 3).await);
    assert_eq!(gateway.router().pending().len(), 3);

    drop(peer);
    drop(client);

    assert!(
        wait_until(LONG, || a.cancelled() == 3).await,
        "upstream saw {} cancellations",
        a.cancelled()
    );
    assert!(wait_until(LONG, || gateway.router().pending().is_empty()).await);
    assert!(wait_until(LONG, || gateway.session_count() == 0).await);
    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_search_tools_ranks_and_paginates() {
    let a = MockUpstream::new("a").with_tools(&["read_file", "write_file"]);
    let b = MockUpstream::new("b").with_tools(&["read_url"]);
    let orchestrator = start_in_order(&[a, b], GatewaySettings::default()).await;
    let client = connect(orchestrator.gateway().clone()).await;

    let result = client
        .call_tool(call("search_tools", json!({"query": "read_file"})))
        .await
        .unwrap();
    let output = structured(&result);
    assert_eq!(output["tools"][0]["name"], json!("read_file"));
    assert_eq!(output["tools"][0]["mcp_name"], json!("a"));

    let result = client
        .call_tool(call("search_tools", json!({"query": "read", "limit": 1})))
        .await
        .unwrap();
    let output = structured(&result);
    assert_eq!(output["tools"].as_array().unwrap().len(), 1);
    assert_eq!(output["limit"], json!(1));
    assert_eq!(output["has_more"], json!(true));

    let result = client
        .call_tool(call("search_tools", json!({"query": "", "mcp_name": "b"})))
        .await
        .unwrap();
    let output = structured(&result);
    assert_eq!(output["total"], json!(1));
    assert_eq!(output["tools"][0]["name"], json!("read_url"));
    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_execute_tool_targets_a_named_upstream() {
    let a = MockUpstream::new("a").with_tools(&["whoami"]);
    let b = MockUpstream::new("b").with_tools(&["whoami"]);
    let orchestrator = start_in_order(&[a, b], GatewaySettings::default()).await;
    let client = connect(orchestrator.gateway().clone()).await;

    // `a` owns the exposed name, yet execute_tool reaches `b`
    let result = client
        .call_tool(call(
            "execute_tool",
            json!({"mcp_name": "b", "tool_name": "whoami", "parameters": {}}),
        ))
        .await
        .unwrap();
    assert_eq!(text_of(&result), "b");

    let err = mcp_error(
        client
            .call_tool(call("execute_tool", json!({"mcp_name": "nope", "tool_name": "whoami"})))
            .await,
    );
    assert_eq!(err.code, ErrorCode(-32602));

    let err = mcp_error(
        client
            .call_tool(call("execute_tool", json!({"mcp_name": "b"})))
            .await,
    );
    assert_eq!(err.code, ErrorCode(-32602));
    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_get_metadata_filters_and_schemas() {
    let a = MockUpstream::new("a")
        .with_tools(&["echo", "slow"])
        .with_prompts(&["review"]);
    let b = MockUpstream::new("b").with_tools(&["whoami"]);
    let orchestrator = start_in_order(&[a, b], GatewaySettings::default()).await;
    let client = connect(orchestrator.gateway().clone()).await;

    let result = client
        .call_tool(call("get_metadata", json!({})))
        .await
        .unwrap();
    let output = structured(&result);
    assert_eq!(output["total"], json!(2));
    let first = &output["metadata"][0];
    assert_eq!(first["name"], json!("a"));
    assert_eq!(first["state"], json!("ready"));
    assert_eq!(first["server_name"], json!("mock-a"));
    assert_eq!(first["prompts"][0]["name"], json!("review"));
    assert!(first["tools"][0].get("input_schema").is_none());

    let result = client
        .call_tool(call("get_metadata", json!({"mcp_name": "a", "tool_name": "echo"})))
        .await
        .unwrap();
    let output = structured(&result);
    assert_eq!(output["total"], json!(1));
    let tools = output["metadata"][0]["tools"].as_array().unwrap();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0]["input_schema"]["type"], json!("object"));
    assert_eq!(output["metadata"][0]["prompts"], json!([]));

    let result = client
        .call_tool(call("get_metadata", json!({"tool_name": "whoami"})))
        .await
        .unwrap();
    let output = structured(&result);
    assert_eq!(output["total"], json!(1));
    assert_eq!(output["metadata"][0]["name"], json!("b"));
    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_manage_mcps_runtime_lifecycle() {
    let a = MockUpstream::new("a").with_tools(&["echo"]);
    let b = MockUpstream::new("b").with_tools(&["beta"]);
    let orchestrator = start(&[a, b.clone()], vec![upstream_config("a")], GatewaySettings::default()).await;
    let client = connect(orchestrator.gateway().clone()).await;

    let result = client
        .call_tool(call("manage_mcps", json!({"action": "register", "name": "b", "command": "mock-b"})))
        .await
        .unwrap();
    assert_eq!(structured(&result)["message"], json!("Successfully registered MCP: b"));
    let result = client.call_tool(call("beta", json!({}))).await.unwrap();
    assert_eq!(text_of(&result), "beta called");

    let result = client
        .call_tool(call("manage_mcps", json!({"action": "list"})))
        .await
        .unwrap();
    let mcps = structured(&result)["mcps"].clone();
    assert_eq!(mcps[1]["name"], json!("b"));
    assert_eq!(mcps[1]["source"], json!("runtime"));
    assert_eq!(mcps[1]["tool_count"], json!(1));

    let result = client
        .call_tool(call("manage_mcps", json!({"action": "health_check"})))
        .await
        .unwrap();
    let output = structured(&result);
    assert_eq!(output["message"], json!("Health check complete: 2/2 MCPs healthy"));
    assert_eq!(output["health_checks"][0]["status"], json!("healthy"));

    let result = client
        .call_tool(call("manage_mcps", json!({"action": "reconnect", "name": "b"})))
        .await
        .unwrap();
    assert_eq!(structured(&result)["message"], json!("Successfully reconnected MCP: b"));
    assert_eq!(b.launches(), 2);
    assert_eq!(orchestrator.upstreams().state("b"), Some(UpstreamState::Ready));
    let result = client.call_tool(call("beta", json!({}))).await.unwrap();
    assert_eq!(text_of(&result), "beta called");

    let result = client
        .call_tool(call("manage_mcps", json!({"action": "status"})))
        .await
        .unwrap();
    assert_eq!(structured(&result)["status"][1]["state"], json!("ready"));

    client
        .call_tool(call("manage_mcps", json!({"action": "unregister", "name": "b"})))
        .await
        .unwrap();
    assert!(orchestrator.upstreams().state("b").is_none());
    let err = mcp_error(client.call_tool(call("beta", json!({}))).await);
    assert_eq!(err.code, ErrorCode(-32602));

    let err = mcp_error(client.call_tool(call("manage_mcps", json!({"action": "restart"}))).await);
    assert!(err.message.contains("invalid action: restart"), "{}", err.message);
    let err = mcp_error(client.call_tool(call("manage_mcps", json!({"action": "unregister"}))).await);
    assert!(err.message.contains("name is required"), "{}", err.message);
    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_prompts_and_resources_route_to_owner() {
    let a = MockUpstream::new("a").with_prompts(&["review"]);
    let b = MockUpstream::new("b").with_resources(&["file:///readme"]);
    let orchestrator = start_in_order(&[a, b], GatewaySettings::default()).await;
    let client = connect(orchestrator.gateway().clone()).await;

    let prompts = client.list_prompts(Default::default()).await.unwrap();
    assert_eq!(prompts.prompts.len(), 1);
    let resources = client.list_resources(Default::default()).await.unwrap();
    assert_eq!(resources.resources.len(), 1);

    let params: GetPromptRequestParams =
        serde_json::from_value(json!({"name": "review", "arguments": {"topic": "rust"}})).unwrap();
    let prompt = serde_json::to_value(client.get_prompt(params).await.unwrap()).unwrap();
    assert_eq!(prompt["messages"][0]["content"]["text"], json!("talk about rust"));

    let params: ReadResourceRequestParams =
        serde_json::from_value(json!({"uri": "file:///readme"})).unwrap();
    let contents = serde_json::to_value(client.read_resource(params).await.unwrap()).unwrap();
    assert_eq!(
        contents["contents"][0]["text"],
        json!("contents of file:///readme from b")
    );

    let params: ReadResourceRequestParams =
        serde_json::from_value(json!({"uri": "file:///missing"})).unwrap();
    let err = mcp_error(client.read_resource(params).await);
    assert_eq!(err.code, ErrorCode(-32602));
    orchestrator.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_quick_answer_is_not_held_behind_a_slow_call() {
    let a = MockUpstream::new("a")
        .with_tools(&["slow"])
        .with_resources(&["file:///fast"]);
    let settings = GatewaySettings {
        timeouts: RequestTimeouts {
            tool_call: Duration::from_secs(4),
            resource_read: Duration::from_millis(300),
            ..Default::default()
        },
        cleanup_interval: Duration::from_millis(100),
        ..Default::default()
    };
    let orchestrator = start(&[a.clone()], vec![upstream_config("a")], settings).await;
    let client = connect(orchestrator.gateway().clone()).await;

    let peer = client.peer().clone();
    let slow = tokio::spawn(async move { peer.call_tool(call("slow", json!({"ms": 3000}))).await });
    assert!(wait_until(LONG, || a.started() == 1).await);

    // Same upstream, submitted later, answered at once
    let params: ReadResourceRequestParams =
        serde_json::from_value(json!({"uri": "file:///fast"})).unwrap();
    let contents = tokio::time::timeout(Duration::from_secs(2), client.read_resource(params))
        .await
        .expect("read held behind the slow call")
        .unwrap();
    assert_eq!(
        serde_json::to_value(contents).unwrap()["contents"][0]["text"],
        json!("contents of file:///fast from a")
    );

    // The slow call itself is untouched
    let result = with_timeout(slow).await.unwrap().unwrap();
    assert_eq!(text_of(&result), "slept 3000ms");
    assert_eq!(a.cancelled(), 0);
    assert!(orchestrator.gateway().router().pending().is_empty());
    orchestrator.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_upstream_list_changed_is_forwarded_to_clients() {
    let a = MockUpstream::new("a").with_tools(&["one"]);
    let orchestrator = start(&[a.clone()], vec![upstream_config("a")], GatewaySettings::default()).await;

    let handler = ListChangedClient::default();
    let changed = handler.tools_changed.clone();
    let client = connect_with(orchestrator.gateway().clone(), handler)
        .await
        .unwrap();
    assert!(tool_names(&client).await.contains(&"one".to_string()));
    // Let the forwarder take its baseline
    tokio::time::sleep(Duration::from_millis(100)).await;

    a.set_tools(&["one", "two"]).await;
    with_timeout(changed.notified()).await;
    assert!(tool_names(&client).await.contains(&"two".to_string()));
    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_session_limit_rejects_extra_clients() {
    let a = MockUpstream::new("a").with_tools(&["echo"]);
    let settings = GatewaySettings {
        max_sessions: Some(1),
        ..Default::default()
    };
    let orchestrator = start(&[a], vec![upstream_config("a")], settings).await;
    let gateway = orchestrator.gateway().clone();

    let first = connect(gateway.clone()).await;
    let second = connect_with(gateway.clone(), client_info("second")).await;
    assert!(second.is_err(), "second session should be refused");
    assert_eq!(gateway.session_count(), 1);

    drop(first);
    assert!(wait_until(LONG, || gateway.session_count() == 0).await);
    let third = connect(gateway.clone()).await;
    assert_eq!(tool_names(&third).await.len(), 4);
    orchestrator.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_streamable_http_and_health() {
    let a = MockUpstream::new("a").with_tools(&["echo"]);
    let orchestrator = start(&[a], vec![upstream_config("a")], GatewaySettings::default()).await;

    let shutdown = CancellationToken::new();
    let router = server::http_router(
        orchestrator.gateway().clone(),
        &HttpConfig::default(),
        shutdown.clone(),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let stop = shutdown.clone();
    tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move { stop.cancelled().await })
            .await
            .unwrap();
    });

    let transport =
        rmcp::transport::StreamableHttpClientTransport::from_uri(format!("http://{addr}/mcp"));
    let client = client_info("http-client").serve(transport).await.unwrap();
    let result = client
        .call_tool(call("echo", json!({"text": "over http"})))
        .await
        .unwrap();
    assert_eq!(text_of(&result), "over http");

    let health: Value = reqwest::get(format!("http://{addr}/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], json!("ok"));
    assert_eq!(health["sessions"], json!(1));
    assert_eq!(health["upstreams"][0]["name"], json!("a"));
    assert_eq!(health["upstreams"][0]["state"], json!("ready"));

    let _ = client.cancel().await;
    shutdown.cancel();
    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_lifecycle_events_are_journaled() {
    let a = MockUpstream::new("a").with_tools(&["echo"]);
    let orchestrator = start(&[a], vec![upstream_config("a")], GatewaySettings::default()).await;

    let journaled = |orchestrator: &Orchestrator| {
        orchestrator.recent_events(16).into_iter().any(|entry| {
            matches!(
                entry.event,
                DomainEvent::UpstreamStateChanged { ref upstream, to: UpstreamState::Ready, .. } if upstream == "a"
            )
        })
    };
    assert!(wait_until(LONG, || journaled(&orchestrator)).await);
    orchestrator.shutdown().await;
}
