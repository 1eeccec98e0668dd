//! Capability Registry fed by live upstreams
//!
//! Collision policies, catalog refresh on list_changed and lifecycle-driven
//! availability.

use std::time::Duration;

use pretty_assertions::assert_eq;
use slop_core::{
    CapabilityKind, CollisionPolicy, DomainEvent, GatewaySettings, OrchestratorError,
    UpstreamState,
};
use tests::gateway::{start, upstream_config};
use tests::{wait_until, with_timeout, MockUpstream};

const LONG: Duration = Duration::from_secs(5);

fn exposed(orchestrator: &slop_gateway::Orchestrator, kind: CapabilityKind) -> Vec<String> {
    orchestrator
        .registry()
        .snapshot()
        .exposed_names(kind)
        .map(str::to_string)
        .collect()
}

#[tokio::test]
async fn test_first_registrant_owns_shared_name() {
    tests::init_tracing();
    let a = MockUpstream::new("a").with_tools(&["search", "alpha"]);
    let b = MockUpstream::new("b").with_tools(&["search", "beta"]);

    let orchestrator = start(
        &[a.clone(), b.clone()],
        vec![upstream_config("a")],
        GatewaySettings::default(),
    )
    .await;
    orchestrator
        .upstreams()
        .add_upstream(upstream_config("b"))
        .await
        .unwrap();

    assert_eq!(exposed(&orchestrator, CapabilityKind::Tool), vec!["search", "alpha", "beta"]);
    let resolved = orchestrator
        .registry()
        .lookup(CapabilityKind::Tool, "search")
        .unwrap();
    assert_eq!(resolved.owner, "a");
    assert_eq!(resolved.fallbacks, vec!["b".to_string()]);

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_prefix_policy_namespaces_tools_and_prompts() {
    let a = MockUpstream::new("a")
        .with_tools(&["search"])
        .with_prompts(&["review"])
        .with_resources(&["file:///a"]);
    let b = MockUpstream::new("b").with_tools(&["search"]);
    let settings = GatewaySettings {
        collision_policy: CollisionPolicy::Prefix,
        ..Default::default()
    };

    let orchestrator = start(
        &[a, b],
        vec![upstream_config("a"), upstream_config("b")],
        settings,
    )
    .await;

    let mut tools = exposed(&orchestrator, CapabilityKind::Tool);
    tools.sort();
    assert_eq!(tools, vec!["a.search", "b.search"]);
    assert_eq!(exposed(&orchestrator, CapabilityKind::Prompt), vec!["a.review"]);
    // URIs are already global
    assert_eq!(exposed(&orchestrator, CapabilityKind::Resource), vec!["file:///a"]);

    let resolved = orchestrator
        .registry()
        .lookup(CapabilityKind::Tool, "b.search")
        .unwrap();
    assert_eq!(resolved.owner, "b");
    assert_eq!(resolved.name, "search");
    assert!(resolved.fallbacks.is_empty());

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_reject_policy_records_conflict() {
    let a = MockUpstream::new("a").with_tools(&["search"]);
    let b = MockUpstream::new("b").with_tools(&["search", "beta"]);
    let settings = GatewaySettings {
        collision_policy: CollisionPolicy::Reject,
        ..Default::default()
    };

    let orchestrator = start(&[a, b], vec![upstream_config("a")], settings).await;
    orchestrator
        .upstreams()
        .add_upstream(upstream_config("b"))
        .await
        .unwrap();

    let snapshot = orchestrator.registry().snapshot();
    let conflicts = snapshot.conflicts();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].name, "search");
    assert_eq!(conflicts[0].owner, "a");
    assert_eq!(conflicts[0].rejected, "b");

    let resolved = orchestrator
        .registry()
        .lookup(CapabilityKind::Tool, "search")
        .unwrap();
    assert!(resolved.fallbacks.is_empty());
    assert!(orchestrator
        .registry()
        .lookup(CapabilityKind::Tool, "beta")
        .is_ok());

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_list_changed_refreshes_catalog() {
    let a = MockUpstream::new("a").with_tools(&["one"]).with_prompts(&["p"]);
    let orchestrator = start(&[a.clone()], vec![upstream_config("a")], GatewaySettings::default()).await;
    let mut events = orchestrator.subscribe();

    let before = orchestrator.registry().snapshot();
    a.set_tools(&["one", "two"]).await;

    let registry = orchestrator.registry().clone();
    assert!(
        wait_until(LONG, || registry.lookup(CapabilityKind::Tool, "two").is_ok()).await,
        "refreshed tool never appeared"
    );

    let after = orchestrator.registry().snapshot();
    assert!(after.generation() > before.generation());
    assert!(after.kind_generation(CapabilityKind::Tool) > before.kind_generation(CapabilityKind::Tool));
    // Prompts were untouched, so their listing generation stays put
    assert_eq!(
        after.kind_generation(CapabilityKind::Prompt),
        before.kind_generation(CapabilityKind::Prompt)
    );

    let event = with_timeout(
        events.recv_matching(|e| matches!(e, DomainEvent::UpstreamCatalogChanged { .. })),
    )
    .await;
    let event = match event {
        Some(DomainEvent::UpstreamCatalogChanged { upstream, tools, .. }) => (upstream, tools),
        other => panic!("unexpected {other:?}"),
    };
    assert_eq!(event, ("a".to_string(), 2));

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_prompts_and_resources_registered() {
    let a = MockUpstream::new("a")
        .with_prompts(&["review", "summarize"])
        .with_resources(&["file:///readme", "file:///notes"]);
    let orchestrator = start(&[a], vec![upstream_config("a")], GatewaySettings::default()).await;

    assert_eq!(
        exposed(&orchestrator, CapabilityKind::Prompt),
        vec!["review", "summarize"]
    );
    assert_eq!(
        exposed(&orchestrator, CapabilityKind::Resource),
        vec!["file:///readme", "file:///notes"]
    );
    let status = orchestrator.upstreams().status("a").unwrap();
    assert_eq!(status.state, UpstreamState::Ready);
    assert_eq!(status.prompts, 2);
    assert_eq!(status.resources, 2);
    assert_eq!(status.server_name.as_deref(), Some("mock-a"));

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_failed_upstream_contributes_nothing() {
    let good = MockUpstream::new("good").with_tools(&["echo"]);
    let bad = MockUpstream::new("bad").with_tools(&["echo", "other"]);
    bad.fail_launches(true);

    let orchestrator = start(
        &[good, bad],
        vec![upstream_config("good"), upstream_config("bad")],
        GatewaySettings::default(),
    )
    .await;

    assert_eq!(orchestrator.upstreams().state("bad"), Some(UpstreamState::Closed));
    assert!(orchestrator.upstreams().status("bad").unwrap().last_error.is_some());
    assert_eq!(exposed(&orchestrator, CapabilityKind::Tool), vec!["echo"]);

    let err = orchestrator
        .registry()
        .lookup(CapabilityKind::Tool, "othr")
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::UnknownCapability { .. }));

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_removed_upstream_leaves_registry() {
    let a = MockUpstream::new("a").with_tools(&["alpha"]);
    let b = MockUpstream::new("b").with_tools(&["beta"]);
    let orchestrator = start(
        &[a, b],
        vec![upstream_config("a"), upstream_config("b")],
        GatewaySettings::default(),
    )
    .await;

    assert!(orchestrator.upstreams().remove_upstream("b").await);
    assert_eq!(exposed(&orchestrator, CapabilityKind::Tool), vec!["alpha"]);
    assert!(orchestrator.upstreams().state("b").is_none());

    orchestrator.shutdown().await;
}
