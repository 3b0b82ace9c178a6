use crate::utils::{client, FakeTunnel};
use std::sync::Arc;
use webhook_recorder::{
    find_available_port, Error, OpenOptions, RegistryConfig, ResponseSpec, SharedRegistry,
};

#[test]
fn exposure_is_started_once_and_kept_test() {
    let tunnel = FakeTunnel::default();
    let registry = SharedRegistry::new().with_tunnel(tunnel.clone());

    let server = registry
        .open(OpenOptions::new().expose_publicly(true))
        .unwrap();

    assert!(server.is_exposed());
    let port = server.port();
    assert_eq!(
        server.https_url(),
        Some(format!("https://recorder-{}.tunnel.test", port))
    );
    assert_eq!(
        server.http_url(),
        Some(format!("http://recorder-{}.tunnel.test", port))
    );

    // Later calls neither restart nor remove the exposure.
    let again = registry.open(OpenOptions::new()).unwrap();
    assert!(Arc::ptr_eq(&server, &again));
    assert!(again.is_exposed());

    registry
        .open(OpenOptions::new().expose_publicly(true))
        .unwrap();
    assert_eq!(tunnel.start_count(), 1);

    registry.stop_shared();
    assert_eq!(tunnel.stop_count(), 1);
}

#[test]
fn local_only_open_does_not_start_tunnel_test() {
    let tunnel = FakeTunnel::default();
    let registry = SharedRegistry::new().with_tunnel(tunnel.clone());

    let server = registry.open(OpenOptions::new()).unwrap();

    assert!(!server.is_exposed());
    assert!(server.http_url().is_none());
    assert_eq!(tunnel.start_count(), 0);

    registry.stop_shared();
    assert_eq!(tunnel.stop_count(), 0);
}

#[test]
fn tunnel_token_is_passed_through_test() {
    let tunnel = FakeTunnel::default();
    let config = RegistryConfig {
        tunnel_token: Some("from-config".to_string()),
        ..RegistryConfig::default()
    };

    let registry = SharedRegistry::with_config(config).with_tunnel(tunnel.clone());
    registry
        .open(OpenOptions::new().expose_publicly(true))
        .unwrap();
    assert_eq!(
        tunnel.last_token.lock().unwrap().as_deref(),
        Some("from-config")
    );

    let registry = SharedRegistry::new().with_tunnel(tunnel.clone());
    registry
        .open(
            OpenOptions::new()
                .expose_publicly(true)
                .tunnel_token("from-options"),
        )
        .unwrap();
    assert_eq!(
        tunnel.last_token.lock().unwrap().as_deref(),
        Some("from-options")
    );
}

#[test]
fn tunnel_failure_keeps_local_server_test() {
    let _ = env_logger::try_init();

    let tunnel = FakeTunnel::failing();
    let registry = SharedRegistry::new().with_tunnel(tunnel.clone());

    let result = registry.open(
        OpenOptions::new()
            .expose_publicly(true)
            .response("/local", ResponseSpec::new(200).body("still here")),
    );
    assert!(matches!(result, Err(Error::TunnelFailure(_))));

    // The instance was started and configured before the tunnel failed.
    let server = registry.current().unwrap();
    assert!(server.is_running());
    assert!(!server.is_exposed());

    let res = client().get(server.url("/local")).send().unwrap();
    assert_eq!(res.text().unwrap(), "still here");

    let again = registry.open(OpenOptions::new()).unwrap();
    assert!(Arc::ptr_eq(&server, &again));

    registry.stop_shared();
    assert_eq!(tunnel.stop_count(), 0);
}

#[test]
fn new_port_drops_exposure_test() {
    let tunnel = FakeTunnel::default();
    let registry = SharedRegistry::new().with_tunnel(tunnel.clone());

    let exposed = registry
        .open(OpenOptions::new().expose_publicly(true))
        .unwrap();
    assert!(exposed.is_exposed());

    let port = find_available_port().unwrap();
    let fresh = registry.open(OpenOptions::new().port(port)).unwrap();

    assert!(!fresh.is_exposed());
    assert_eq!(tunnel.stop_count(), 1);

    registry
        .open(OpenOptions::new().port(port).expose_publicly(true))
        .unwrap();
    assert_eq!(tunnel.start_count(), 2);
    assert!(fresh.is_exposed());
}
