use crate::utils::client;
use std::{
    net::TcpListener,
    sync::Arc,
    thread,
    time::{Duration, Instant},
};
use webhook_recorder::{
    find_available_port, Error, InstanceBuilder, OpenOptions, ResponseSpec, ResponseTable,
    ServerInstance, SharedRegistry,
};

#[test]
fn open_swaps_config_and_clears_log_test() {
    let registry = SharedRegistry::new();
    let http = client();

    let server = registry
        .open(OpenOptions::new().response("/a", ResponseSpec::new(200).body("a")))
        .unwrap();
    let first_generation = server.generation();

    for _ in 0..3 {
        http.post(server.url("/a")).send().unwrap();
    }
    assert_eq!(server.request_count(), 3);

    let server = registry
        .open(OpenOptions::new().response("/b", ResponseSpec::new(200).body("b")))
        .unwrap();

    // Nothing of the previous test is visible right after open.
    assert_eq!(server.request_count(), 0);
    assert!(server.generation() > first_generation);
    let table = server.response_table();
    assert!(table.contains("/b"));
    assert!(!table.contains("/a"));

    http.post(server.url("/b")).send().unwrap();
    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].path(), "/b");
}

#[test]
fn same_or_no_port_reuses_instance_test() {
    let port = find_available_port().unwrap();
    let registry = SharedRegistry::new();

    let first = registry.open(OpenOptions::new().port(port)).unwrap();
    let second = registry.open(OpenOptions::new().port(port)).unwrap();
    let third = registry.open(OpenOptions::new()).unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert!(Arc::ptr_eq(&first, &third));
    assert_eq!(third.port(), port);
    assert!(Arc::ptr_eq(&first, &registry.current().unwrap()));
}

#[test]
fn different_port_recreates_instance_test() {
    let _ = env_logger::try_init();

    let old_port = find_available_port().unwrap();
    let registry = SharedRegistry::new();

    let old = registry.open(OpenOptions::new().port(old_port)).unwrap();
    assert_eq!(old.port(), old_port);

    let new_port = find_available_port().unwrap();
    let new = registry
        .open(
            OpenOptions::new()
                .port(new_port)
                .response("/new", ResponseSpec::new(200).body("new")),
        )
        .unwrap();

    assert!(!Arc::ptr_eq(&old, &new));
    assert_eq!(new.port(), new_port);
    assert!(!old.is_running());
    assert!(new.is_running());

    // The old port has been released.
    assert!(TcpListener::bind(("127.0.0.1", old_port)).is_ok());

    let res = client().get(new.url("/new")).send().unwrap();
    assert_eq!(res.text().unwrap(), "new");
}

#[test]
fn stop_is_idempotent_test() {
    let registry = SharedRegistry::new();
    let server = registry.open(OpenOptions::new()).unwrap();
    let port = server.port();

    registry.stop_shared();
    registry.stop_shared();
    server.stop();

    assert!(!server.is_running());
    assert!(registry.current().is_none());
    assert!(TcpListener::bind(("127.0.0.1", port)).is_ok());

    // The registry starts a fresh instance afterwards.
    let next = registry.open(OpenOptions::new()).unwrap();
    assert!(!Arc::ptr_eq(&server, &next));
    assert!(next.is_running());
}

#[test]
fn stopped_instance_is_replaced_on_open_test() {
    let registry = SharedRegistry::new();
    let server = registry.open(OpenOptions::new()).unwrap();

    server.stop();
    let replacement = registry.open(OpenOptions::new()).unwrap();

    assert!(!Arc::ptr_eq(&server, &replacement));
    assert!(replacement.is_running());
}

#[test]
fn occupied_port_is_reported_test() {
    let _ = env_logger::try_init();

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let registry = SharedRegistry::new();
    let result = registry.open(OpenOptions::new().port(port));

    assert!(matches!(result, Err(Error::Startup(_))));
    assert!(registry.current().is_none());
}

#[test]
fn dropping_registry_stops_instance_test() {
    let server = {
        let registry = SharedRegistry::new();
        registry.open(OpenOptions::new()).unwrap()
    };

    assert!(!server.is_running());
}

#[test]
fn dedicated_instance_test() {
    let server = InstanceBuilder::new()
        .history_limit(2)
        .shutdown_timeout(Duration::from_millis(500))
        .worker_threads(2)
        .start()
        .unwrap();
    server.reconfigure(ResponseTable::new().with("/h", ResponseSpec::new(200)));

    let http = client();
    for i in 0..4 {
        http.post(server.url("/h")).body(i.to_string()).send().unwrap();
    }

    // Only the newest requests are kept.
    let bodies: Vec<String> = server.requests().iter().map(|r| r.body_string()).collect();
    assert_eq!(bodies, vec!["2", "3"]);

    assert_eq!(server.host(), "127.0.0.1");
    assert_eq!(server.base_url(), format!("http://127.0.0.1:{}", server.port()));
    assert!(!server.is_exposed());
    assert!(server.https_url().is_none());
}

#[test]
fn instance_listening_on_all_interfaces_test() {
    let server = InstanceBuilder::new().expose(true).start().unwrap();
    server.reconfigure(ResponseTable::new().with("/all", ResponseSpec::new(204)));

    assert!(server.address().ip().is_unspecified());
    assert_eq!(server.host(), "127.0.0.1");
    assert_eq!(client().get(server.url("/all")).send().unwrap().status(), 204);
}

#[test]
fn start_convenience_test() {
    let server = ServerInstance::start(None).unwrap();
    assert!(server.is_running());
    assert_eq!(server.generation(), 0);
    assert!(server.response_table().is_empty());
    drop(server);
}

#[test]
fn startup_timeout_leaves_nothing_behind_test() {
    let _ = env_logger::try_init();

    let port = find_available_port().unwrap();
    let result = InstanceBuilder::new()
        .port(port)
        .startup_timeout(Duration::ZERO)
        .start();

    assert!(matches!(result, Err(Error::StartupTimeout(_))));
    assert!(TcpListener::bind(("127.0.0.1", port)).is_ok());
}

#[test]
fn stop_terminates_requests_that_outlive_shutdown_timeout_test() {
    let _ = env_logger::try_init();

    let server = InstanceBuilder::new()
        .shutdown_timeout(Duration::from_millis(200))
        .start()
        .unwrap();
    server.reconfigure(ResponseTable::new().with(
        "/stuck",
        ResponseSpec::new(200).body("late").delay(Duration::from_secs(30)),
    ));
    let port = server.port();

    let url = server.url("/stuck");
    thread::spawn(move || {
        // The connection is cut when the server stops, so the result does not matter.
        let _ = client().get(url).send();
    });
    assert!(server.wait_for_requests(1, Duration::from_secs(5)));

    let start = Instant::now();
    server.stop();
    assert!(start.elapsed() < Duration::from_secs(3));

    assert!(!server.is_running());
    assert!(TcpListener::bind(("127.0.0.1", port)).is_ok());

    let start = Instant::now();
    server.stop();
    assert!(start.elapsed() < Duration::from_millis(100));
    assert!(!server.is_running());
}
