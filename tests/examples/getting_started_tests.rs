use crate::utils::client;
use std::sync::Arc;
use webhook_recorder::{find_available_port, OpenOptions, ResponseSpec, SharedRegistry};

#[test]
fn getting_started_test() {
    let _ = env_logger::try_init();

    // Every test that needs the recorder opens it with its own response table.
    let registry = SharedRegistry::new();
    let server = registry
        .open(
            OpenOptions::new().response(
                "/hook",
                ResponseSpec::new(200)
                    .header("content-type", "text/plain")
                    .body("thanks"),
            ),
        )
        .unwrap();

    // Send a webhook the way the code under test would.
    let response = client()
        .post(server.url("/hook"))
        .body("event=created")
        .send()
        .unwrap();

    // The server answers as configured and keeps the request for inspection.
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().unwrap(), "thanks");

    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].body_string(), "event=created");
}

#[test]
fn reconfigure_between_tests_test() {
    let _ = env_logger::try_init();

    let port = find_available_port().unwrap();
    let registry = SharedRegistry::new();
    let http = client();

    // First test: /test1 answers "First".
    let first = registry
        .open(
            OpenOptions::new()
                .port(port)
                .response("/test1", ResponseSpec::new(200).body("First")),
        )
        .unwrap();

    let res = http.post(first.url("/test1")).send().unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.text().unwrap(), "First");
    assert_eq!(first.request_count(), 1);

    // Second test: same port, so the same server is handed out with a fresh log.
    let second = registry
        .open(
            OpenOptions::new()
                .port(port)
                .response("/test2", ResponseSpec::new(201).body("Second")),
        )
        .unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(second.port(), port);
    assert_eq!(second.request_count(), 0);

    let res = http.post(second.url("/test2")).send().unwrap();
    assert_eq!(res.status(), 201);
    assert_eq!(res.text().unwrap(), "Second");
    assert_eq!(second.request_count(), 1);

    // The response table of the first test is gone.
    let res = http.post(second.url("/test1")).send().unwrap();
    assert_eq!(res.status(), 404);
    assert!(res.text().unwrap().contains("/test1"));

    registry.stop_shared();
}

#[test]
fn process_wide_registry_test() {
    let result = webhook_recorder::open_scoped(
        OpenOptions::new().response("/global", ResponseSpec::new(202).body("accepted")),
        |server| {
            let res = client().put(server.url("/global")).body("x").send().unwrap();
            (res.status().as_u16(), server.request_count())
        },
    )
    .unwrap();

    assert_eq!(result, (202, 1));

    webhook_recorder::stop_shared();
    webhook_recorder::stop_shared();
}
