use crate::utils::client;
use std::{collections::HashSet, sync::Arc, thread, time::Duration};
use webhook_recorder::{OpenOptions, ResponseSpec, SharedRegistry};

#[test]
fn parallel_requests_are_all_recorded_test() {
    let registry = SharedRegistry::new();
    let server = registry
        .open(OpenOptions::new().response("/parallel", ResponseSpec::new(200).body("ok")))
        .unwrap();

    let senders: Vec<_> = (0..8)
        .map(|t| {
            let url = server.url("/parallel");
            thread::spawn(move || {
                let http = client();
                for i in 0..25 {
                    let res = http.post(&url).body(format!("{}-{}", t, i)).send().unwrap();
                    assert_eq!(res.status(), 200);
                }
            })
        })
        .collect();

    for sender in senders {
        sender.join().unwrap();
    }

    let bodies: HashSet<String> = server.requests().iter().map(|r| r.body_string()).collect();
    assert_eq!(server.request_count(), 200);
    assert_eq!(bodies.len(), 200);
}

#[test]
fn wait_for_background_webhook_test() {
    let registry = SharedRegistry::new();
    let server = registry
        .open(OpenOptions::new().response("/later", ResponseSpec::new(200)))
        .unwrap();

    let url = server.url("/later");
    let sender = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        client().post(url).body("late").send().unwrap();
    });

    assert!(server.wait_for_requests(1, Duration::from_secs(5)));
    assert_eq!(server.last_request().unwrap().body_string(), "late");
    sender.join().unwrap();

    assert!(!server.wait_for_requests(2, Duration::from_millis(50)));
}

#[test]
fn concurrent_open_calls_share_one_instance_test() {
    let registry = Arc::new(SharedRegistry::new());

    let openers: Vec<_> = (0..4)
        .map(|_| {
            let registry = registry.clone();
            thread::spawn(move || registry.open(OpenOptions::new()).unwrap())
        })
        .collect();

    let instances: Vec<_> = openers.into_iter().map(|o| o.join().unwrap()).collect();
    for instance in &instances[1..] {
        assert!(Arc::ptr_eq(&instances[0], instance));
    }
}

#[test]
fn slow_request_is_served_from_its_own_generation_test() {
    let registry = SharedRegistry::new();
    let server = registry
        .open(OpenOptions::new().response(
            "/slow",
            ResponseSpec::new(200)
                .body("old")
                .delay(Duration::from_millis(300)),
        ))
        .unwrap();

    let url = server.url("/slow");
    let slow = thread::spawn(move || client().get(url).send().unwrap().text().unwrap());

    assert!(server.wait_for_requests(1, Duration::from_secs(5)));
    let server = registry
        .open(OpenOptions::new().response("/slow", ResponseSpec::new(200).body("new")))
        .unwrap();

    // The request that was recorded before the swap still gets the old response, and it is
    // not part of the new log.
    assert_eq!(slow.join().unwrap(), "old");
    assert_eq!(server.request_count(), 0);

    let res = client().get(server.url("/slow")).send().unwrap();
    assert_eq!(res.text().unwrap(), "new");
}
