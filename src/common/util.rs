use futures_timer::Delay;
use std::{
    future::Future,
    net::TcpListener,
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

// ===============================================================================================
// Retry
// ===============================================================================================
/// Calls `f` until it succeeds, at most `retries + 1` times, waiting `interval` between
/// attempts. Returns the last result.
pub(crate) async fn with_retry<T, U, F, Fut>(
    retries: usize,
    interval: Duration,
    f: F,
) -> Result<T, U>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, U>>,
{
    let mut result = (f)().await;
    for _ in 1..=retries {
        if result.is_ok() {
            return result;
        }
        Delay::new(interval).await;
        result = (f)().await;
    }
    result
}

// ===============================================================================================
// Environment
// ===============================================================================================
pub(crate) fn read_env(name: &str, default: &str) -> String {
    match std::env::var(name) {
        Ok(value) => value,
        Err(_) => default.to_string(),
    }
}

pub(crate) fn read_env_flag(name: &str) -> bool {
    matches!(
        read_env(name, "false").trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

pub(crate) fn read_env_opt(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

// ===============================================================================================
// Network
// ===============================================================================================
/// Asks the operating system for a currently free TCP port on localhost.
///
/// The port is released again before this function returns, so another process may take it
/// in the meantime. Prefer letting the server bind port 0 when the exact number does not
/// matter.
pub fn find_available_port() -> std::io::Result<u16> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

// ===============================================================================================
// Threads
// ===============================================================================================
/// Joins the thread if it finishes within `timeout`. Returns `None` (and leaves the thread
/// detached) if it is still running when the timeout elapses or if it panicked.
pub(crate) fn join_with_timeout<T>(handle: JoinHandle<T>, timeout: Duration) -> Option<T> {
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            return None;
        }
        thread::sleep(Duration::from_millis(10));
    }
    handle.join().ok()
}
