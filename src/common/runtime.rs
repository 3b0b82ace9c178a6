use std::{future::Future, thread, time::Duration};
use tokio::{runtime::Runtime, task::LocalSet};

pub(crate) async fn sleep(duration: Duration) {
    tokio::time::sleep(duration).await
}

pub(crate) fn block_on_current_thread<F, O>(f: F) -> std::io::Result<O>
where
    F: Future<Output = O>,
{
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    Ok(LocalSet::new().block_on(&runtime, f))
}

/// Runs the future to completion on a fresh current-thread runtime. If the calling thread
/// already drives a Tokio runtime (e.g. inside `#[tokio::test]`), the future is moved to a
/// helper thread, since runtimes cannot be nested.
pub(crate) fn block_on_detached<F, O>(f: F) -> std::io::Result<O>
where
    F: Future<Output = O> + Send + 'static,
    O: Send + 'static,
{
    if tokio::runtime::Handle::try_current().is_err() {
        return block_on_current_thread(f);
    }

    thread::Builder::new()
        .name("webhook-recorder-blocking".to_string())
        .spawn(move || block_on_current_thread(f))?
        .join()
        .map_err(|_| std::io::Error::other("helper thread panicked"))?
}

pub(crate) fn new(worker_threads: usize, blocking_threads: usize) -> std::io::Result<Runtime> {
    assert!(
        worker_threads > 0,
        "Parameter worker_threads must be larger than 0"
    );
    assert!(
        blocking_threads > 0,
        "Parameter blocking_threads must be larger than 0"
    );

    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(worker_threads)
        .max_blocking_threads(blocking_threads) // This is a maximum
        .thread_name("webhook-recorder-worker")
        .enable_all()
        .build()
}
