// Identifier generation, sync and async
use std::collections::HashSet;
use std::future::Future;
use std::pin::pin;
use std::sync::Arc;
use std::task::{Context, Poll, Wake, Waker};
use std::thread::{self, Thread};

use shmseg_core::identity::{GENERATED_PREFIX, GENERATED_RANDOM_BYTES};
use shmseg_core::{generate_id, generate_id_async, resolve, SharedSegment};

#[test]
fn test_generated_ids_do_not_repeat() {
    let ids: HashSet<String> = (0..1000)
        .map(|_| generate_id(false).name().to_string())
        .collect();
    assert_eq!(ids.len(), 1000);
}

#[tokio::test]
async fn test_async_id_matches_sync_format() {
    let id = generate_id_async(false).await.unwrap();
    assert!(id.name().starts_with(GENERATED_PREFIX));
    assert_eq!(
        id.name().len(),
        GENERATED_PREFIX.len() + GENERATED_RANDOM_BYTES * 2
    );
    assert_eq!(resolve(id.name(), false).unwrap(), id);
}

#[tokio::test(flavor = "current_thread")]
async fn test_async_ids_compose_with_other_tasks() {
    let (a, b, ()) = tokio::join!(
        generate_id_async(false),
        generate_id_async(true),
        tokio::task::yield_now()
    );
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_ne!(a.name(), b.name());
    assert!(b.is_global());
}

#[tokio::test]
async fn test_async_id_hosts_segment() {
    let id = generate_id_async(false).await.unwrap();
    let mut host = SharedSegment::from_name(&id, 16, true).unwrap();
    host.write("async").unwrap();
    assert_eq!(SharedSegment::from_name(&id, 16, false).unwrap().read().unwrap(), "async");
}

/// Wakes a parked thread; enough to drive a future without any runtime
struct ThreadWaker(Thread);

impl Wake for ThreadWaker {
    fn wake(self: Arc<Self>) {
        self.0.unpark();
    }
}

fn block_on<F: Future>(future: F) -> F::Output {
    let mut future = pin!(future);
    let waker = Waker::from(Arc::new(ThreadWaker(thread::current())));
    let mut cx = Context::from_waker(&waker);
    loop {
        match future.as_mut().poll(&mut cx) {
            Poll::Ready(output) => return output,
            Poll::Pending => thread::park(),
        }
    }
}

#[test]
fn test_async_id_outside_tokio_runtime() {
    let id = thread::spawn(|| block_on(generate_id_async(true)))
        .join()
        .unwrap()
        .unwrap();
    assert!(id.is_global());
    assert!(id.name().starts_with(GENERATED_PREFIX));
}
