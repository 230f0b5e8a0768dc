//! End-to-end mutex behavior over a shared in-memory store.
//!
//! Timing assertions use generous windows; they check ordering and rough
//! latency, not scheduler precision.

mod common;

use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use remutex::DistributedMutex;
use remutex::HandlerKind;
use remutex::LockStore;
use remutex::MutexError;
use remutex::MutexOptions;

use common::memory_context;

#[tokio::test]
async fn same_owner_reentrance_is_rejected() {
    let (_, ctx) = memory_context(HandlerKind::Optimistic).await;
    let mutex = DistributedMutex::new(&ctx, ["r"]).unwrap();

    assert!(mutex.lock(None).await.unwrap());
    assert!(matches!(mutex.lock(None).await, Err(MutexError::Deadlock { .. })));

    // A second instance under the same owner cannot claim either.
    let second = DistributedMutex::new(&ctx, ["r"]).unwrap();
    assert!(!second.try_lock().await.unwrap());

    mutex.unlock().await.unwrap();
    assert!(second.try_lock().await.unwrap());
    second.unlock().await.unwrap();
}

#[tokio::test]
async fn release_wakes_cross_task_waiter() {
    let (_, ctx) = memory_context(HandlerKind::Scripted).await;
    let holder = DistributedMutex::new(&ctx, ["r"]).unwrap();
    assert!(holder.lock(None).await.unwrap());

    let waiter_ctx = Arc::clone(&ctx);
    let waiter = tokio::spawn(async move {
        let mutex = DistributedMutex::new(&waiter_ctx, ["r"]).unwrap();
        assert!(!mutex.try_lock().await.unwrap());
        let started = Instant::now();
        mutex.synchronize(Some(Duration::from_secs(2)), || async {}).await.unwrap();
        started.elapsed()
    });

    tokio::time::sleep(Duration::from_millis(250)).await;
    holder.unlock().await.unwrap();

    // The waiter resumes within a few schedule ticks of the release.
    let waited = waiter.await.unwrap();
    assert!(waited >= Duration::from_millis(240), "woke early: {waited:?}");
    assert!(waited < Duration::from_millis(450), "woke late: {waited:?}");
}

#[tokio::test]
async fn block_timeout_returns_false() {
    let (_, ctx) = memory_context(HandlerKind::Scripted).await;
    let holder = DistributedMutex::new(&ctx, ["r"]).unwrap();
    assert!(holder.lock(None).await.unwrap());

    let waiter_ctx = Arc::clone(&ctx);
    let waiter = tokio::spawn(async move {
        let mutex = DistributedMutex::new(&waiter_ctx, ["r"]).unwrap();
        let started = Instant::now();
        let acquired = mutex.lock(Some(Duration::from_millis(250))).await.unwrap();
        (acquired, started.elapsed())
    });

    let (acquired, waited) = waiter.await.unwrap();
    assert!(!acquired);
    assert!(waited >= Duration::from_millis(240), "gave up early: {waited:?}");
    assert!(waited < Duration::from_millis(450), "gave up late: {waited:?}");
    assert!(holder.owned().await.unwrap());
}

#[tokio::test]
async fn expired_lease_is_acquired_during_wait() {
    let (_, ctx) = memory_context(HandlerKind::Optimistic).await;
    let options = MutexOptions::default().name("r").expire(Duration::from_millis(250));
    let holder = DistributedMutex::with_options(&ctx, options).unwrap();
    assert!(holder.lock(None).await.unwrap());

    // The holder goes silent; a waiter picks the name up at the deadline.
    let waiter_ctx = Arc::clone(&ctx);
    let waiter = tokio::spawn(async move {
        let mutex = DistributedMutex::new(&waiter_ctx, ["r"]).unwrap();
        let started = Instant::now();
        let acquired = mutex.lock(Some(Duration::from_secs(1))).await.unwrap();
        (acquired, started.elapsed())
    });

    let (acquired, waited) = waiter.await.unwrap();
    assert!(acquired);
    assert!(waited >= Duration::from_millis(200), "took over early: {waited:?}");
    assert!(waited < Duration::from_millis(500), "took over late: {waited:?}");
    assert!(!holder.owned().await.unwrap());
}

#[tokio::test]
async fn refresh_prevents_takeover() {
    let (_, ctx) = memory_context(HandlerKind::Scripted).await;
    let options = MutexOptions::default().name("r").expire(Duration::from_millis(110));
    let holder = DistributedMutex::with_options(&ctx, options).unwrap();
    assert!(holder.lock(None).await.unwrap());

    let waiter_ctx = Arc::clone(&ctx);
    let waiter = tokio::spawn(async move {
        let mutex = DistributedMutex::new(&waiter_ctx, ["r"]).unwrap();
        let started = Instant::now();
        let acquired = mutex.lock(Some(Duration::from_millis(300))).await.unwrap();
        (acquired, started.elapsed())
    });

    tokio::time::sleep(Duration::from_millis(80)).await;
    assert!(holder.refresh(None).await.unwrap());
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert!(holder.refresh(Some(Duration::from_millis(500))).await.unwrap());

    let (acquired, waited) = waiter.await.unwrap();
    assert!(!acquired, "takeover despite refreshes");
    assert!(waited >= Duration::from_millis(290), "gave up early: {waited:?}");
    assert!(holder.owned().await.unwrap());
}

#[tokio::test]
async fn failed_multi_lock_leaves_names_claimable() {
    let (_, ctx) = memory_context(HandlerKind::Optimistic).await;
    let holder = DistributedMutex::new(&ctx, ["b"]).unwrap();
    assert!(holder.lock(None).await.unwrap());

    let both_ctx = Arc::clone(&ctx);
    let both_failed = tokio::spawn(async move {
        let mutex = DistributedMutex::new(&both_ctx, ["a", "b"]).unwrap();
        !mutex.try_lock().await.unwrap()
    })
    .await
    .unwrap();
    assert!(both_failed);

    // "a" must not be left behind by the failed attempt.
    let free_ctx = Arc::clone(&ctx);
    let free_claimed = tokio::spawn(async move {
        let mutex = DistributedMutex::new(&free_ctx, ["a"]).unwrap();
        mutex.try_lock().await.unwrap()
    })
    .await
    .unwrap();
    assert!(free_claimed);
}

#[tokio::test]
async fn unlock_without_ownership_is_a_quiet_noop() {
    let (_, ctx) = memory_context(HandlerKind::Scripted).await;
    let mutex = DistributedMutex::new(&ctx, ["r"]).unwrap();

    mutex.unlock().await.unwrap();
    assert_eq!(mutex.unlock_released().await.unwrap(), None);

    assert!(mutex.lock(None).await.unwrap());
    assert_eq!(mutex.unlock_released().await.unwrap(), Some(vec!["r".to_string()]));
    assert_eq!(mutex.unlock_released().await.unwrap(), None);
}

#[tokio::test]
async fn locked_and_owned_track_the_store() {
    let (_, ctx) = memory_context(HandlerKind::Scripted).await;
    let mutex = DistributedMutex::new(&ctx, ["r"]).unwrap();

    assert!(!mutex.locked().await.unwrap());
    assert!(!mutex.owned().await.unwrap());

    assert!(mutex.lock(None).await.unwrap());
    assert!(mutex.locked().await.unwrap());
    assert!(mutex.owned().await.unwrap());

    // Another task sees it locked but not owned.
    let other_ctx = Arc::clone(&ctx);
    let (locked, owned) = tokio::spawn(async move {
        let other = DistributedMutex::new(&other_ctx, ["r"]).unwrap();
        (other.locked().await.unwrap(), other.owned().await.unwrap())
    })
    .await
    .unwrap();
    assert!(locked);
    assert!(!owned);

    mutex.unlock().await.unwrap();
    assert!(!mutex.locked().await.unwrap());
}

#[tokio::test]
async fn synchronize_times_out_with_error() {
    let (_, ctx) = memory_context(HandlerKind::Scripted).await;
    let holder = DistributedMutex::new(&ctx, ["r"]).unwrap();
    assert!(holder.lock(None).await.unwrap());

    let waiter_ctx = Arc::clone(&ctx);
    let outcome = tokio::spawn(async move {
        let mutex = DistributedMutex::new(&waiter_ctx, ["r"]).unwrap();
        mutex.synchronize(Some(Duration::from_millis(100)), || async {}).await
    })
    .await
    .unwrap();
    assert!(matches!(outcome, Err(MutexError::Timeout { .. })));
}

#[tokio::test]
async fn sleep_resumes_on_wakeup_and_reacquires() {
    let (_, ctx) = memory_context(HandlerKind::Scripted).await;
    let mutex = Arc::new(DistributedMutex::new(&ctx, ["r"]).unwrap());
    assert!(mutex.lock(None).await.unwrap());

    let task = remutex::current_task_id();
    let waker = Arc::clone(&mutex);
    let woke = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        waker.wakeup(&task)
    });

    let started = Instant::now();
    mutex.sleep(Some(Duration::from_secs(5))).await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(1), "wakeup did not cut the sleep short");
    assert!(woke.await.unwrap());
    assert!(mutex.owned().await.unwrap());
    mutex.unlock().await.unwrap();
}

#[tokio::test]
async fn sleep_times_out_and_reacquires() {
    let (_, ctx) = memory_context(HandlerKind::Scripted).await;
    let mutex = DistributedMutex::new(&ctx, ["r"]).unwrap();
    assert!(mutex.lock(None).await.unwrap());

    let started = Instant::now();
    mutex.sleep(Some(Duration::from_millis(100))).await.unwrap();
    assert!(started.elapsed() >= Duration::from_millis(90));
    assert!(mutex.owned().await.unwrap());
    mutex.unlock().await.unwrap();
}

#[tokio::test]
async fn local_waiters_are_served_in_registration_order() {
    let (_, ctx) = memory_context(HandlerKind::Scripted).await;
    let holder = DistributedMutex::new(&ctx, ["r"]).unwrap();
    assert!(holder.lock(None).await.unwrap());

    let order = Arc::new(std::sync::Mutex::new(Vec::new()));
    let mut waiters = Vec::new();
    for i in 0..3usize {
        let ctx = Arc::clone(&ctx);
        let order = Arc::clone(&order);
        waiters.push(tokio::spawn(async move {
            let mutex = DistributedMutex::new(&ctx, ["r"]).unwrap();
            mutex
                .synchronize(Some(Duration::from_secs(5)), || async {
                    order.lock().unwrap().push(i);
                })
                .await
                .unwrap();
        }));
        // Give each waiter time to park before the next registers.
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    holder.unlock().await.unwrap();
    for waiter in waiters {
        waiter.await.unwrap();
    }
    assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
}

#[tokio::test]
async fn chaos_synchronize_is_mutually_exclusive() {
    let (store, ctx) = memory_context(HandlerKind::Scripted).await;

    let mut workers = Vec::new();
    for i in 0..10usize {
        let ctx = Arc::clone(&ctx);
        let store = store.clone();
        workers.push(tokio::spawn(async move {
            let mutex = DistributedMutex::new(&ctx, ["chaos"]).unwrap();
            mutex
                .synchronize(Some(Duration::from_secs(10)), move || async move {
                    let claimed = store.set_if_absent("K", &i.to_string()).await.unwrap();
                    assert!(claimed, "set-if-absent conflict inside the critical section");
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    let value = store.get("K").await.unwrap();
                    assert_eq!(value.as_deref(), Some(i.to_string().as_str()));
                    assert!(store.delete("K").await.unwrap());
                    i
                })
                .await
                .unwrap()
        }));
    }

    let mut completed = Vec::new();
    for worker in workers {
        completed.push(worker.await.unwrap());
    }
    completed.sort_unstable();
    assert_eq!(completed, (0..10).collect::<Vec<_>>());
}
