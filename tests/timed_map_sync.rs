use std::{
    path::Path,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Barrier, Mutex,
    },
    thread,
    time::Duration,
};

use timed_map::{sync::TimedMap, ExtendTimeConfiguration, RemovalCause};

const NUM_THREADS: u8 = 16;
const FILE: &str = "./Cargo.toml";

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn get_file_size(thread_id: u8, path: impl AsRef<Path>, call_counter: &AtomicUsize) -> u64 {
    println!("get_file_size() called by thread {thread_id}.");
    call_counter.fetch_add(1, Ordering::AcqRel);
    std::fs::metadata(path).map(|m| m.len()).unwrap_or_default()
}

#[test]
fn test_get_or_add_if_new() {
    init_logger();

    let map = TimedMap::builder()
        .name("file_sizes")
        .expected_duration(Duration::from_secs(60))
        .build()
        .expect("Failed to build");
    let call_counter = Arc::new(AtomicUsize::default());
    let barrier = Arc::new(Barrier::new(NUM_THREADS as usize));

    let threads: Vec<_> = (0..NUM_THREADS)
        .map(|thread_id| {
            let my_map = map.clone();
            let my_call_counter = Arc::clone(&call_counter);
            let my_barrier = Arc::clone(&barrier);

            thread::spawn(move || {
                my_barrier.wait();
                println!("Thread {thread_id} started.");

                let key = "key1".to_string();
                let value = my_map.get_or_add_if_new(key.clone(), || {
                    get_file_size(thread_id, FILE, &my_call_counter)
                });
                assert_eq!(my_map.get(key.as_str()), Some(value));

                println!("Thread {thread_id} got the value. (len: {value})");
                value
            })
        })
        .collect();

    let values: Vec<_> = threads
        .into_iter()
        .map(|t| t.join().expect("Failed to join"))
        .collect();

    assert_eq!(call_counter.load(Ordering::Acquire), 1);
    assert!(values.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(map.entry_count(), 1);
}

#[test]
fn test_try_get_or_add_if_new() {
    init_logger();

    let map = TimedMap::builder()
        .expected_duration(Duration::from_secs(60))
        .build()
        .expect("Failed to build");
    let call_counter = Arc::new(AtomicUsize::default());

    // A failing producer leaves the key absent.
    let r: Result<u64, String> = map.try_get_or_add_if_new(1u32, || Err("not ready".into()));
    assert_eq!(r, Err("not ready".to_string()));
    assert!(!map.contains_key(&1));

    let barrier = Arc::new(Barrier::new(NUM_THREADS as usize));
    let threads: Vec<_> = (0..NUM_THREADS)
        .map(|thread_id| {
            let my_map = map.clone();
            let my_call_counter = Arc::clone(&call_counter);
            let my_barrier = Arc::clone(&barrier);

            thread::spawn(move || {
                my_barrier.wait();
                my_map.try_get_or_add_if_new(1, || -> Result<u64, String> {
                    Ok(get_file_size(thread_id, FILE, &my_call_counter))
                })
            })
        })
        .collect();

    for t in threads {
        assert!(t.join().expect("Failed to join").is_ok());
    }
    assert_eq!(call_counter.load(Ordering::Acquire), 1);
}

#[test]
fn test_entries_expire_in_the_background() {
    init_logger();

    let removed = Arc::new(Mutex::new(Vec::new()));
    let removed1 = Arc::clone(&removed);

    let map = TimedMap::builder()
        .name("background")
        .expected_duration(Duration::from_millis(50))
        .removal_listener(move |k: Arc<u32>, v: u32, cause| {
            removed1.lock().expect("lock").push((*k, v, cause));
        })
        .build()
        .expect("Failed to build");

    for i in 0..10 {
        map.get_or_add_if_new(i, || i * 10);
    }
    assert_eq!(map.entry_count(), 10);

    // No `run_pending_tasks` here. The timer thread does the work.
    thread::sleep(Duration::from_millis(1_000));

    assert_eq!(map.entry_count(), 0);
    let mut removed = removed.lock().expect("lock").clone();
    removed.sort_unstable_by_key(|(k, _, _)| *k);
    let expected: Vec<_> = (0..10)
        .map(|i| (i, i * 10, RemovalCause::Expired))
        .collect();
    assert_eq!(removed, expected);
}

#[test]
fn test_reads_keep_entry_alive() {
    init_logger();

    let map = TimedMap::builder()
        .expected_duration(Duration::from_millis(300))
        .extend_time(ExtendTimeConfiguration::new(Duration::from_millis(300)))
        .build()
        .expect("Failed to build");

    map.get_or_add_if_new("session", || 1);
    for _ in 0..6 {
        thread::sleep(Duration::from_millis(100));
        assert_eq!(map.get(&"session"), Some(1));
    }
    assert!(map.entry_age(&"session").expect("alive") >= Duration::from_millis(600));

    thread::sleep(Duration::from_millis(1_000));
    assert!(!map.contains_key(&"session"));
}

#[test]
fn test_remove_and_re_add() {
    init_logger();

    let causes = Arc::new(Mutex::new(Vec::new()));
    let causes1 = Arc::clone(&causes);

    let map = TimedMap::builder()
        .expected_duration(Duration::from_secs(60))
        .removal_listener(move |_k: Arc<u8>, _v: u8, cause| {
            causes1.lock().expect("lock").push(cause);
        })
        .build()
        .expect("Failed to build");

    let threads: Vec<_> = (0..NUM_THREADS)
        .map(|thread_id| {
            let my_map = map.clone();
            thread::spawn(move || {
                for _ in 0..100 {
                    my_map.get_or_add_if_new(thread_id % 4, || thread_id);
                    my_map.remove(&(thread_id % 4));
                }
            })
        })
        .collect();

    for t in threads {
        t.join().expect("Failed to join");
    }

    // Every stored entry was removed explicitly, and reported once.
    assert_eq!(map.entry_count(), 0);
    let causes = causes.lock().expect("lock");
    assert!(!causes.is_empty());
    assert!(causes.iter().all(|c| *c == RemovalCause::Explicit));
}
