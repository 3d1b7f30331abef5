use lamellar_rma::RmaWorldBuilder;
use serial_test::serial;

fn init_logging() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

#[test]
#[serial]
fn repeated_get_is_served_from_cache() {
    init_logging();
    let world = RmaWorldBuilder::new()
        .with_num_pes(3)
        .with_queue_size(16)
        .with_segment_len(32)
        .build::<u64>()
        .unwrap();
    let owner = world.worker(2);
    let reader = world.worker(0);
    owner.put(2, 5, 42);

    assert_eq!(reader.get(2, 5), 42);
    assert_eq!(reader.get_counters(2).posted, 1);
    for _ in 0..10 {
        assert_eq!(reader.get(2, 5), 42);
    }
    assert_eq!(reader.get_counters(2).posted, 1);
}

#[test]
#[serial]
fn fence_forces_a_new_request() {
    init_logging();
    let world = RmaWorldBuilder::new()
        .with_num_pes(3)
        .with_queue_size(16)
        .with_segment_len(32)
        .build::<u64>()
        .unwrap();
    let owner = world.worker(2);
    let reader = world.worker(0);
    owner.put(2, 5, 42);
    assert_eq!(reader.get(2, 5), 42);
    let posted = reader.get_counters(2).posted;

    reader.fence();
    // the value did not change, the cache must still not be consulted
    assert_eq!(reader.get(2, 5), 42);
    assert_eq!(reader.get_counters(2).posted, posted + 1);
}

#[test]
#[serial]
fn stale_until_fence() {
    init_logging();
    let world = RmaWorldBuilder::new()
        .with_num_pes(2)
        .with_segment_len(8)
        .build::<i32>()
        .unwrap();
    let owner = world.worker(1);
    let reader = world.worker(0);
    owner.put(1, 0, 1);
    assert_eq!(reader.get(1, 0), 1);
    owner.put(1, 0, 2);
    // no coherence with the owner's writes between fences
    assert_eq!(reader.get(1, 0), 1);
    reader.fence();
    assert_eq!(reader.get(1, 0), 2);
}

#[test]
#[serial]
fn put_writes_through_to_the_cache() {
    init_logging();
    let world = RmaWorldBuilder::new()
        .with_num_pes(2)
        .with_segment_len(8)
        .build::<f64>()
        .unwrap();
    let writer = world.worker(0);
    writer.put(1, 4, 2.5);
    assert_eq!(writer.put_counters(1).posted, 1);
    assert_eq!(writer.put_counters(1).ack_device, 1);
    assert_eq!(writer.get(1, 4), 2.5);
    assert_eq!(writer.get_counters(1).posted, 0);
    writer.fence();
    assert_eq!(writer.get(1, 4), 2.5);
    assert_eq!(writer.get_counters(1).posted, 1);
}
