use lamellar_rma::{EngineState, RmaWorldBuilder};
use rand::seq::SliceRandom;
use serial_test::serial;

fn init_logging() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

#[test]
#[serial]
fn no_request_is_lost_with_a_small_ring() {
    init_logging();
    let n = 100;
    let world = RmaWorldBuilder::new()
        .with_num_pes(2)
        .with_queue_size(4)
        .with_segment_len(n)
        .build::<u32>()
        .unwrap();
    let owner = world.worker(1);
    for i in 0..n {
        owner.put(1, i, (i * 7) as u32);
    }
    let requester = world.worker(0);
    let mut offsets: Vec<usize> = (0..n).collect();
    offsets.shuffle(&mut rand::thread_rng());
    std::thread::scope(|s| {
        for chunk in offsets.chunks(n / 4) {
            let requester = requester.clone();
            s.spawn(move || {
                for &i in chunk {
                    assert_eq!(requester.request(1, i), (i * 7) as u32);
                }
            });
        }
    });
    requester.fence();

    let counters = requester.get_counters(1);
    assert_eq!(counters.posted, n as u64);
    assert_eq!(counters.aggregated, n as u64);
    assert_eq!(counters.ack_host, n as u64);
    assert_eq!(counters.ack_device, n as u64);
    // a ring of 4 can never carry more than 4 requests in one block
    assert!(requester.block_commands_issued() >= (n as u64 + 3) / 4);
    // the owner bumps its reply counter right after handing the last reply to its agent
    while owner.get_counters(0).replied < n as u64 {
        std::thread::yield_now();
    }
    assert_eq!(owner.get_counters(0).replied, n as u64);
}

#[test]
#[serial]
fn every_pe_hammers_every_pe() {
    init_logging();
    let num_pes = 4;
    let len = 32;
    let world = RmaWorldBuilder::new()
        .with_num_pes(num_pes)
        .with_queue_size(8)
        .with_segment_len(len)
        .with_packer_teams(2)
        .build::<i64>()
        .unwrap();
    std::thread::scope(|s| {
        for worker in world.workers() {
            for t in 0..3 {
                let worker = worker.clone();
                s.spawn(move || {
                    for pe in 0..num_pes {
                        for i in (t..len).step_by(3) {
                            worker.put(pe, i, -((worker.my_pe() * len + i) as i64));
                        }
                    }
                });
            }
        }
    });
    world.fence_all();
    for worker in world.workers() {
        for pe in 0..num_pes {
            for i in 0..len {
                let v = worker.request(pe, i);
                // every pe wrote every element, the last writer wins
                assert!(v <= 0 && (-v) as usize % len == i);
            }
            let put = worker.put_counters(pe);
            assert_eq!(put.posted, put.aggregated);
            assert_eq!(put.ack_device, put.posted);
        }
    }
}

#[test]
#[serial]
fn engines_run_until_the_world_drops() {
    init_logging();
    let world = RmaWorldBuilder::new()
        .with_num_pes(2)
        .with_segment_len(4)
        .build::<u8>()
        .unwrap();
    let worker = world.worker(0);
    worker.put(1, 0, 1);
    assert_eq!(worker.aggregator_state(), EngineState::Running);
    drop(world);
    // the worker keeps the job alive
    assert_eq!(worker.request(1, 0), 1);
    assert_ne!(worker.packer_state(), EngineState::Done);
    drop(worker);
}
