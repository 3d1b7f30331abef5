//! Lamellar RMA provides element granular remote memory access for massively parallel programs.
//!
//! Thousands of threads may each want to read or write a single element owned by another
//! pe (processing element), but one-sided network transfers only pay off in bulk. Lamellar RMA
//! lets every thread issue individual accesses while cooperative engine teams coalesce them:
//! the request aggregation engine folds the requests posted to a peer into block commands,
//! a host progress agent moves those blocks over a Lamellae backend, and the reply packing
//! engine of the owning pe gathers (or applies) the elements and returns one block reply.
//!
//! Everything is coordinated through monotonic counters and generation tagged ring
//! buffers; no lock is taken on the access path and every wait is a busy-poll.
//!
//! Recently fetched values are kept in a remote access cache until the next fence, after
//! which every access goes back to the owner.
//!
//! EXAMPLES
//! --------
//!
//! # Constructing a world and reading remote elements
//! ```
//! use lamellar_rma::RmaWorldBuilder;
//!
//! fn main(){
//!     let world = RmaWorldBuilder::new()
//!         .with_num_pes(4)
//!         .with_queue_size(256)
//!         .build::<u64>()
//!         .unwrap();
//!     let workers = world.workers();
//!     std::thread::scope(|s| {
//!         for worker in &workers {
//!             s.spawn(move || {
//!                 let next = (worker.my_pe() + 1) % worker.num_pes();
//!                 for i in 0..100 {
//!                     worker.put(next, i, (worker.my_pe() * 1000 + i) as u64);
//!                 }
//!                 worker.fence();
//!             });
//!         }
//!     });
//!     let worker = &workers[0];
//!     assert_eq!(worker.get(1, 7), 7);
//!     worker.fence(); // the next get goes back to pe 1
//! }
//! ```
//!
//! # Remote atomics
//! ```
//! use lamellar_rma::RmaWorldBuilder;
//!
//! let world = RmaWorldBuilder::new().with_num_pes(2).build::<i32>().unwrap();
//! let counter = world.worker(1).element(0, 0);
//! counter.fetch_add(3);
//! counter.fetch_xor(1);
//! assert_eq!(counter.load(), 2);
//! ```

#[doc(hidden)]
pub extern crate tracing;

mod agent;
mod aggregate;
mod cache;
mod command;
mod env_var;
mod error;
mod lamellae;
mod pack;
mod remote_ops;
mod rma_world;
mod scalar;
mod segment;
mod sequence;
mod team;
mod utils;
mod warnings;
mod worker;
mod worker_state;

pub use crate::env_var::{config, Config};
pub use crate::error::{RmaError, RmaResult};
pub use crate::lamellae::Backend;
pub use crate::remote_ops::RemoteElement;
pub use crate::rma_world::{RmaWorld, RmaWorldBuilder};
pub use crate::scalar::{RemoteInteger, RemoteScalar, ScalarKind};
pub use crate::worker::RmaWorker;
pub use crate::worker_state::{ChannelCounters, EngineState};
