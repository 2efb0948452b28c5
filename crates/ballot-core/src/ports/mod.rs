//! Ports - 抽象化レイヤー
//!
//! Each trait is the seam to one external collaborator. The processing loop
//! only ever talks to these traits; Redis and MySQL live in their own crates
//! (`ballot-redis`, `ballot-mysql`), in-memory versions in [`crate::impls`].

pub mod clock;
pub mod vote_queue;
pub mod vote_store;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::vote_queue::{QueueError, VoteQueue};
pub use self::vote_store::{StoreError, VoteStore};
