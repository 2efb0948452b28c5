//! Impls - 開発用・テスト用の実装
//!
//! # 含まれる実装
//! - **InMemoryVoteQueue**: Redis list の代わり
//! - **InMemoryVoteStore**: `votes` テーブルの代わり
//!
//! # 本番用実装
//! 本番用の実装は別クレートに配置します：
//! - `ballot-redis`: RedisVoteQueue
//! - `ballot-mysql`: MySqlVoteStore

pub mod inmem_queue;
pub mod inmem_store;

pub use self::inmem_queue::InMemoryVoteQueue;
pub use self::inmem_store::{InMemoryVoteStore, StoredVote};
