//! App - アプリケーション層
//!
//! ports を組み合わせてワーカーの振る舞いを実装します。
//!
//! # 主要コンポーネント
//! - **VoteProcessor**: 1 件分の処理（dequeue→decode→normalize→persist→requeue）
//! - **WorkerLoop**: VoteProcessor を停止要求まで回し続けるループ
//! - **WorkerBuilder**: ループの構築とワイヤリング
//! - **HealthChecker**: Redis / MySQL の疎通確認
//! - **LoadGenerator**: 負荷試験用のトラフィック生成

pub mod builder;
pub mod load_generator;
pub mod processor;
pub mod status;
pub mod worker_loop;

// 主要な型を再エクスポート
pub use self::builder::{BuildError, WorkerBuilder, WorkerConfig};
pub use self::load_generator::{LoadConfig, LoadError, LoadGenerator, LoadReport};
pub use self::processor::{ProcessorSettings, VoteProcessor};
pub use self::status::{ConnectionState, HealthChecker, HealthReport, HealthStatus};
pub use self::worker_loop::{LoopSettings, LoopStats, WorkerHandle, WorkerLoop, WorkerState};
