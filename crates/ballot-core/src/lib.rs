//! ballot-core
//!
//! Core building blocks for the vote queue worker.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（vote payload, timestamp の正規化, outcome）
//! - **ports**: 抽象化レイヤー（VoteQueue, VoteStore, Clock）
//! - **app**: アプリケーションロジック（processor, worker_loop, builder, status, load_generator）
//! - **impls**: 実装（InMemoryVoteQueue など開発用）
//! - **observability**: カウンタとヒストグラム、Prometheus テキスト形式への出力

pub mod app;
pub mod domain;
pub mod impls;
pub mod observability;
pub mod ports;
