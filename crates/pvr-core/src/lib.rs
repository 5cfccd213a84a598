//! pvr-core
//!
//! Recording scheduling core for a set-top box PVR.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, job / task, status, query, events, errors, folder）
//! - **ports**: 抽象化レイヤー（SchedulerStore, RemoteRecorder, EpgLookup, ConflictStrategy, ...）
//! - **app**: アプリケーションロジック（builder, manager, event pump, cache, orchestrator）
//! - **impls**: 実装（InMemoryStore など開発用）
//! - **config**: 設定の読み込みと検証

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;
