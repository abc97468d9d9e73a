//! Error types for the streaming engine

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the engine
#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("missing file: {}", .0.display())]
    MissingFile(PathBuf),

    #[error("invalid cloud description: {0}")]
    CloudDescription(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid node key {0:?}")]
    InvalidKey(String),

    #[error("binary record error: {0}")]
    Binary(#[from] binrw::Error),

    #[error("hierarchy fragment for {0} holds no complete record")]
    EmptyHierarchy(String),

    #[error("unknown node {0}")]
    UnknownNode(String),

    #[error("node {0} has a load or refresh in flight and cannot be evicted")]
    NodeBusy(String),

    #[error("no cached ancestor of {0} can reload its hierarchy")]
    NoHierarchyAncestor(String),

    #[error("load queue is full")]
    QueueFull,

    #[error("loader pool has shut down")]
    LoaderClosed,

    #[error("{0} loads still in flight")]
    LoadsInFlight(usize),
}
