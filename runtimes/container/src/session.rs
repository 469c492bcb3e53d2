use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Instant;
use uuid::Uuid;

use crate::engine::ContainerId;

/// What the caller wants started for one invocation.
#[derive(Debug, Clone, Default)]
pub struct SessionRequest {
    pub image: String,
    /// Host directory mounted read-only as the function code.
    pub code_mount: PathBuf,
    pub env: BTreeMap<String, String>,
    pub debug_port: Option<u16>,
    pub entrypoint: Option<Vec<String>>,
    pub command: Vec<String>,
    pub memory_limit_mb: Option<u32>,
}

/// One running execution environment.
#[derive(Debug, Clone)]
pub struct ContainerSession {
    pub id: Uuid,
    pub container_id: ContainerId,
    pub image: String,
    pub code_mount: PathBuf,
    pub env: BTreeMap<String, String>,
    pub debug_port: Option<u16>,
    pub started_at: Instant,
}
