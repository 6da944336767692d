use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Graph build error: {0}")]
    GraphBuild(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Workspace error for task {task_id}: {message}")]
    Workspace { task_id: String, message: String },

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Session {id} is {state}, expected idle")]
    SessionNotIdle { id: String, state: String },

    #[error("Session pool is full (max: {max})")]
    SessionPoolFull { max: usize },

    #[error("Worker binary not found: {0}")]
    WorkerBinaryNotFound(String),

    #[error("Worker spawn failed: {0}")]
    SpawnFailed(String),
}

pub type Result<T> = std::result::Result<T, Error>;
