use bytes::Bytes;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RouteError {
    #[error("Route conflict: {method} {path} is declared by both {first} and {second}")]
    Conflict {
        method: String,
        path: String,
        first: String,
        second: String,
    },
    
    #[error("Invalid path {path} in {function}: {reason}")]
    InvalidPattern {
        function: String,
        path: String,
        reason: String,
    },
}

impl RouteError {
    /// Names of every function the error is attributable to.
    pub fn functions(&self) -> Vec<&str> {
        match self {
            RouteError::Conflict { first, second, .. } => vec![first.as_str(), second.as_str()],
            RouteError::InvalidPattern { function, .. } => vec![function.as_str()],
        }
    }
}

#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("Unsupported runtime: {0}")]
    UnsupportedRuntime(String),
    
    #[error("Code directory not found: {}", .0.display())]
    CodePathNotFound(PathBuf),
    
    #[error("Invalid environment override file {}: {reason}", .path.display())]
    InvalidOverrideFile { path: PathBuf, reason: String },
}

#[derive(Error, Debug)]
pub enum ContainerError {
    #[error("Failed to start container from {image}: {reason}")]
    Start { image: String, reason: String },
    
    #[error("Timeout exceeded after {0:?}")]
    Timeout(Duration),
    
    #[error("Container exited with code {exit_code} before responding")]
    Crash {
        exit_code: i64,
        stdout: Bytes,
        diagnostics: String,
    },
    
    #[error("Container engine error: {0}")]
    Engine(String),
}

#[derive(Error, Debug)]
pub enum FramingError {
    #[error("Function returned an empty response")]
    EmptyResponse,
    
    #[error(
        "Function returned an invalid response (must include one of: body, headers or \
         statusCode in the response object): {0}"
    )]
    InvalidResponse(String),
    
    #[error("Failed to encode invocation payload: {0}")]
    Encode(String),
}

#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("Failed to read template {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    
    #[error("Failed to parse template: {0}")]
    Parse(String),
    
    #[error("Invalid template: {0}")]
    Invalid(String),
}
