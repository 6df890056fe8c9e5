//! # Pipeline errors
//!
//! Every stage reports failures through [`PipelineError`]. The variant decides
//! two things for the caller: whether the failure is fatal (startup kinds
//! stop the service from starting) and which status a HTTP-style transport
//! should answer with.

use std::fmt::Display;
use crate::message::Status;

/// Convenience alias used across the crate.
pub type Result<T, E = PipelineError> = std::result::Result<T, E>;

/// Classified failure raised by a converter, an inferer or the pipeline itself.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    /// A required init argument is missing or malformed.
    #[error("config error: {0}")]
    Config(String),

    /// Auxiliary data (label files, vocabularies) could not be read.
    #[error("resource error: {0}")]
    Resource(String),

    /// Model artifacts could not be parsed during `load`.
    #[error("load error: {0}")]
    Load(String),

    /// The request is structurally invalid.
    #[error("input error: {0}")]
    Input(String),

    /// The model output is empty or does not have the expected shape.
    #[error("output error: {0}")]
    Output(String),

    /// The inputs handed to the inferer do not match the model signature.
    #[error("infer error: {0}")]
    Infer(String),

    /// The per-request user-data slot was misused.
    #[error("context error: {0}")]
    Context(String),
}

/// The kind of a [`PipelineError`], without its message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Config,
    Resource,
    Load,
    Input,
    Output,
    Infer,
    Context,
}

impl PipelineError {
    pub fn config(msg: impl Display) -> Self {
        Self::Config(msg.to_string())
    }

    pub fn resource(msg: impl Display) -> Self {
        Self::Resource(msg.to_string())
    }

    pub fn load(msg: impl Display) -> Self {
        Self::Load(msg.to_string())
    }

    pub fn input(msg: impl Display) -> Self {
        Self::Input(msg.to_string())
    }

    pub fn output(msg: impl Display) -> Self {
        Self::Output(msg.to_string())
    }

    pub fn infer(msg: impl Display) -> Self {
        Self::Infer(msg.to_string())
    }

    pub fn context(msg: impl Display) -> Self {
        Self::Context(msg.to_string())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) => ErrorKind::Config,
            Self::Resource(_) => ErrorKind::Resource,
            Self::Load(_) => ErrorKind::Load,
            Self::Input(_) => ErrorKind::Input,
            Self::Output(_) => ErrorKind::Output,
            Self::Infer(_) => ErrorKind::Infer,
            Self::Context(_) => ErrorKind::Context,
        }
    }

    /// The human readable message, without the kind prefix.
    pub fn message(&self) -> &str {
        match self {
            Self::Config(msg)
            | Self::Resource(msg)
            | Self::Load(msg)
            | Self::Input(msg)
            | Self::Output(msg)
            | Self::Infer(msg)
            | Self::Context(msg) => msg,
        }
    }

    /// Startup-time failures. The service must not start when one of these is raised.
    pub fn is_fatal(&self) -> bool {
        matches!(self.kind(), ErrorKind::Config | ErrorKind::Resource | ErrorKind::Load)
    }

    /// Status a HTTP-style transport answers with for this failure.
    ///
    /// Malformed or missing input is a client error, everything else is on the server.
    pub fn status(&self) -> Status {
        match self.kind() {
            ErrorKind::Input => Status::BAD_REQUEST,
            _ => Status::INTERNAL_SERVER_ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(PipelineError::input("bad").status(), Status::BAD_REQUEST);
        assert_eq!(PipelineError::output("empty").status(), Status::INTERNAL_SERVER_ERROR);
        assert_eq!(PipelineError::infer("shape").status(), Status::INTERNAL_SERVER_ERROR);
        assert_eq!(PipelineError::context("slot").status(), Status::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_fatal_kinds() {
        assert!(PipelineError::config("x").is_fatal());
        assert!(PipelineError::resource("x").is_fatal());
        assert!(PipelineError::load("x").is_fatal());
        assert!(!PipelineError::input("x").is_fatal());
        assert!(!PipelineError::infer("x").is_fatal());
    }

    #[test]
    fn test_message_strips_kind() {
        let err = PipelineError::input("Json format error.");
        assert_eq!(err.message(), "Json format error.");
        assert_eq!(err.to_string(), "input error: Json format error.");
        assert_eq!(err.kind(), ErrorKind::Input);
    }
}
