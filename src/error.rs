use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("setup failed: {0}")]
    Setup(String),
    #[error("config file invalid or unreadable: {0}")]
    InvalidConfig(String),
    #[error("output {} is locked by another harvester (pid {pid})", path.display())]
    Locked { path: PathBuf, pid: String },
    #[error("failed to persist batch to {}: {source}", path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl HarvestError {
    pub fn exit_class(&self) -> ExitClass {
        match self {
            Self::Setup(_) | Self::InvalidConfig(_) | Self::Locked { .. } => {
                ExitClass::SetupFailure
            }
            Self::Persistence { .. } => ExitClass::RunFailure,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitClass {
    SetupFailure,
    RunFailure,
}

impl ExitClass {
    pub fn code(self) -> i32 {
        match self {
            Self::SetupFailure => 1,
            Self::RunFailure => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::SetupFailure => "E001_SETUP",
            Self::RunFailure => "E002_MID_RUN",
        }
    }
}

/// Picks the exit class from the first `HarvestError` in the chain. Errors
/// that never reached the harvest loop count as setup failures.
pub fn exit_class_for(err: &anyhow::Error) -> ExitClass {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<HarvestError>())
        .map(HarvestError::exit_class)
        .unwrap_or(ExitClass::SetupFailure)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn persistence_errors_map_to_mid_run_exit() {
        let err = HarvestError::Persistence {
            path: PathBuf::from("out.csv"),
            source: std::io::Error::other("disk full"),
        };
        assert_eq!(err.exit_class().code(), 2);
    }

    #[test]
    fn wrapped_setup_error_is_found_in_chain() {
        let err: anyhow::Result<()> = Err(HarvestError::Setup("chat frame not found".into()).into());
        let err = err.context("harvest failed").unwrap_err();
        assert_eq!(exit_class_for(&err), ExitClass::SetupFailure);
    }

    #[test]
    fn untyped_errors_default_to_setup_failure() {
        let err = anyhow::anyhow!("bad argument");
        assert_eq!(exit_class_for(&err).code(), 1);
    }
}
