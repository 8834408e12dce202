// SPDX-License-Identifier: CEPL-1.0
use crate::model::ModelError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RenderError {
    /// No adapter, format, present mode or feature that satisfies the renderer.
    #[error("missing capability: {0}")]
    CapabilityMissing(String),

    #[error("failed to create {what}: {reason}")]
    CreationFailed { what: &'static str, reason: String },

    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Model(#[from] ModelError),

    /// A steady-state device call failed. Never used for swap-chain invalidation.
    #[error("{call} failed: {reason}")]
    Device { call: &'static str, reason: String },

    /// Swap-chain dependent resources are gone after a failed rebuild.
    #[error("surface resources are not available")]
    SurfaceLost,
}

impl RenderError {
    pub fn creation(what: &'static str, reason: impl std::fmt::Display) -> Self {
        Self::CreationFailed {
            what,
            reason: reason.to_string(),
        }
    }

    pub fn device(call: &'static str, reason: impl std::fmt::Display) -> Self {
        Self::Device {
            call,
            reason: reason.to_string(),
        }
    }

    /// Reads a whole file, mapping a missing file to [`RenderError::FileNotFound`].
    pub fn read_file(path: &std::path::Path) -> Result<Vec<u8>, RenderError> {
        std::fs::read(path).map_err(|source| match source.kind() {
            std::io::ErrorKind::NotFound => RenderError::FileNotFound(path.to_path_buf()),
            _ => RenderError::Io {
                path: path.to_path_buf(),
                source,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_its_own_kind() {
        let dir = tempfile::tempdir().unwrap();
        let err = RenderError::read_file(&dir.path().join("nope.spv")).unwrap_err();
        assert!(matches!(err, RenderError::FileNotFound(p) if p.ends_with("nope.spv")));
    }

    #[test]
    fn messages_name_the_failed_step() {
        let err = RenderError::creation("shadow render pass", "ERROR_OUT_OF_HOST_MEMORY");
        assert_eq!(
            err.to_string(),
            "failed to create shadow render pass: ERROR_OUT_OF_HOST_MEMORY"
        );
    }
}
