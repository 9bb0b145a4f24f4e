use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;

use crate::error::{Error, Result};

/// Guest binary written to a uniquely named, owner-executable temp file for
/// the executor to bind-mount. The file is deleted when the handle drops,
/// on every exit path of the surrounding invocation.
pub(crate) struct StagedPayload {
    file: NamedTempFile,
}

impl StagedPayload {
    pub(crate) fn write(binary: &[u8]) -> Result<Self> {
        let mut file = NamedTempFile::new().map_err(Error::Stage)?;
        file.write_all(binary).map_err(Error::Stage)?;
        file.as_file().sync_all().map_err(Error::Stage)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt as _;
            let mut perms = file.as_file().metadata().map_err(Error::Stage)?.permissions();
            perms.set_mode(0o755);
            file.as_file().set_permissions(perms).map_err(Error::Stage)?;
        }

        Ok(Self { file })
    }

    pub(crate) fn path(&self) -> &Path {
        self.file.path()
    }

    /// Container name unique to this invocation: the temp file's unique name
    /// plus the harness pid. No process-wide counters involved.
    pub(crate) fn container_name(&self) -> String {
        let stem: String = self
            .path()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect();
        format!("tallybox-{}-{stem}", std::process::id())
    }
}
