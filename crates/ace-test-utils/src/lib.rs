//! Test fixtures
//!
//! A scripted fake agent executable plus credential doubles, shared by the
//! engine integration tests. The fake agent is a shell script written into a
//! temp directory; each constructor captures one behavior the engine has to
//! handle.

#![warn(unreachable_pub)]
#![allow(missing_docs)]

use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::Arc;

use ace_auth::CredentialProvider;
use ace_types::{Credential, CredentialSource};
use async_trait::async_trait;
use tempfile::TempDir;

/// A fake agent executable backed by a shell script.
///
/// Keep the [`FakeAgent`] alive for as long as the executable is needed;
/// dropping it deletes the script.
pub struct FakeAgent {
    dir: TempDir,
    path: PathBuf,
}

impl FakeAgent {
    /// A fake agent running an arbitrary script body.
    ///
    /// # Panics
    /// Panics when the fixture cannot be written; fixtures are test-only.
    #[must_use]
    pub fn scripted(body: &str) -> Self {
        let dir = tempfile::tempdir().expect("create fixture dir");
        let path = dir.path().join("fake-agent.sh");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write fixture script");
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
            .expect("mark fixture executable");
        Self { dir, path }
    }

    /// Emits the given stdout lines, then exits 0.
    #[must_use]
    pub fn emitting(lines: &[&str]) -> Self {
        let body = lines
            .iter()
            .map(|line| format!("echo '{}'", line.replace('\'', r"'\''")))
            .collect::<Vec<_>>()
            .join("\n");
        Self::scripted(&body)
    }

    /// Emits lines with a pause before each one, then exits 0.
    #[must_use]
    pub fn emitting_slowly(lines: &[&str], pause_secs: f64) -> Self {
        let body = lines
            .iter()
            .map(|line| {
                format!(
                    "sleep {pause_secs}\necho '{}'",
                    line.replace('\'', r"'\''")
                )
            })
            .collect::<Vec<_>>()
            .join("\n");
        Self::scripted(&body)
    }

    /// Sleeps far past any test deadline without producing output.
    #[must_use]
    pub fn hanging() -> Self {
        Self::scripted("sleep 600")
    }

    /// Hangs on the first invocation, succeeds on later ones.
    ///
    /// Invocation count is kept in a marker file next to the script, so the
    /// retry behavior survives process boundaries.
    #[must_use]
    pub fn hanging_once_then(lines: &[&str]) -> Self {
        let echoes = lines
            .iter()
            .map(|line| format!("echo '{}'", line.replace('\'', r"'\''")))
            .collect::<Vec<_>>()
            .join("\n");
        let body = format!(
            "marker=\"$(dirname \"$0\")/first-run-done\"\n\
             if [ ! -f \"$marker\" ]; then\n\
             touch \"$marker\"\n\
             sleep 600\n\
             fi\n\
             {echoes}"
        );
        Self::scripted(&body)
    }

    /// Writes the given stderr line and exits with the given status.
    #[must_use]
    pub fn failing(stderr_line: &str, status: i32) -> Self {
        let body = format!(
            "echo '{}' >&2\nexit {status}",
            stderr_line.replace('\'', r"'\''")
        );
        Self::scripted(&body)
    }

    /// Fails with the given stderr line until `failures` invocations have
    /// happened, then emits the lines and exits 0.
    #[must_use]
    pub fn failing_then_emitting(stderr_line: &str, failures: u32, lines: &[&str]) -> Self {
        let echoes = lines
            .iter()
            .map(|line| format!("echo '{}'", line.replace('\'', r"'\''")))
            .collect::<Vec<_>>()
            .join("\n");
        let body = format!(
            "counter=\"$(dirname \"$0\")/invocations\"\n\
             count=$(cat \"$counter\" 2>/dev/null || echo 0)\n\
             count=$((count + 1))\n\
             echo \"$count\" > \"$counter\"\n\
             if [ \"$count\" -le {failures} ]; then\n\
             echo '{stderr}' >&2\n\
             exit 1\n\
             fi\n\
             {echoes}",
            stderr = stderr_line.replace('\'', r"'\''"),
        );
        Self::scripted(&body)
    }

    /// Echoes whatever arrives on stdin, prefixed, then exits 0.
    #[must_use]
    pub fn echoing_stdin() -> Self {
        Self::scripted("while read line; do echo \"stdin:$line\"; done")
    }

    /// Path to the executable script
    #[must_use]
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// The fixture directory, for tests that need to plant extra files
    #[must_use]
    pub fn dir(&self) -> &std::path::Path {
        self.dir.path()
    }
}

/// A credential provider that always hands out the same token
pub struct StaticCredentialProvider {
    token: String,
}

impl StaticCredentialProvider {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    /// Wrapped in an `Arc` for direct use as a gate tier
    #[must_use]
    pub fn shared(token: impl Into<String>) -> Arc<Self> {
        Arc::new(Self::new(token))
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentialProvider {
    async fn get_credential(&self, _scopes: &[String]) -> Result<Credential, String> {
        Ok(Credential::new(CredentialSource::OAuth, self.token.clone()))
    }
}

/// A credential provider that always refuses
pub struct RefusingCredentialProvider;

#[async_trait]
impl CredentialProvider for RefusingCredentialProvider {
    async fn get_credential(&self, _scopes: &[String]) -> Result<Credential, String> {
        Err("consent refused".to_string())
    }
}
