//! A single external renderer invocation.

use crate::error::StageFailureKind;
use crate::workspace::ArtifactPaths;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::fs::File;
use tokio::process::Command;

/// Program plus argument list, with optional stdin/stdout redirection to
/// files and the output files it must leave behind.
///
/// Arguments and paths may contain placeholders such as `{source}` or
/// `{raster}`, resolved against the run directory at execution time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub stdin: Option<String>,
    pub stdout: Option<String>,
    pub outputs: Vec<String>,
}

impl Invocation {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            stdin: None,
            stdout: None,
            outputs: Vec::new(),
        }
    }

    pub fn stdin_from(mut self, path: impl Into<String>) -> Self {
        self.stdin = Some(path.into());
        self
    }

    /// Capture stdout into `path`; the file becomes a required output.
    pub fn stdout_to(mut self, path: impl Into<String>) -> Self {
        let path = path.into();
        self.outputs.push(path.clone());
        self.stdout = Some(path);
        self
    }

    pub fn produces(mut self, path: impl Into<String>) -> Self {
        self.outputs.push(path.into());
        self
    }

    /// Run to completion inside the run directory.
    ///
    /// Success means exit status 0 within `timeout` and every declared output
    /// present and non-empty afterwards. The child is killed if the timeout
    /// expires.
    pub async fn run(&self, paths: &ArtifactPaths, timeout: Duration) -> Result<(), StageFailureKind> {
        let mut cmd = Command::new(&self.program);
        cmd.args(self.args.iter().map(|a| paths.expand(a)))
            .current_dir(paths.dir())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        match &self.stdin {
            Some(p) => {
                let path = PathBuf::from(paths.expand(p));
                let file = match File::open(&path).await {
                    Ok(f) => f.into_std().await,
                    Err(source) => return Err(StageFailureKind::Io { path, source }),
                };
                cmd.stdin(Stdio::from(file));
            }
            None => {
                cmd.stdin(Stdio::null());
            }
        }
        match &self.stdout {
            Some(p) => {
                let path = PathBuf::from(paths.expand(p));
                let file = match File::create(&path).await {
                    Ok(f) => f.into_std().await,
                    Err(source) => return Err(StageFailureKind::Io { path, source }),
                };
                cmd.stdout(Stdio::from(file));
            }
            None => {
                cmd.stdout(Stdio::null());
            }
        }

        tracing::debug!(program = %self.program, args = ?self.args, "spawning renderer");
        let child = cmd.spawn().map_err(|source| StageFailureKind::Spawn {
            program: self.program.clone(),
            source,
        })?;

        // Dropping the future on timeout drops the child, which kills it.
        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(source)) => {
                return Err(StageFailureKind::Io {
                    path: paths.dir().to_path_buf(),
                    source,
                })
            }
            Err(_) => {
                return Err(StageFailureKind::Timeout {
                    program: self.program.clone(),
                    timeout,
                })
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            tracing::debug!(program = %self.program, stderr = %stderr.trim(), "renderer failed");
            return Err(StageFailureKind::NonZeroExit {
                program: self.program.clone(),
                status: output.status,
                stderr: stderr.into_owned(),
            });
        }

        // Captured stdout files exist before the program runs, so an empty
        // output counts as missing.
        for out in &self.outputs {
            let path = PathBuf::from(paths.expand(out));
            match tokio::fs::metadata(&path).await {
                Ok(meta) if meta.len() > 0 => {}
                _ => return Err(StageFailureKind::MissingOutput(path)),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Invocation {
        Invocation::new("sh", ["-c", script])
    }

    fn paths(dir: &std::path::Path) -> ArtifactPaths {
        ArtifactPaths::new(dir, None)
    }

    #[tokio::test]
    async fn redirects_stdin_and_stdout_through_files() {
        let tmp = tempfile::tempdir().unwrap();
        let p = paths(tmp.path());
        std::fs::write(&p.source, "print('hi')").unwrap();

        Invocation::new("cat", Vec::<String>::new())
            .stdin_from("{source}")
            .stdout_to("{model}")
            .run(&p, Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(std::fs::read_to_string(&p.model).unwrap(), "print('hi')");
    }

    #[tokio::test]
    async fn nonzero_exit_is_a_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let err = sh("exit 3")
            .run(&paths(tmp.path()), Duration::from_secs(5))
            .await
            .unwrap_err();
        match err {
            StageFailureKind::NonZeroExit { program, status, .. } => {
                assert_eq!(program, "sh");
                assert_eq!(status.code(), Some(3));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn zero_exit_without_declared_output_is_a_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let p = paths(tmp.path());
        let err = sh("true")
            .produces("{raster}")
            .run(&p, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, StageFailureKind::MissingOutput(ref path) if *path == p.raster));
    }

    #[tokio::test]
    async fn silent_program_leaves_captured_output_missing() {
        let tmp = tempfile::tempdir().unwrap();
        let p = paths(tmp.path());
        let err = sh("true")
            .stdout_to("{model}")
            .run(&p, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, StageFailureKind::MissingOutput(ref path) if *path == p.model));
    }

    #[tokio::test]
    async fn placeholders_reach_the_program() {
        let tmp = tempfile::tempdir().unwrap();
        let p = paths(tmp.path());
        Invocation::new("sh", ["-c", "echo rendered > \"$1\"", "sh", "{raster}"])
            .produces("{raster}")
            .run(&p, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(&p.raster).unwrap().trim(), "rendered");
    }

    #[tokio::test]
    async fn hung_renderer_times_out() {
        let tmp = tempfile::tempdir().unwrap();
        let started = std::time::Instant::now();
        let err = sh("sleep 30")
            .run(&paths(tmp.path()), Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, StageFailureKind::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn missing_program_fails_to_spawn() {
        let tmp = tempfile::tempdir().unwrap();
        let err = Invocation::new("definitely-not-a-renderer-xyz", ["--version"])
            .run(&paths(tmp.path()), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, StageFailureKind::Spawn { .. }));
    }
}
