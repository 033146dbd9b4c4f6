//! Git checkout for `POST /api/functions/deploy/git`. The actual clone is
//! an external collaborator (network I/O, credentials, shallow-clone
//! policy are all out of scope); this trait is the seam the deploy
//! endpoint calls through, with one real implementation that shells out to
//! the system `git` binary the same way `hangar-deploy`'s `CargoTestRunner`
//! shells out to `cargo`.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::process::Stdio;

use tokio::process::Command;

#[derive(Debug)]
pub struct GitCloneError(pub String);

impl std::fmt::Display for GitCloneError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "git checkout failed: {}", self.0)
    }
}

impl std::error::Error for GitCloneError {}

pub trait GitCloner: Send + Sync {
    fn checkout<'a>(
        &'a self,
        repo: &'a str,
        branch: Option<&'a str>,
        commit: Option<&'a str>,
        dest: &'a Path,
    ) -> Pin<Box<dyn Future<Output = Result<(), GitCloneError>> + Send + 'a>>;
}

/// Clones `repo` into `dest`, optionally on `branch`, then checks out
/// `commit` if given.
pub struct SystemGitCloner;

impl GitCloner for SystemGitCloner {
    fn checkout<'a>(
        &'a self,
        repo: &'a str,
        branch: Option<&'a str>,
        commit: Option<&'a str>,
        dest: &'a Path,
    ) -> Pin<Box<dyn Future<Output = Result<(), GitCloneError>> + Send + 'a>> {
        Box::pin(async move {
            let mut clone = Command::new("git");
            clone.arg("clone");
            if let Some(branch) = branch {
                clone.arg("--branch").arg(branch);
            }
            clone.arg(repo).arg(dest);
            run(clone).await?;

            if let Some(commit) = commit {
                let mut checkout = Command::new("git");
                checkout.arg("-C").arg(dest).arg("checkout").arg(commit);
                run(checkout).await?;
            }
            Ok(())
        })
    }
}

async fn run(mut command: Command) -> Result<(), GitCloneError> {
    let output = command
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| GitCloneError(e.to_string()))?;
    if output.status.success() {
        Ok(())
    } else {
        Err(GitCloneError(String::from_utf8_lossy(&output.stderr).into_owned()))
    }
}

/// Returns `Ok(())` without touching the filesystem — used in tests that
/// exercise the deploy endpoint without a real git binary or network.
pub struct StubGitCloner;

impl GitCloner for StubGitCloner {
    fn checkout<'a>(
        &'a self,
        _repo: &'a str,
        _branch: Option<&'a str>,
        _commit: Option<&'a str>,
        _dest: &'a Path,
    ) -> Pin<Box<dyn Future<Output = Result<(), GitCloneError>> + Send + 'a>> {
        Box::pin(async { Ok(()) })
    }
}
