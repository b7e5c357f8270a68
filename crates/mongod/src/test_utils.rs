//! Stand-in engine for tests that must not depend on a real `mongod`.
#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tempfile::TempDir;

/// Extra flag overriding a fake engine's exit delay, in seconds.
pub const EXIT_DELAY_FLAG: &str = "fakeExitDelay";

/// A shell script that records its arguments next to its `--dbpath` and
/// lingers on SIGTERM before exiting.
pub struct FakeEngine {
    _dir: TempDir,
    path: PathBuf,
}

impl FakeEngine {
    /// Engine that takes `exit_delay` to exit after SIGTERM, unless the node
    /// passes [`EXIT_DELAY_FLAG`].
    ///
    /// # Panics
    ///
    /// Panics if the script cannot be written.
    #[must_use]
    pub fn new(exit_delay: Duration) -> Self {
        let body = format!(
            r#"prev=""
dbpath=""
delay="{:.3}"
for arg in "$@"; do
  if [ "$prev" = "--dbpath" ]; then dbpath="$arg"; fi
  if [ "$prev" = "--{EXIT_DELAY_FLAG}" ]; then delay="$arg"; fi
  prev="$arg"
done
printf '%s\n' "$@" > "$dbpath.args.tmp" && mv "$dbpath.args.tmp" "$dbpath.args"
trap 'sleep "$delay"; exit 0' TERM
while :; do sleep 0.1; done
"#,
            exit_delay.as_secs_f64()
        );

        Self::with_body(&body)
    }

    /// Engine that exits with a failure right after launch.
    ///
    /// # Panics
    ///
    /// Panics if the script cannot be written.
    #[must_use]
    pub fn crashing() -> Self {
        Self::with_body("echo 'fatal assertion' >&2\nexit 14\n")
    }

    fn with_body(body: &str) -> Self {
        let dir = TempDir::new().expect("failed to create engine dir");
        let path = dir.path().join("mongod");

        std::fs::write(&path, format!("#!/bin/sh\n{body}")).expect("failed to write engine");
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
            .expect("failed to make engine executable");

        Self { _dir: dir, path }
    }

    /// Path to pass as the executable.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Waits until the engine started for `dbpath` has recorded its arguments.
    ///
    /// # Panics
    ///
    /// Panics if nothing is recorded within ten seconds.
    pub async fn wait_for_args(&self, dbpath: &Path) -> Vec<String> {
        let mut file = dbpath.as_os_str().to_owned();
        file.push(".args");
        let file = PathBuf::from(file);
        let deadline = Instant::now() + Duration::from_secs(10);

        loop {
            if let Ok(contents) = tokio::fs::read_to_string(&file).await {
                return contents.lines().map(str::to_string).collect();
            }

            assert!(Instant::now() < deadline, "engine never recorded its arguments");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

/// Whether a process with `pid` still exists.
#[must_use]
pub fn process_exists(pid: u32) -> bool {
    i32::try_from(pid).is_ok_and(|pid| {
        nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None).is_ok()
    })
}
