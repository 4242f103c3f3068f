//! Seam between the protocol and the proving-key toolkit.
//!
//! Everything cryptographic happens behind [`ProvingToolkit`]; the roles only
//! see verdicts and produced files. The production implementation shells out
//! to a snarkjs-compatible CLI, tests script their own.

use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crate::errors::{CeremonyError, Result};

/// Outcome of one bounded verification call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Valid,
    Invalid { detail: String },
    TimedOut,
}

pub trait ProvingToolkit {
    /// Synthesizes the deterministic base key (entry 0) from the pinned
    /// parameters.
    fn setup(&self, r1cs: &Path, ptau: &Path, out: &Path) -> Result<()>;

    /// Extends a predecessor key with fresh entropy.
    fn contribute(&self, prev_key: &Path, entropy_hex: &str, label: &str, out: &Path)
        -> Result<()>;

    /// Cryptographically verifies one key against the pinned parameters,
    /// bounded by a wall-clock timeout.
    fn verify(&self, r1cs: &Path, ptau: &Path, key: &Path, timeout: Duration) -> Result<Verdict>;

    /// Applies the public beacon value as the closing contribution.
    fn beacon(&self, prev_key: &Path, beacon_hex: &str, strength: u32, out: &Path) -> Result<()>;

    fn export_verification_key(&self, key: &Path, out: &Path) -> Result<()>;

    /// Cheap availability check, used as the first verification pass.
    fn preflight(&self) -> Result<()>;
}

/// snarkjs-compatible CLI toolkit.
pub struct SnarkCli {
    cmd: String,
}

impl SnarkCli {
    pub fn new(cmd: impl Into<String>) -> Self {
        SnarkCli { cmd: cmd.into() }
    }

    fn run(&self, args: &[&str]) -> Result<()> {
        let output = Command::new(&self.cmd)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| CeremonyError::Toolkit(format!("failed to launch {}: {}", self.cmd, e)))?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        let tail: String = stderr
            .lines()
            .rev()
            .take(3)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect::<Vec<_>>()
            .join("; ");
        Err(CeremonyError::Toolkit(format!(
            "{} {} exited with {}: {}",
            self.cmd,
            args.first().copied().unwrap_or(""),
            output.status,
            tail
        )))
    }
}

/// Polls the child until it exits or the deadline passes. Returns None after
/// killing a child that ran out of time.
fn wait_bounded(child: &mut Child, timeout: Duration) -> Result<Option<ExitStatus>> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            // the child may have exited in the meantime, kill errors are moot
            let _ = child.kill();
            let _ = child.wait();
            return Ok(None);
        }
        thread::sleep(Duration::from_millis(200));
    }
}

impl ProvingToolkit for SnarkCli {
    fn setup(&self, r1cs: &Path, ptau: &Path, out: &Path) -> Result<()> {
        self.run(&[
            "zkey",
            "new",
            &r1cs.to_string_lossy(),
            &ptau.to_string_lossy(),
            &out.to_string_lossy(),
        ])
    }

    fn contribute(
        &self,
        prev_key: &Path,
        entropy_hex: &str,
        label: &str,
        out: &Path,
    ) -> Result<()> {
        self.run(&[
            "zkey",
            "contribute",
            &prev_key.to_string_lossy(),
            &out.to_string_lossy(),
            &format!("--name={label}"),
            &format!("-e={entropy_hex}"),
        ])
    }

    fn verify(&self, r1cs: &Path, ptau: &Path, key: &Path, timeout: Duration) -> Result<Verdict> {
        let (r1cs, ptau, key) = (
            r1cs.to_string_lossy(),
            ptau.to_string_lossy(),
            key.to_string_lossy(),
        );
        let args: [&str; 5] = ["zkey", "verify", &r1cs, &ptau, &key];
        let mut child = Command::new(&self.cmd)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| CeremonyError::Toolkit(format!("failed to launch {}: {}", self.cmd, e)))?;
        match wait_bounded(&mut child, timeout)? {
            Some(status) if status.success() => Ok(Verdict::Valid),
            Some(status) => Ok(Verdict::Invalid {
                detail: format!("verifier exited with {status}"),
            }),
            None => Ok(Verdict::TimedOut),
        }
    }

    fn beacon(&self, prev_key: &Path, beacon_hex: &str, strength: u32, out: &Path) -> Result<()> {
        self.run(&[
            "zkey",
            "beacon",
            &prev_key.to_string_lossy(),
            &out.to_string_lossy(),
            beacon_hex,
            &strength.to_string(),
        ])
    }

    fn export_verification_key(&self, key: &Path, out: &Path) -> Result<()> {
        self.run(&[
            "zkey",
            "export",
            "verificationkey",
            &key.to_string_lossy(),
            &out.to_string_lossy(),
        ])
    }

    fn preflight(&self) -> Result<()> {
        let status = Command::new(&self.cmd)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|e| CeremonyError::Toolkit(format!("{} is not runnable: {}", self.cmd, e)))?;
        if !status.success() {
            return Err(CeremonyError::Toolkit(format!(
                "{} --version exited with {}",
                self.cmd, status
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testkit {
    //! Scripted toolkit shared by the role tests. Writes small deterministic
    //! payloads instead of real keys and records every call it receives.

    use std::cell::RefCell;
    use std::collections::HashSet;
    use std::fs;
    use std::path::Path;
    use std::time::Duration;

    use super::{ProvingToolkit, Verdict};
    use crate::errors::{CeremonyError, Result};

    #[derive(Default)]
    pub struct ScriptedToolkit {
        /// File names whose verification is scripted to fail.
        pub invalid: HashSet<String>,
        /// File names whose verification is scripted to run out of time.
        pub slow: HashSet<String>,
        /// File names whose verification is scripted to not run at all.
        pub failing: HashSet<String>,
        /// When set, every invocation fails as if the binary were missing.
        pub unavailable: bool,
        pub calls: RefCell<Vec<String>>,
    }

    impl ScriptedToolkit {
        pub fn new() -> Self {
            ScriptedToolkit::default()
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.borrow().clone()
        }

        fn record(&self, op: &str, subject: &Path) -> Result<()> {
            if self.unavailable {
                return Err(CeremonyError::Toolkit("scripted outage".to_string()));
            }
            self.calls
                .borrow_mut()
                .push(format!("{}:{}", op, file_name(subject)));
            Ok(())
        }

        fn write_key(out: &Path, tag: &str) -> Result<()> {
            let mut payload = format!("scripted key [{tag}] {}\n", file_name(out)).into_bytes();
            payload.resize(4096, b'.');
            fs::write(out, payload)?;
            Ok(())
        }
    }

    pub fn file_name(path: &Path) -> String {
        path.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    impl ProvingToolkit for ScriptedToolkit {
        fn setup(&self, _r1cs: &Path, _ptau: &Path, out: &Path) -> Result<()> {
            self.record("setup", out)?;
            Self::write_key(out, "base")
        }

        fn contribute(
            &self,
            prev_key: &Path,
            _entropy_hex: &str,
            label: &str,
            out: &Path,
        ) -> Result<()> {
            self.record("contribute", out)?;
            Self::write_key(out, &format!("{}<-{}", label, file_name(prev_key)))
        }

        fn verify(
            &self,
            _r1cs: &Path,
            _ptau: &Path,
            key: &Path,
            _timeout: Duration,
        ) -> Result<Verdict> {
            self.record("verify", key)?;
            let name = file_name(key);
            if self.failing.contains(&name) {
                return Err(CeremonyError::Toolkit(format!("scripted failure for {name}")));
            }
            if self.slow.contains(&name) {
                return Ok(Verdict::TimedOut);
            }
            if self.invalid.contains(&name) {
                return Ok(Verdict::Invalid {
                    detail: "scripted rejection".to_string(),
                });
            }
            Ok(Verdict::Valid)
        }

        fn beacon(
            &self,
            prev_key: &Path,
            beacon_hex: &str,
            _strength: u32,
            out: &Path,
        ) -> Result<()> {
            self.record("beacon", out)?;
            Self::write_key(out, &format!("beacon {beacon_hex}<-{}", file_name(prev_key)))
        }

        fn export_verification_key(&self, key: &Path, out: &Path) -> Result<()> {
            self.record("export", out)?;
            fs::write(out, format!("{{\"vkey_for\":\"{}\"}}\n", file_name(key)))?;
            Ok(())
        }

        fn preflight(&self) -> Result<()> {
            if self.unavailable {
                return Err(CeremonyError::Toolkit("scripted outage".to_string()));
            }
            self.calls.borrow_mut().push("preflight".to_string());
            Ok(())
        }
    }
}
