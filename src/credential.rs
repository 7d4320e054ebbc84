//! Elevated-privilege credential handling.
//!
//! The sudo password is held in memory for the duration of a run and handed
//! to `sudo -S` through the child's stdin. It never appears in an argument
//! vector, and every line that crosses a logging or event boundary is passed
//! through [`Credential::redact`] first.

use std::fmt;
use std::io::Write;
use std::process::{Command, Stdio};

use tracing::info;

/// Replacement text for redacted secrets
pub const REDACTED: &str = "[REDACTED]";

/// Opaque sudo credential. `Debug` and `Display` never reveal the secret.
#[derive(Clone)]
pub struct Credential {
    secret: String,
}

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        let mut secret = secret.into();
        // A trailing newline from a piped password would become part of the secret
        while secret.ends_with('\n') || secret.ends_with('\r') {
            secret.pop();
        }
        Self { secret }
    }

    pub fn is_empty(&self) -> bool {
        self.secret.is_empty()
    }

    /// Replace every occurrence of the secret in `text`
    pub fn redact(&self, text: &str) -> String {
        if self.secret.is_empty() || !text.contains(&self.secret) {
            return text.to_string();
        }
        text.replace(&self.secret, REDACTED)
    }

    /// Write the secret followed by a newline, the format `sudo -S` reads
    pub(crate) fn write_to(&self, mut writer: impl Write) -> std::io::Result<()> {
        writer.write_all(self.secret.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential").field("secret", &REDACTED).finish()
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

/// How privileged commands are executed
#[derive(Debug, Clone, Default)]
pub enum Privilege {
    /// Run privileged commands as-is (already root, or tests)
    #[default]
    Direct,
    /// Wrap privileged commands in `sudo -S` fed with this credential
    Sudo(Credential),
}

impl Privilege {
    /// Pick `Direct` when the process already runs as root.
    ///
    /// Without a credential sudo gets no stdin at all, which works for
    /// NOPASSWD rules and cached timestamps.
    pub fn detect(credential: Option<Credential>) -> Self {
        if nix::unistd::geteuid().is_root() {
            return Self::Direct;
        }
        Self::Sudo(credential.unwrap_or_else(|| Credential::new("")))
    }

    /// Forget a password sudo would never read.
    ///
    /// Under a NOPASSWD rule sudo does not consume stdin, so the password
    /// line would reach the privileged command instead.
    pub fn without_unneeded_password(self) -> Self {
        match self {
            Self::Sudo(c) if !c.is_empty() && !sudo_needs_password() => {
                info!("sudo does not ask for a password, discarding the supplied one");
                Self::Sudo(Credential::new(""))
            }
            other => other,
        }
    }

    pub fn credential(&self) -> Option<&Credential> {
        match self {
            Self::Direct => None,
            Self::Sudo(c) => Some(c),
        }
    }

    /// Redact the credential (if any) from a line of text
    pub fn redact(&self, text: &str) -> String {
        match self {
            Self::Direct => text.to_string(),
            Self::Sudo(c) => c.redact(text),
        }
    }
}

/// Whether sudo would ask this user for a password.
///
/// `-k` ignores a cached timestamp and `-n` refuses to prompt, so the probe
/// only succeeds under a NOPASSWD rule.
pub fn sudo_needs_password() -> bool {
    let status = Command::new("sudo")
        .args(["-k", "-n", "true"])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    !matches!(status, Ok(s) if s.success())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_and_display_are_redacted() {
        let cred = Credential::new("hunter2");
        assert!(!format!("{:?}", cred).contains("hunter2"));
        assert_eq!(cred.to_string(), REDACTED);
    }

    #[test]
    fn test_redact_replaces_every_occurrence() {
        let cred = Credential::new("s3cret\n");
        assert_eq!(
            cred.redact("pw=s3cret again s3cret"),
            "pw=[REDACTED] again [REDACTED]"
        );
        assert_eq!(cred.redact("nothing here"), "nothing here");
    }

    #[test]
    fn test_empty_secret_redacts_nothing() {
        let cred = Credential::new("");
        assert!(cred.is_empty());
        assert_eq!(cred.redact("abc"), "abc");
    }

    #[test]
    fn test_direct_and_empty_credential_are_kept() {
        assert!(matches!(
            Privilege::Direct.without_unneeded_password(),
            Privilege::Direct
        ));
        let empty = Privilege::Sudo(Credential::new("")).without_unneeded_password();
        assert!(matches!(empty, Privilege::Sudo(c) if c.is_empty()));
    }

    #[test]
    fn test_write_to_appends_newline() {
        let cred = Credential::new("pw");
        let mut buf = Vec::new();
        cred.write_to(&mut buf).unwrap();
        assert_eq!(buf, b"pw\n");
    }
}
