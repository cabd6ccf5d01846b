//! Credential storage that cannot leak into logs.
//!
//! Every outbound secret in the pipeline (the Anthropic key, the GitHub
//! token) goes through [`Credential`]. The value sits in a
//! [`SecretString`], so it is zeroed on drop and absent from `Debug`
//! and `Display` output; the only way to read it is an explicit
//! [`Credential::reveal`] at the point of use.

use secrecy::{ExposeSecret, SecretString};
use std::fmt;

use super::ProviderError;

/// Where a credential was loaded from.
///
/// Carried so configuration problems can be debugged ("which variable
/// fed this?") without ever printing the value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialOrigin {
    /// Read from the named environment variable.
    Env(&'static str),
    /// Handed over in code, usually by tests.
    Inline,
}

impl fmt::Display for CredentialOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialOrigin::Env(var) => write!(f, "${}", var),
            CredentialOrigin::Inline => f.write_str("inline"),
        }
    }
}

/// A secret for one outbound service.
pub struct Credential {
    label: &'static str,
    origin: CredentialOrigin,
    secret: SecretString,
}

impl Credential {
    /// Wrap a value produced in code.
    pub fn inline(value: impl Into<String>, label: &'static str) -> Self {
        Self {
            label,
            origin: CredentialOrigin::Inline,
            secret: SecretString::from(value.into()),
        }
    }

    /// Read a credential the pipeline cannot run without.
    pub fn required(var: &'static str, label: &'static str) -> Result<Self, ProviderError> {
        match std::env::var(var) {
            Ok(value) => Ok(Self {
                label,
                origin: CredentialOrigin::Env(var),
                secret: SecretString::from(value),
            }),
            Err(_) => Err(ProviderError::Unconfigured(format!(
                "{} missing; set {}",
                label, var
            ))),
        }
    }

    /// Read a credential the pipeline can do without.
    ///
    /// Unset and blank both come back as `None`, and callers fall back to
    /// unauthenticated access (the GitHub API allows that at reduced rate
    /// limits).
    pub fn optional(var: &'static str, label: &'static str) -> Option<Self> {
        let value = std::env::var(var).ok()?;
        if value.trim().is_empty() {
            return None;
        }
        Some(Self {
            label,
            origin: CredentialOrigin::Env(var),
            secret: SecretString::from(value),
        })
    }

    /// The secret itself. Call where the value is consumed (an HTTP
    /// header) and never store the result.
    pub fn reveal(&self) -> &str {
        self.secret.expose_secret()
    }

    /// True when the stored value has no content.
    pub fn is_blank(&self) -> bool {
        self.secret.expose_secret().trim().is_empty()
    }

    /// Human-readable label, safe for logs.
    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Where this credential came from, safe for logs.
    pub fn origin(&self) -> CredentialOrigin {
        self.origin
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential({} via {}, [REDACTED])", self.label, self.origin)
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}) [REDACTED]", self.label, self.origin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_and_display_never_show_the_value() {
        let cred = Credential::inline("sk-live-9ab3f", "Anthropic API key");

        for rendered in [format!("{:?}", cred), format!("{}", cred)] {
            assert!(!rendered.contains("9ab3f"), "secret leaked: {}", rendered);
            assert!(rendered.contains("[REDACTED]"));
            assert!(rendered.contains("Anthropic API key"));
        }
    }

    #[test]
    fn test_reveal_returns_the_value() {
        let cred = Credential::inline("ghp_token", "GitHub token");
        assert_eq!(cred.reveal(), "ghp_token");
        assert!(!cred.is_blank());
        assert!(Credential::inline("  ", "blank").is_blank());
    }

    #[test]
    fn test_origin_names_the_env_var() {
        std::env::set_var("PRACTICUM_TEST_REQUIRED_KEY", "value");
        let cred = Credential::required("PRACTICUM_TEST_REQUIRED_KEY", "Test key").unwrap();
        std::env::remove_var("PRACTICUM_TEST_REQUIRED_KEY");

        assert_eq!(cred.origin(), CredentialOrigin::Env("PRACTICUM_TEST_REQUIRED_KEY"));
        assert_eq!(cred.origin().to_string(), "$PRACTICUM_TEST_REQUIRED_KEY");
        assert_eq!(cred.label(), "Test key");
    }

    #[test]
    fn test_required_missing_names_label_and_var() {
        let error = Credential::required("PRACTICUM_TEST_UNSET_KEY", "Test key").unwrap_err();
        let message = error.to_string();
        assert!(message.contains("Test key"));
        assert!(message.contains("PRACTICUM_TEST_UNSET_KEY"));
    }

    #[test]
    fn test_optional_absent_and_blank_are_none() {
        assert!(Credential::optional("PRACTICUM_TEST_MISSING_TOKEN", "token").is_none());

        std::env::set_var("PRACTICUM_TEST_BLANK_TOKEN", "   ");
        let blank = Credential::optional("PRACTICUM_TEST_BLANK_TOKEN", "token");
        std::env::remove_var("PRACTICUM_TEST_BLANK_TOKEN");
        assert!(blank.is_none());
    }

    #[test]
    fn test_optional_present_is_loaded() {
        std::env::set_var("PRACTICUM_TEST_SET_TOKEN", "ghp_abc123");
        let cred = Credential::optional("PRACTICUM_TEST_SET_TOKEN", "GitHub token");
        std::env::remove_var("PRACTICUM_TEST_SET_TOKEN");

        let cred = cred.unwrap();
        assert_eq!(cred.reveal(), "ghp_abc123");
        assert_eq!(cred.origin(), CredentialOrigin::Env("PRACTICUM_TEST_SET_TOKEN"));
    }
}
