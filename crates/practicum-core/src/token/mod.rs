//! Signed completion-token verification.
//!
//! Completion tokens are minted by course instances (the CLI challenge
//! runner and the networking-lab environments) and presented by learners as
//! proof of finished work. Verification is pure: decode the envelope,
//! authenticate the payload against the per-instance derived key, then apply
//! the track's business rules. No network calls.

pub mod signing;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::Utc;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::ownership::check_ownership;
use crate::types::{Environment, Verdict};

/// Challenges a learner must complete when the requirement does not
/// override the count.
pub const CHALLENGES_REQUIRED: u32 = 18;

/// Networking labs a learner must complete when the requirement does not
/// override the count.
pub const NETWORK_LABS_REQUIRED: u32 = 12;

/// Shipped default for the master secret. Tolerated only in development.
pub const PLACEHOLDER_SECRET: &str = "dev-secret-do-not-use";

/// Token kinds accepted by the challenge-track verifier.
const CHALLENGE_KINDS: &[&str] = &["cli_challenges"];

/// Token kinds accepted by the networking-lab verifier, one per provider.
const NETWORK_LAB_KINDS: &[&str] = &["netlab_aws", "netlab_gcp", "netlab_azure"];

/// How far in the future a token timestamp may sit before it is rejected.
/// Past timestamps are accepted unconditionally; tokens do not expire here.
const FUTURE_TOLERANCE_SECS: i64 = 3600;

/// Fatal misconfiguration of the signing secret.
///
/// These are construction-time errors, never verification verdicts: a
/// deployment that cannot verify tokens honestly must not run at all.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("master signing secret is not set")]
    MissingSecret,

    #[error("master signing secret is the development placeholder; set a real secret")]
    PlaceholderSecret,
}

/// Configuration for [`TokenVerifier`].
#[derive(Debug)]
pub struct TokenConfig {
    /// Master secret all per-instance keys derive from.
    pub master_secret: SecretString,

    /// Deployment environment. Gates placeholder-secret tolerance.
    pub environment: Environment,
}

/// Payload fields, read only after the signature has been checked.
#[derive(Debug, Deserialize)]
struct TokenPayload {
    #[serde(default)]
    learner: String,
    #[serde(default)]
    count: u32,
    #[serde(default)]
    kind: String,
    #[serde(default)]
    issued_at: i64,
    #[serde(default)]
    issued_on: String,
}

/// Verifies signed completion tokens.
///
/// Stateless apart from the configured master secret; a single instance is
/// shared by every verification in the process.
#[derive(Debug)]
pub struct TokenVerifier {
    master_secret: SecretString,
}

impl TokenVerifier {
    /// Build a verifier, refusing unusable secrets outside development.
    ///
    /// # Security
    ///
    /// An empty or placeholder master secret in a non-development
    /// environment means every token "verifies" against a key an attacker
    /// can trivially derive. That is a fatal configuration error.
    pub fn new(config: TokenConfig) -> Result<Self, ConfigError> {
        if !config.environment.is_development() {
            let secret = config.master_secret.expose_secret();
            if secret.is_empty() {
                return Err(ConfigError::MissingSecret);
            }
            if secret == PLACEHOLDER_SECRET {
                return Err(ConfigError::PlaceholderSecret);
            }
        }
        Ok(Self {
            master_secret: config.master_secret,
        })
    }

    /// Verify a CLI challenge-track completion token.
    ///
    /// `required` overrides [`CHALLENGES_REQUIRED`] when the requirement
    /// sets its own count.
    pub fn verify_challenge_token(
        &self,
        token: &str,
        expected_owner: &str,
        required: Option<u32>,
    ) -> Verdict {
        self.verify_token(
            token,
            expected_owner,
            required.unwrap_or(CHALLENGES_REQUIRED),
            CHALLENGE_KINDS,
            "challenges",
        )
    }

    /// Verify a networking-lab completion token from any supported provider.
    pub fn verify_network_token(
        &self,
        token: &str,
        expected_owner: &str,
        required: Option<u32>,
    ) -> Verdict {
        self.verify_token(
            token,
            expected_owner,
            required.unwrap_or(NETWORK_LABS_REQUIRED),
            NETWORK_LAB_KINDS,
            "labs",
        )
    }

    fn verify_token(
        &self,
        token: &str,
        expected_owner: &str,
        required: u32,
        accepted_kinds: &[&str],
        unit: &str,
    ) -> Verdict {
        let payload = match self.authenticate(token) {
            Ok(payload) => payload,
            Err(verdict) => return verdict,
        };

        if let Err(verdict) = check_ownership(&payload.learner, expected_owner) {
            return verdict;
        }

        if !accepted_kinds.contains(&payload.kind.as_str()) {
            return Verdict::fail(format!("unrecognized token kind '{}'", payload.kind));
        }

        if payload.count < required {
            return Verdict::fail(format!(
                "Progress incomplete: {}/{} {} completed.",
                payload.count, required, unit
            ));
        }

        let now = Utc::now().timestamp();
        if payload.issued_at > now + FUTURE_TOLERANCE_SECS {
            warn!(
                learner = %payload.learner,
                issued_at = payload.issued_at,
                "rejecting token with timestamp in the future"
            );
            return Verdict::fail("token timestamp is in the future");
        }

        let message = if payload.issued_on.is_empty() {
            format!(
                "Verified: {} completed {}/{} {}.",
                payload.learner, payload.count, required, unit
            )
        } else {
            format!(
                "Verified: {} completed {}/{} {} on {}.",
                payload.learner, payload.count, required, unit, payload.issued_on
            )
        };
        Verdict::pass(message).with_owner_match()
    }

    /// Decode the envelope and authenticate the payload.
    ///
    /// No payload field is interpreted until the recomputed signature has
    /// matched the supplied one in constant time.
    fn authenticate(&self, token: &str) -> Result<TokenPayload, Verdict> {
        let bytes = BASE64
            .decode(token.trim())
            .map_err(|_| Verdict::fail("invalid token format"))?;
        let envelope: Value =
            serde_json::from_slice(&bytes).map_err(|_| Verdict::fail("invalid token format"))?;

        let payload = envelope.get("payload");
        let signature = envelope.get("signature").and_then(Value::as_str);
        let (payload, signature) = match (payload, signature) {
            (Some(payload), Some(signature)) => (payload, signature),
            _ => return Err(Verdict::fail("token is missing payload or signature")),
        };

        let instance_id = payload
            .get("instance_id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| Verdict::fail("token payload is missing instance ID"))?;

        let key =
            signing::derive_instance_key(self.master_secret.expose_secret(), instance_id);
        let mac = signing::hmac_sha256(
            key.as_bytes(),
            signing::canonical_json(payload).as_bytes(),
        );
        if !signing::signature_matches(&mac, signature) {
            warn!(instance_id, "token signature mismatch");
            return Err(Verdict::fail("invalid token signature"));
        }

        serde_json::from_value(payload.clone())
            .map_err(|_| Verdict::fail("invalid token format"))
    }
}
