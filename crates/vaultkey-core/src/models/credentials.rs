use serde::{Deserialize, Serialize};

/// A freshly issued credential pair.
///
/// The access credential is short-lived and only ever held in memory. The
/// renewal credential is longer-lived and opaque; the server may rotate it
/// on each exchange or omit it to keep the previous one valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialPair {
    pub access: String,
    pub renewal: Option<String>,
}

/// Result of a sign-in attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignInOutcome {
    /// Credentials were issued directly.
    Credentials(CredentialPair),
    /// The account requires a second factor; the challenge must be echoed
    /// back with the verification code. No credentials exist yet.
    SecondFactorRequired { challenge: String },
}
