//! Install-time security policy.

use serde::{Deserialize, Serialize};

/// How strictly installs treat verification findings.
///
/// Critical findings always quarantine. The policy only widens what fails an
/// install.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SecurityPolicy {
    /// Fail installs whose download URL is not on the allow-list.
    pub require_trusted_source: bool,
    /// Run the verifier over every downloaded artifact.
    pub verify_downloads: bool,
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self {
            require_trusted_source: false,
            verify_downloads: true,
        }
    }
}
