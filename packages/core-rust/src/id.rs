//! Execution tokens.
//!
//! A token correlates an inbound request with the result that eventually
//! arrives on the result topic. Generated tokens are time-ordered version 1
//! UUIDs rendered without their four hyphen separators, which yields a fixed
//! 32-character string. Tokens supplied by control messages are accepted
//! verbatim.

use std::borrow::Borrow;
use std::fmt;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Length of a generated execution token.
pub const EXECUTION_ID_LEN: usize = 32;

/// Opaque execution token, used as both `executionId` and
/// `functionExecutionId` of an invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionId(String);

impl ExecutionId {
    /// Generates a fresh token from the process-wide node identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self::generate_with_node(process_node_id())
    }

    /// Generates a fresh token for an explicit 6-byte node identifier.
    #[must_use]
    pub fn generate_with_node(node: &[u8; 6]) -> Self {
        let uuid = Uuid::now_v1(node);
        // `simple()` is the canonical hyphenated form with the separators removed.
        Self(uuid.simple().to_string())
    }

    /// Returns the token as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` for the empty token (a decoded message with no id).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Consumes the token, returning the inner string.
    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ExecutionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for ExecutionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl AsRef<str> for ExecutionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for ExecutionId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Random node identifier drawn once per process.
///
/// The multicast bit is set, marking the node as not derived from a MAC
/// address (RFC 4122 §4.5).
fn process_node_id() -> &'static [u8; 6] {
    static NODE_ID: OnceLock<[u8; 6]> = OnceLock::new();
    NODE_ID.get_or_init(|| {
        let mut node: [u8; 6] = rand::random();
        node[0] |= 0x01;
        node
    })
}
