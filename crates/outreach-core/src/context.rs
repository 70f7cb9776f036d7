//! Explicit caller context threaded through every collaborator call.

use serde::{Deserialize, Serialize};

/// Who a call is made on behalf of.
///
/// Built once per invocation from the request (bearer token, org header) and
/// narrowed per schedule with [`AuthContext::for_owner`]. Never stored globally.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthContext {
    pub owner_id: Option<String>,
    pub org_id: Option<String>,
    pub bearer_token: Option<String>,
}

impl AuthContext {
    pub fn new(bearer_token: Option<String>, org_id: Option<String>) -> Self {
        Self {
            owner_id: None,
            org_id,
            bearer_token,
        }
    }

    /// Copy of this context acting for the owner of a specific schedule.
    pub fn for_owner(&self, owner_id: &str) -> Self {
        Self {
            owner_id: Some(owner_id.to_string()),
            ..self.clone()
        }
    }

    /// Value for an `Authorization` header, if a token is present.
    pub fn authorization(&self) -> Option<String> {
        self.bearer_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .map(|t| format!("Bearer {t}"))
    }
}
