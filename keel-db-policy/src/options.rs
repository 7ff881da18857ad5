//! Policy options parsed from a request's `opts` object

use serde_json::Value as JsonValue;

/// Per-request policy options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyOptions {
    /// When false, the rewriter injects no access guards (root bypass)
    pub apply_access_policies: bool,
}

impl Default for PolicyOptions {
    fn default() -> Self {
        Self {
            apply_access_policies: true,
        }
    }
}

impl PolicyOptions {
    /// Options that bypass all access policies
    pub fn root() -> Self {
        Self {
            apply_access_policies: false,
        }
    }

    /// Parse options from an `opts` JSON object.
    ///
    /// Accepts `apply_access_policies`, `apply-access-policies` and
    /// `applyAccessPolicies`. Missing or non-boolean values keep the default.
    pub fn from_opts_value(opts: Option<&JsonValue>) -> Self {
        let Some(opts) = opts.and_then(|v| v.as_object()) else {
            return Self::default();
        };

        let apply = opts
            .get("apply-access-policies")
            .or_else(|| opts.get("apply_access_policies"))
            .or_else(|| opts.get("applyAccessPolicies"))
            .and_then(|v| v.as_bool());

        Self {
            apply_access_policies: apply.unwrap_or(true),
        }
    }

    pub fn is_bypass(&self) -> bool {
        !self.apply_access_policies
    }
}
