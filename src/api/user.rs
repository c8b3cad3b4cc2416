//! Current-user endpoints: credential check and subscriptions.

use tracing::{debug, warn};

use super::{ApiClient, ApiResult};
use crate::transport::Method;

/// App instance of the publishing product.
const PUBLISHER_APP_INSTANCE: &str = "100004";
/// Lowest subscription type that counts as premium.
const PREMIUM_MIN_TYPE: i64 = 20;

/// Outcome of checking the configured API key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialStatus {
    Valid,
    /// The service answered, but not with 200.
    Rejected { status: u16 },
    /// No response at all.
    Unreachable,
}

/// One entry of `users/current/subscriptions.json`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub app_instance_id: String,
    pub sub_type: i64,
    pub active: bool,
    /// Unix seconds; `None` for open-ended subscriptions.
    pub ends: Option<i64>,
}

impl Subscription {
    fn from_value(v: &serde_json::Value) -> Option<Self> {
        let text = |key: &str| -> Option<String> {
            match v.get(key)? {
                serde_json::Value::String(s) => Some(s.clone()),
                serde_json::Value::Number(n) => Some(n.to_string()),
                _ => None,
            }
        };
        let number = |key: &str| -> Option<i64> {
            match v.get(key)? {
                serde_json::Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
                serde_json::Value::String(s) => s.trim().parse::<f64>().ok().map(|f| f as i64),
                _ => None,
            }
        };

        Some(Self {
            app_instance_id: text("app_instance_id")?,
            sub_type: number("type")?,
            active: text("active").as_deref() == Some("t"),
            ends: number("ends").filter(|e| *e > 0),
        })
    }

    /// Whether this subscription grants premium features at `now` (Unix seconds).
    #[must_use]
    pub fn is_premium_at(&self, now: i64) -> bool {
        self.app_instance_id == PUBLISHER_APP_INSTANCE
            && self.sub_type >= PREMIUM_MIN_TYPE
            && self.active
            && self.ends.is_none_or(|end| end > now)
    }
}

impl ApiClient {
    /// Check the API key against `users/current`.
    pub fn check_credentials(&self) -> CredentialStatus {
        match self.send(Method::Get, "users/current.json", None) {
            Ok(resp) if resp.status == 200 => CredentialStatus::Valid,
            Ok(resp) => CredentialStatus::Rejected {
                status: resp.status,
            },
            Err(e) => {
                debug!(error = %e, "Credential check failed");
                CredentialStatus::Unreachable
            }
        }
    }

    /// Subscriptions of the current user. Undecodable entries are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or a non-200 answer.
    pub fn subscriptions(&self) -> ApiResult<Vec<Subscription>> {
        Ok(self
            .get_data("users/current/subscriptions.json")?
            .iter()
            .filter_map(Subscription::from_value)
            .collect())
    }

    /// Whether the user currently holds a premium subscription.
    /// Lookup failures count as not premium.
    pub fn is_premium(&self) -> bool {
        let now = chrono::Utc::now().timestamp();
        match self.subscriptions() {
            Ok(subs) => subs.iter().any(|s| s.is_premium_at(now)),
            Err(e) => {
                warn!(error = %e, "Subscription lookup failed");
                false
            }
        }
    }
}
