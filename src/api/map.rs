//! Map endpoints.

use serde_json::json;
use tracing::{info, warn};

use super::{ApiClient, ApiError, ApiResult, created_id};
use crate::model::{MapPayload, RemoteId};
use crate::transport::Method;

/// Page size for the name lookup.
const NAME_QUERY_PAGE: u32 = 50;

impl ApiClient {
    /// Create a map and return its id.
    ///
    /// # Errors
    ///
    /// Fails unless the service answers 201 with a `Location` header.
    pub fn create_map(&self, payload: &MapPayload) -> ApiResult<RemoteId> {
        info!(name = %payload.name, "Creating map");
        let body = serde_json::to_value(payload).map_err(|e| ApiError::InvalidResponse(e.to_string()))?;
        let resp = self.send_expect(Method::Post, "maps.json", Some(&body), &[201])?;
        created_id(&resp)
    }

    /// Update map-level metadata (name, projection, units).
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or a non-2xx answer.
    pub fn update_map(&self, map_id: RemoteId, payload: &MapPayload) -> ApiResult<()> {
        info!(map_id, name = %payload.name, "Updating map");
        let body = serde_json::to_value(payload).map_err(|e| ApiError::InvalidResponse(e.to_string()))?;
        self.send_expect(
            Method::Put,
            &format!("maps/{map_id}.json"),
            Some(&body),
            &[200, 201, 204],
        )?;
        Ok(())
    }

    /// Resource id of a map.
    ///
    /// # Errors
    ///
    /// Returns an error if the map cannot be fetched or has no resource id.
    pub fn map_resource_id(&self, map_id: RemoteId) -> ApiResult<RemoteId> {
        let resp = self.send_expect(Method::Get, &format!("maps/{map_id}.json"), None, &[200])?;
        let body = resp
            .json()
            .map_err(|e| ApiError::InvalidResponse(e.to_string()))?;
        body.get("resource_id")
            .and_then(|v| match v {
                serde_json::Value::Number(n) => n.as_i64(),
                serde_json::Value::String(s) => s.parse().ok(),
                _ => None,
            })
            .ok_or(ApiError::MissingField("resource_id"))
    }

    /// Grant anonymous read access to a map.
    ///
    /// # Errors
    ///
    /// Returns an error if the map resource or the permission call fails.
    pub fn share_public(&self, map_id: RemoteId) -> ApiResult<()> {
        let resource_id = self.map_resource_id(map_id)?;
        let body = json!({"username": "anonymous", "permission": "READ"});
        self.send_expect(
            Method::Post,
            &format!("resources/{resource_id}/permission.json"),
            Some(&body),
            &[200, 201, 204],
        )?;
        info!(map_id, "Map shared publicly");
        Ok(())
    }

    /// Names of the user's private maps matching `query`.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or a non-200 answer.
    pub fn find_map_names(&self, query: &str) -> ApiResult<Vec<String>> {
        let encoded: String = url::form_urlencoded::byte_serialize(query.as_bytes()).collect();
        let path = format!(
            "maps.json?perpage={NAME_QUERY_PAGE}&page=1&order_by=accessed:desc\
             &query_on=name&query={encoded}&type=private"
        );
        Ok(self
            .get_data(&path)?
            .iter()
            .filter_map(|m| m.get("name").and_then(serde_json::Value::as_str))
            .map(str::to_string)
            .collect())
    }

    /// First of `name`, `name 2`, `name 3`, ... not used by an existing map.
    ///
    /// Returns `None` when the lookup fails; callers keep the requested name.
    pub fn unique_map_name(&self, name: &str) -> Option<String> {
        let taken = match self.find_map_names(name) {
            Ok(names) => names,
            Err(e) => {
                warn!(error = %e, "Map name lookup failed");
                return None;
            }
        };
        let mut candidate = name.to_string();
        let mut count = 1;
        while taken.iter().any(|t| *t == candidate) {
            count += 1;
            candidate = format!("{name} {count}");
        }
        Some(candidate)
    }
}
