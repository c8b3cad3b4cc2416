//! Datasource endpoints.

use super::{ApiClient, ApiResult, created_id};
use crate::model::RemoteId;
use crate::transport::Method;

impl ApiClient {
    /// All datasources of one type visible to the user.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or a non-200 answer.
    pub fn list_datasources(&self, ds_type: u32) -> ApiResult<Vec<serde_json::Value>> {
        self.get_data(&format!("datasources.json?type={ds_type}"))
    }

    /// Create a datasource and return its id.
    ///
    /// # Errors
    ///
    /// Returns the server's message when creation is rejected.
    pub fn create_datasource(&self, object: &serde_json::Value) -> ApiResult<RemoteId> {
        let resp = self.send_expect(Method::Post, "datasources.json", Some(object), &[200, 201, 204])?;
        created_id(&resp)
    }

    /// Overwrite an existing datasource.
    ///
    /// # Errors
    ///
    /// Returns the server's message when the update is rejected.
    pub fn update_datasource(&self, id: RemoteId, object: &serde_json::Value) -> ApiResult<()> {
        self.send_expect(
            Method::Put,
            &format!("datasources/{id}.json"),
            Some(object),
            &[200, 204],
        )?;
        Ok(())
    }
}
