//! Layer, folder and option endpoints.

use tracing::{debug, info};

use super::{ApiClient, ApiError, ApiResult, created_id};
use crate::model::remote::WireLayer;
use crate::model::{FolderPayload, LayerPayload, OptionPayload, RemoteId};
use crate::transport::Method;

fn to_body<T: serde::Serialize>(payload: &T) -> ApiResult<serde_json::Value> {
    serde_json::to_value(payload).map_err(|e| ApiError::InvalidResponse(e.to_string()))
}

impl ApiClient {
    /// All layers and folders of a map, options expanded.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure, a non-200 answer, or an
    /// undecodable listing.
    pub fn list_layers(&self, map_id: RemoteId) -> ApiResult<Vec<WireLayer>> {
        let items = self.get_data(&format!("maps/{map_id}/layers.json?expand=options"))?;
        items
            .into_iter()
            .map(|item| {
                serde_json::from_value(item).map_err(|e| ApiError::InvalidResponse(e.to_string()))
            })
            .collect()
    }

    /// Create a layer and return its id.
    ///
    /// # Errors
    ///
    /// Returns the server's message when the layer is rejected.
    pub fn create_layer(&self, payload: &LayerPayload) -> ApiResult<RemoteId> {
        info!(name = %payload.name, order = payload.order, "Creating layer");
        let resp = self.send_expect(Method::Post, "layers.json", Some(&to_body(payload)?), &[200, 201, 204])?;
        created_id(&resp)
    }

    /// Replace a layer's attributes.
    ///
    /// # Errors
    ///
    /// Returns the server's message when the update is rejected.
    pub fn update_layer(&self, layer_id: RemoteId, payload: &LayerPayload) -> ApiResult<()> {
        info!(layer_id, name = %payload.name, order = payload.order, "Updating layer");
        self.send_expect(
            Method::Put,
            &format!("layers/{layer_id}.json"),
            Some(&to_body(payload)?),
            &[200, 204],
        )?;
        Ok(())
    }

    /// Resource id of a layer, for attaching options.
    ///
    /// # Errors
    ///
    /// Returns an error if the layer cannot be fetched.
    pub fn layer_resource_id(&self, layer_id: RemoteId) -> ApiResult<Option<RemoteId>> {
        let resp = self.send_expect(Method::Get, &format!("layers/{layer_id}.json"), None, &[200])?;
        let body = resp
            .json()
            .map_err(|e| ApiError::InvalidResponse(e.to_string()))?;
        Ok(body.get("resource_id").and_then(|v| match v {
            serde_json::Value::Number(n) => n.as_i64(),
            serde_json::Value::String(s) => s.parse().ok(),
            _ => None,
        }))
    }

    /// Delete a layer or folder. A missing entity counts as deleted.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or an unexpected status.
    pub fn delete_layer(&self, layer_id: RemoteId) -> ApiResult<()> {
        debug!(layer_id, "Deleting layer");
        self.send_expect(
            Method::Delete,
            &format!("layers/{layer_id}.json"),
            None,
            &[200, 202, 204, 404],
        )?;
        Ok(())
    }

    /// Create a folder and return its id.
    ///
    /// # Errors
    ///
    /// Fails unless the service answers 201 with a `Location` header.
    pub fn create_folder(&self, payload: &FolderPayload) -> ApiResult<RemoteId> {
        info!(name = %payload.name, order = payload.order, "Creating folder");
        let resp = self.send_expect(Method::Post, "layers.json", Some(&to_body(payload)?), &[201])?;
        created_id(&resp)
    }

    /// Update a folder's name, order or parent.
    ///
    /// # Errors
    ///
    /// Returns the server's message when the update is rejected.
    pub fn update_folder(&self, folder_id: RemoteId, payload: &FolderPayload) -> ApiResult<()> {
        info!(folder_id, name = %payload.name, "Updating folder");
        self.send_expect(
            Method::Put,
            &format!("layers/{folder_id}.json"),
            Some(&to_body(payload)?),
            &[200, 204],
        )?;
        Ok(())
    }

    /// Attach a new option to a resource.
    ///
    /// # Errors
    ///
    /// Fails unless the service answers 201 or 204.
    pub fn create_option(&self, resource_id: RemoteId, payload: &OptionPayload) -> ApiResult<()> {
        self.send_expect(
            Method::Post,
            &format!("resources/{resource_id}/options.json"),
            Some(&to_body(payload)?),
            &[201, 204],
        )?;
        Ok(())
    }

    /// Overwrite an existing option.
    ///
    /// # Errors
    ///
    /// Fails unless the service answers 201 or 204.
    pub fn update_option(
        &self,
        resource_id: RemoteId,
        option_id: RemoteId,
        payload: &OptionPayload,
    ) -> ApiResult<()> {
        self.send_expect(
            Method::Put,
            &format!("resources/{resource_id}/options/{option_id}.json"),
            Some(&to_body(payload)?),
            &[201, 204],
        )?;
        Ok(())
    }
}
