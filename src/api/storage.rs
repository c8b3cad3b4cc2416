//! Map file storage endpoints.

use std::path::Path;

use tracing::info;

use super::{ApiClient, ApiResult, check_status};
use crate::model::RemoteId;
use crate::model::payload::storage_dir;
use crate::transport::ProgressFn;

impl ApiClient {
    /// Names of the files in a map's storage directory.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or a non-200 answer.
    pub fn list_storage(&self, map_id: RemoteId) -> ApiResult<Vec<String>> {
        let items = self.get_data(&format!("storage/fs/{}/info.json", storage_dir(map_id)))?;
        Ok(items
            .iter()
            .filter_map(|f| f.get("name").and_then(serde_json::Value::as_str))
            .map(str::to_string)
            .collect())
    }

    /// Upload an archive into a map's storage directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the upload fails or is rejected.
    pub fn upload_archive(
        &self,
        map_id: RemoteId,
        archive: &Path,
        progress: Option<ProgressFn>,
    ) -> ApiResult<()> {
        let path = format!("storage/fs/{}", storage_dir(map_id));
        let resp = self.transport().upload(&path, archive, progress)?;
        info!(status = resp.status, archive = %archive.display(), "Archive uploaded");
        check_status(resp, &[200, 201, 204])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::ScriptedTransport;
    use crate::transport::{Method, Response};
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn test_list_storage_names() {
        let t = Arc::new(ScriptedTransport::new());
        t.on_json(
            Method::Get,
            "storage/fs/qgis/map2/info.json",
            200,
            json!({"data": [{"name": "a.shp"}, {"name": "a.dbf"}, {"size": 1}]}),
        );
        assert_eq!(ApiClient::new(t).list_storage(2).unwrap(), vec!["a.shp", "a.dbf"]);
    }

    #[test]
    fn test_upload_posts_to_map_dir() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("x.tar.gz");
        std::fs::write(&archive, b"data").unwrap();

        let t = Arc::new(ScriptedTransport::new());
        t.on(Method::Post, "storage/fs/qgis/map2", Response::new(200, ""));
        ApiClient::new(t.clone()).upload_archive(2, &archive, None).unwrap();
        assert_eq!(t.calls()[0].upload.as_deref(), Some(&b"data"[..]));
    }
}
