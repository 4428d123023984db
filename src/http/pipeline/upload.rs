use super::Stage;
use crate::http::error::Error;
use async_trait::async_trait;
use axum::body::Body;
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::Request;

/// Room for multipart boundaries and part headers on top of the file itself.
const MULTIPART_OVERHEAD: u64 = 16 * 1024;

/// Rejects multipart uploads whose declared size already rules them out, before anything
/// reads the body. Handlers still check the size of the file they actually receive.
pub struct UploadLimit {
    max_file_upload: u64,
}

impl UploadLimit {
    pub fn new(max_file_upload: u64) -> Self {
        Self { max_file_upload }
    }
}

/// The most a multipart request carrying one `max_file_upload`-byte file should need.
pub(crate) fn multipart_limit(max_file_upload: u64) -> u64 {
    max_file_upload.saturating_add(MULTIPART_OVERHEAD)
}

pub(crate) fn too_large(max_file_upload: u64) -> Error {
    Error::bad_request(format!(
        "Please upload an image less than {max_file_upload}"
    ))
}

#[async_trait]
impl Stage for UploadLimit {
    async fn before(&self, req: &mut Request<Body>) -> Result<(), Error> {
        let headers = req.headers();

        let is_multipart = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map_or(false, |v| v.starts_with("multipart/form-data"));
        if !is_multipart {
            return Ok(());
        }

        let declared = headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());

        match declared {
            Some(len) if len > multipart_limit(self.max_file_upload) => {
                Err(too_large(self.max_file_upload))
            }
            _ => Ok(()),
        }
    }
}
