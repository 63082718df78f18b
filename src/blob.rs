use async_trait::async_trait;
use futures::io::{AsyncReadExt, AsyncWriteExt};
use mongodb::{
    bson::{oid::ObjectId, Bson, Document},
    gridfs::GridFsBucket,
};

use crate::error::Error;

// content-addressed blob interface for code packages. the handle is an
// opaque identifier into the store.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(
        &self,
        bytes: Vec<u8>,
        filename: &str,
        metadata: Document,
    ) -> Result<String, Error>;

    async fn get(&self, handle: &str) -> Result<Vec<u8>, Error>;
}

pub struct GridFsBlobStore {
    bucket: GridFsBucket,
}

impl GridFsBlobStore {
    pub fn new(database: &mongodb::Database) -> Self {
        GridFsBlobStore {
            bucket: database.gridfs_bucket(None),
        }
    }
}

fn storage<E: std::fmt::Display>(e: E) -> Error {
    Error::Storage(e.to_string())
}

#[async_trait]
impl BlobStore for GridFsBlobStore {
    async fn put(
        &self,
        bytes: Vec<u8>,
        filename: &str,
        metadata: Document,
    ) -> Result<String, Error> {
        let mut upload = self
            .bucket
            .open_upload_stream(filename)
            .metadata(metadata)
            .await
            .map_err(storage)?;
        let id = upload.id().clone();
        upload.write_all(&bytes).await.map_err(storage)?;
        upload.close().await.map_err(storage)?;
        match id {
            Bson::ObjectId(oid) => Ok(oid.to_hex()),
            other => Ok(other.to_string()),
        }
    }

    async fn get(&self, handle: &str) -> Result<Vec<u8>, Error> {
        let oid = ObjectId::parse_str(handle)
            .map_err(|_| Error::Storage(format!("malformed archive handle `{handle}`")))?;
        let mut download = self
            .bucket
            .open_download_stream(Bson::ObjectId(oid))
            .await
            .map_err(storage)?;
        let mut bytes = vec![];
        download.read_to_end(&mut bytes).await.map_err(storage)?;
        Ok(bytes)
    }
}
