//! Google Cloud Storage `ObjectStore` adapter.
//!
//! Conditional writes use `if_generation_match`: `0` for create-only, the
//! captured generation number for update-if-unchanged. GCS returns HTTP 412
//! on a failed precondition, which `google_cloud_storage`'s error surfaces
//! as a `reqwest`-derived status we can match directly.

use async_trait::async_trait;
use bytes::Bytes;
use google_cloud_storage::client::Client;
use google_cloud_storage::http::objects::delete::DeleteObjectRequest;
use google_cloud_storage::http::objects::get::GetObjectRequest;
use google_cloud_storage::http::objects::upload::{Media, UploadObjectRequest, UploadType};
use log::debug;

use super::{looks_like_precondition_failure, ConcurrencyToken, Fetched, ObjectMeta, ObjectStore, Precondition, PreconditionFailed};

pub struct GcsObjectStore {
    client: Client,
    bucket: String,
}

impl GcsObjectStore {
    pub fn new(client: Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    /// Build a store via the default GCP credential chain (service account
    /// JSON, `gcloud` ADC, or the GCE metadata service).
    pub async fn from_env(bucket: impl Into<String>) -> anyhow::Result<Self> {
        let config = google_cloud_storage::client::ClientConfig::default().with_auth().await?;
        Ok(Self::new(Client::new(config), bucket))
    }
}

#[async_trait]
impl ObjectStore for GcsObjectStore {
    async fn get(&self, key: &str) -> anyhow::Result<Fetched> {
        let meta = self
            .client
            .get_object(&GetObjectRequest {
                bucket: self.bucket.clone(),
                object: key.to_string(),
                ..Default::default()
            })
            .await;

        let object_meta = match meta {
            Ok(m) => m,
            Err(err) if is_not_found(&err) => return Ok(Fetched::NotFound),
            Err(err) => return Err(err.into()),
        };

        let data = self
            .client
            .download_object(
                &GetObjectRequest {
                    bucket: self.bucket.clone(),
                    object: key.to_string(),
                    ..Default::default()
                },
                &google_cloud_storage::http::objects::download::Range::default(),
            )
            .await?;

        Ok(Fetched::Found {
            data: Bytes::from(data),
            meta: ObjectMeta {
                token: ConcurrencyToken(object_meta.generation.to_string()),
                size: object_meta.size as u64,
            },
        })
    }

    async fn put(
        &self,
        key: &str,
        data: Bytes,
        content_type: &str,
        precondition: Precondition,
    ) -> anyhow::Result<ConcurrencyToken> {
        let mut req = UploadObjectRequest {
            bucket: self.bucket.clone(),
            ..Default::default()
        };

        match &precondition {
            Precondition::None => {}
            Precondition::CreateOnly => req.if_generation_match = Some(0),
            Precondition::IfMatch(token) => {
                req.if_generation_match = Some(token.0.parse().unwrap_or_default())
            }
        }

        let media = Media::new(key.to_string()).with_content_type(content_type.to_string());
        let upload_type = UploadType::Simple(media);

        match self.client.upload_object(&req, data.to_vec(), &upload_type).await {
            Ok(object) => {
                debug!("gcs put {key} -> generation {}", object.generation);
                Ok(ConcurrencyToken(object.generation.to_string()))
            }
            Err(err) => {
                if looks_like_precondition_failure(status_of(&err), &err.to_string()) {
                    Err(PreconditionFailed(key.to_string()).into())
                } else {
                    Err(err.into())
                }
            }
        }
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        match self
            .client
            .delete_object(&DeleteObjectRequest {
                bucket: self.bucket.clone(),
                object: key.to_string(),
                ..Default::default()
            })
            .await
        {
            Ok(_) => Ok(()),
            Err(err) if is_not_found(&err) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn exists(&self, key: &str) -> bool {
        self.client
            .get_object(&GetObjectRequest {
                bucket: self.bucket.clone(),
                object: key.to_string(),
                ..Default::default()
            })
            .await
            .is_ok()
    }

    async fn size(&self, key: &str) -> u64 {
        self.client
            .get_object(&GetObjectRequest {
                bucket: self.bucket.clone(),
                object: key.to_string(),
                ..Default::default()
            })
            .await
            .map(|o| o.size as u64)
            .unwrap_or(0)
    }
}

fn status_of(err: &google_cloud_storage::http::Error) -> Option<u16> {
    match err {
        google_cloud_storage::http::Error::Response(resp) => Some(resp.code as u16),
        _ => None,
    }
}

fn is_not_found(err: &google_cloud_storage::http::Error) -> bool {
    status_of(err) == Some(404)
}
