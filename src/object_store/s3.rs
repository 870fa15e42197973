//! S3-compatible `ObjectStore` adapter.
//!
//! Conditional writes use the `if-none-match: *` / `if-match: <etag>`
//! headers that recent S3-compatible services accept on `PutObject`; older
//! services that reject the headers outright will surface a transport
//! error, which is the same failure mode §9 documents for stores that only
//! offer eventual read-after-write consistency: the lock is unsafe there,
//! and callers must pick a strongly-consistent store.

use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use bytes::Bytes;
use log::debug;

use super::{looks_like_precondition_failure, ConcurrencyToken, Fetched, ObjectMeta, ObjectStore, Precondition, PreconditionFailed};

pub struct S3ObjectStore {
    client: Client,
    bucket: String,
}

impl S3ObjectStore {
    pub fn new(client: Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    /// Build a store from the ambient AWS config chain (env vars, instance
    /// profile, shared config file) — the path CI runners use.
    pub async fn from_env(bucket: impl Into<String>) -> Self {
        let config = aws_config::load_from_env().await;
        Self::new(Client::new(&config), bucket)
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn get(&self, key: &str) -> anyhow::Result<Fetched> {
        match self.client.get_object().bucket(&self.bucket).key(key).send().await {
            Ok(output) => {
                let etag = output.e_tag().unwrap_or_default().trim_matches('"').to_string();
                let data = output.body.collect().await?.into_bytes();
                let size = data.len() as u64;
                Ok(Fetched::Found {
                    data,
                    meta: ObjectMeta {
                        token: ConcurrencyToken(etag),
                        size,
                    },
                })
            }
            Err(err) => {
                if is_not_found(&err) {
                    Ok(Fetched::NotFound)
                } else {
                    Err(err.into())
                }
            }
        }
    }

    async fn put(
        &self,
        key: &str,
        data: Bytes,
        content_type: &str,
        precondition: Precondition,
    ) -> anyhow::Result<ConcurrencyToken> {
        let mut req = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(data));

        req = match &precondition {
            Precondition::None => req,
            Precondition::CreateOnly => req.if_none_match("*"),
            Precondition::IfMatch(token) => req.if_match(&token.0),
        };

        match req.send().await {
            Ok(output) => {
                let etag = output.e_tag().unwrap_or_default().trim_matches('"').to_string();
                debug!("s3 put {key} -> etag {etag}");
                Ok(ConcurrencyToken(etag))
            }
            Err(err) => {
                let message = err.to_string();
                let status = err
                    .raw_response()
                    .map(|r| r.status().as_u16());
                if looks_like_precondition_failure(status, &message) {
                    Err(PreconditionFailed(key.to_string()).into())
                } else {
                    Err(err.into())
                }
            }
        }
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        match self.client.delete_object().bucket(&self.bucket).key(key).send().await {
            Ok(_) => Ok(()),
            Err(err) if is_not_found(&err) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn exists(&self, key: &str) -> bool {
        self.client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .is_ok()
    }

    async fn size(&self, key: &str) -> u64 {
        self.client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .ok()
            .and_then(|out| out.content_length())
            .map(|len| len.max(0) as u64)
            .unwrap_or(0)
    }
}

fn is_not_found<E>(err: &aws_sdk_s3::error::SdkError<E>) -> bool
where
    E: std::fmt::Debug,
{
    err.raw_response()
        .map(|r| r.status().as_u16() == 404)
        .unwrap_or(false)
}
