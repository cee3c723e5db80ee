//! S3 (and S3-compatible, e.g. Ceph RGW) store over `aws-sdk-s3`.

use super::store::{DeleteReport, ObjectEntry, ObjectStore};
use crate::config::S3Config;
use crate::transfer::fingerprint::normalize_etag;
use crate::{Result, SyncError};
use aws_sdk_s3::config::timeout::TimeoutConfig;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{
    BucketCannedAcl, CompletedMultipartUpload, CompletedPart, Delete, ObjectCannedAcl,
    ObjectIdentifier,
};
use aws_sdk_s3::Client;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{debug, error, info};

pub struct AwsStore {
    client: Client,
    bucket: String,
}

fn store_error<E: std::error::Error>(context: &str, e: E) -> SyncError {
    SyncError::ObjectStore(format!("{}: {}", context, DisplayErrorContext(&e)))
}

impl AwsStore {
    /// Authenticate, bind to `bucket` and make it public-read.
    pub async fn connect(settings: &S3Config, bucket: &str) -> Result<Self> {
        let credentials = Credentials::new(
            &settings.access_key,
            &settings.secret_key,
            None,
            None,
            "hpc-config-push",
        );

        let mut builder = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(settings.region.clone()))
            .endpoint_url(settings.endpoint())
            .credentials_provider(credentials)
            .force_path_style(true);

        if settings.operation_timeout_secs > 0 {
            builder = builder.timeout_config(
                TimeoutConfig::builder()
                    .operation_timeout(Duration::from_secs(settings.operation_timeout_secs))
                    .build(),
            );
        }

        let client = Client::from_conf(builder.build());
        info!("S3: connecting to bucket {} on {}", bucket, settings.endpoint());

        client
            .head_bucket()
            .bucket(bucket)
            .send()
            .await
            .map_err(|e| store_error(&format!("bucket {} unavailable", bucket), e))?;

        // Published environments are fetched anonymously by the nodes
        client
            .put_bucket_acl()
            .bucket(bucket)
            .acl(BucketCannedAcl::PublicRead)
            .send()
            .await
            .map_err(|e| store_error("set bucket acl", e))?;

        Ok(Self {
            client,
            bucket: bucket.to_string(),
        })
    }
}

#[async_trait::async_trait]
impl ObjectStore for AwsStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectEntry>> {
        let mut objects = Vec::new();
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix)
            .into_paginator()
            .send();

        while let Some(page) = pages.next().await {
            let page = page.map_err(|e| store_error("list objects", e))?;
            for object in page.contents() {
                let Some(key) = object.key() else { continue };
                objects.push(ObjectEntry {
                    key: key.to_string(),
                    etag: object.e_tag().map(normalize_etag).unwrap_or_default(),
                    last_modified: object
                        .last_modified()
                        .and_then(|t| DateTime::<Utc>::from_timestamp(t.secs(), t.subsec_nanos())),
                });
            }
        }

        debug!("S3: {} objects under {}", objects.len(), prefix);
        Ok(objects)
    }

    async fn head(&self, key: &str) -> Result<Option<String>> {
        match self.client.head_object().bucket(&self.bucket).key(key).send().await {
            Ok(out) => Ok(Some(out.e_tag().map(normalize_etag).unwrap_or_default())),
            Err(e) if e.as_service_error().is_some_and(|se| se.is_not_found()) => Ok(None),
            Err(e) => Err(store_error(&format!("head {}", key), e)),
        }
    }

    async fn put(&self, key: &str, body: Bytes) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .acl(ObjectCannedAcl::PublicRead)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| store_error(&format!("put {}", key), e))?;
        Ok(())
    }

    async fn create_multipart(&self, key: &str) -> Result<String> {
        let out = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .acl(ObjectCannedAcl::PublicRead)
            .send()
            .await
            .map_err(|e| store_error(&format!("initiate multipart {}", key), e))?;

        out.upload_id()
            .map(str::to_string)
            .ok_or_else(|| SyncError::ObjectStore(format!("no upload id returned for {}", key)))
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> Result<String> {
        let out = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| store_error(&format!("upload part {} of {}", part_number, key), e))?;

        Ok(out.e_tag().map(str::to_string).unwrap_or_default())
    }

    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<(i32, String)>,
    ) -> Result<()> {
        let completed = CompletedMultipartUpload::builder()
            .set_parts(Some(
                parts
                    .into_iter()
                    .map(|(number, etag)| {
                        CompletedPart::builder()
                            .part_number(number)
                            .e_tag(etag)
                            .build()
                    })
                    .collect(),
            ))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(completed)
            .send()
            .await
            .map_err(|e| store_error(&format!("complete multipart {}", key), e))?;
        Ok(())
    }

    async fn abort_multipart(&self, key: &str, upload_id: &str) -> Result<()> {
        self.client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|e| store_error(&format!("abort multipart {}", key), e))?;
        Ok(())
    }

    async fn delete_batch(&self, keys: &[String]) -> Result<DeleteReport> {
        if keys.is_empty() {
            return Ok(DeleteReport::default());
        }

        let objects = keys
            .iter()
            .map(|key| ObjectIdentifier::builder().key(key).build())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| store_error("build delete request", e))?;
        let delete = Delete::builder()
            .set_objects(Some(objects))
            .build()
            .map_err(|e| store_error("build delete request", e))?;

        let out = self
            .client
            .delete_objects()
            .bucket(&self.bucket)
            .delete(delete)
            .send()
            .await
            .map_err(|e| store_error("delete objects", e))?;

        for failure in out.errors() {
            error!(
                "S3: failed to delete {}: {}",
                failure.key().unwrap_or("?"),
                failure.message().unwrap_or("unknown error")
            );
        }

        Ok(DeleteReport {
            deleted: out.deleted().len(),
            failed: out.errors().len(),
        })
    }
}
