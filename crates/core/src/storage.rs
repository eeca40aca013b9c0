use crate::config::S3Config;
use crate::errors::PipelineError;
use crate::observability::record_storage_operation;
use anyhow::Result;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::{Client, config::Credentials};
use std::time::Instant;
use uuid::Uuid;

pub async fn initialize_client(config: &S3Config) -> Result<Client> {
    let mut loader = aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(config.region.clone()))
        .endpoint_url(config.endpoint_url.as_str());

    if let (Some(access_key), Some(secret_key)) =
        (&config.access_key_id, &config.secret_access_key)
    {
        loader = loader.credentials_provider(Credentials::new(
            access_key,
            secret_key,
            None,
            None,
            "static",
        ));
    }

    let shared_config = loader.load().await;
    Ok(Client::new(&shared_config))
}

/// Object key for the raw bytes of an uploaded dataset.
///
/// The filename component is the basename of the client-supplied name;
/// directory components are stripped before key construction.
pub fn upload_key(dataset_id: Uuid, original_filename: &str) -> String {
    format!("datasets/{dataset_id}/source/{}", basename(original_filename))
}

/// Object key for the generated profile report of a dataset.
pub fn report_key(dataset_id: Uuid) -> String {
    format!("datasets/{dataset_id}/report/report.json")
}

fn basename(filename: &str) -> &str {
    let name = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    if name.is_empty() { "upload.bin" } else { name }
}

#[tracing::instrument(
    name = "s3.put_object",
    skip(client, bytes),
    fields(storage.system = "s3", bucket = %bucket, key = %key, size = bytes.len())
)]
pub async fn put_object(
    client: &Client,
    bucket: &str,
    key: &str,
    bytes: Vec<u8>,
    content_type: &str,
) -> Result<Option<String>, PipelineError> {
    let start = Instant::now();
    let size = bytes.len() as u64;

    let result = client
        .put_object()
        .bucket(bucket)
        .key(key)
        .body(bytes.into())
        .content_type(content_type)
        .send()
        .await;

    let duration = start.elapsed().as_secs_f64();
    record_storage_operation("upload", duration, Some(size), result.is_ok());

    match result {
        Ok(output) => Ok(output.e_tag().map(|tag| tag.trim_matches('"').to_string())),
        Err(e) => Err(PipelineError::ObjectStore(e.into())),
    }
}

#[tracing::instrument(
    name = "s3.get_object",
    skip(client),
    fields(storage.system = "s3", bucket = %bucket, key = %key)
)]
pub async fn get_object(
    client: &Client,
    bucket: &str,
    key: &str,
) -> Result<Vec<u8>, PipelineError> {
    let start = Instant::now();

    let result = client.get_object().bucket(bucket).key(key).send().await;

    match result {
        Ok(output) => match output.body.collect().await {
            Ok(data) => {
                let data = data.into_bytes();
                let duration = start.elapsed().as_secs_f64();
                record_storage_operation("download", duration, Some(data.len() as u64), true);
                Ok(data.to_vec())
            }
            Err(e) => {
                let duration = start.elapsed().as_secs_f64();
                record_storage_operation("download", duration, None, false);
                Err(PipelineError::ObjectStore(e.into()))
            }
        },
        Err(e) => {
            let duration = start.elapsed().as_secs_f64();
            record_storage_operation("download", duration, None, false);
            Err(PipelineError::ObjectStore(e.into()))
        }
    }
}

#[tracing::instrument(
    name = "s3.ensure_bucket_exists",
    skip(client),
    fields(storage.system = "s3", bucket = %bucket)
)]
pub async fn ensure_bucket_exists(client: &Client, bucket: &str) -> Result<()> {
    // Probe first: in steady state the bucket is already provisioned and
    // HeadBucket is the cheapest way to find out.
    if client.head_bucket().bucket(bucket).send().await.is_ok() {
        return Ok(());
    }

    let Err(err) = client.create_bucket().bucket(bucket).send().await else {
        return Ok(());
    };

    // A lost create race is success for our purposes. Stores that refuse
    // CreateBucket but serve the bucket anyway pass the second probe.
    let already_provisioned = err.as_service_error().is_some_and(|service_err| {
        service_err.is_bucket_already_exists() || service_err.is_bucket_already_owned_by_you()
    });
    if already_provisioned || client.head_bucket().bucket(bucket).send().await.is_ok() {
        return Ok(());
    }

    Err(err.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_key_uses_basename() {
        let id = Uuid::nil();
        assert_eq!(
            upload_key(id, "sales.csv"),
            format!("datasets/{id}/source/sales.csv")
        );
        assert_eq!(
            upload_key(id, "/tmp/exports/sales.csv"),
            format!("datasets/{id}/source/sales.csv")
        );
        assert_eq!(
            upload_key(id, "C:\\exports\\sales.csv"),
            format!("datasets/{id}/source/sales.csv")
        );
    }

    #[test]
    fn test_upload_key_falls_back_on_empty_basename() {
        let id = Uuid::nil();
        assert_eq!(
            upload_key(id, "exports/"),
            format!("datasets/{id}/source/upload.bin")
        );
        assert_eq!(upload_key(id, ""), format!("datasets/{id}/source/upload.bin"));
    }

    #[test]
    fn test_report_key_is_deterministic() {
        let id = Uuid::nil();
        assert_eq!(report_key(id), format!("datasets/{id}/report/report.json"));
        assert_eq!(report_key(id), report_key(id));
    }
}
