use crate::error::{parse_body, AppError};
use crate::store::{self, Item, TransactFailure};
use crate::types::{CreateSampleRequest, DataSample, SampleStatus, UpdateSampleRequest};
use aws_sdk_dynamodb::types::{AttributeValue, Put, TransactWriteItem};
use aws_sdk_dynamodb::Client as DynamoClient;
use lambda_http::http::StatusCode;
use lambda_http::{Body, Error, Response};
use std::collections::HashMap;

// ========== ITEM CODEC ==========

/// Canonical sample row, stored in its project's partition.
pub fn sample_item(sample: &DataSample) -> Item {
    let mut item = HashMap::new();
    item.insert(
        "PK".to_string(),
        AttributeValue::S(format!("{}{}", store::PROJECT_PREFIX, sample.project_id)),
    );
    item.insert(
        "SK".to_string(),
        AttributeValue::S(format!("{}{}", store::SAMPLE_PREFIX, sample.sample_id)),
    );
    item.insert(
        "text_content".to_string(),
        AttributeValue::S(sample.text_content.clone()),
    );
    item.insert(
        "status".to_string(),
        AttributeValue::S(sample.status.as_str().to_string()),
    );
    item.insert(
        "created_at".to_string(),
        AttributeValue::S(sample.created_at.clone()),
    );
    item
}

/// Pointer record letting a sample be found by its own id.
pub fn sample_pointer_item(sample: &DataSample) -> Item {
    let key = format!("{}{}", store::SAMPLE_PREFIX, sample.sample_id);
    let mut item = HashMap::new();
    item.insert("PK".to_string(), AttributeValue::S(key.clone()));
    item.insert("SK".to_string(), AttributeValue::S(key));
    item.insert(
        "project_id".to_string(),
        AttributeValue::S(sample.project_id.clone()),
    );
    item
}

pub fn sample_from_item(item: &Item) -> Result<DataSample, AppError> {
    let pk = store::require_s(item, "PK")?;
    let sk = store::require_s(item, "SK")?;
    let status = store::require_s(item, "status")?;
    Ok(DataSample {
        sample_id: store::strip_prefix(&sk, store::SAMPLE_PREFIX)?,
        project_id: store::strip_prefix(&pk, store::PROJECT_PREFIX)?,
        text_content: store::require_s(item, "text_content")?,
        status: status.parse::<SampleStatus>().map_err(AppError::Internal)?,
        created_at: store::require_s(item, "created_at")?,
    })
}

/// Resolve a sample by id: pointer record first, then the canonical row
/// in the project partition.
pub async fn load_sample(
    client: &DynamoClient,
    table: &str,
    sample_id: &str,
) -> Result<DataSample, AppError> {
    let pointer_key = format!("{}{}", store::SAMPLE_PREFIX, sample_id);
    let pointer = store::get_item(client, table, &pointer_key, &pointer_key)
        .await?
        .ok_or_else(|| {
            AppError::NotFound(format!("Data sample with ID {} not found", sample_id))
        })?;
    let project_id = store::require_s(&pointer, "project_id")?;

    let pk = format!("{}{}", store::PROJECT_PREFIX, project_id);
    let sk = format!("{}{}", store::SAMPLE_PREFIX, sample_id);
    match store::get_item(client, table, &pk, &sk).await? {
        Some(item) => sample_from_item(&item),
        None => {
            tracing::error!("sample pointer {} points at a missing row", sample_id);
            Err(AppError::NotFound(format!(
                "Data sample with ID {} not found",
                sample_id
            )))
        }
    }
}

// ========== HANDLERS ==========

/// Create a sample in a project. New samples always start out pending.
pub async fn create_sample(
    client: &DynamoClient,
    table: &str,
    body: &[u8],
) -> Result<Response<Body>, Error> {
    let req: CreateSampleRequest = match parse_body(body) {
        Ok(r) => r,
        Err(e) => return e.into_response(),
    };
    if req.text_content.trim().is_empty() {
        return AppError::Validation("Sample text content must not be empty".to_string())
            .into_response();
    }

    if let Err(e) = crate::projects::load_project(client, table, &req.project_id).await {
        return e.into_response();
    }

    let sample = DataSample {
        sample_id: uuid::Uuid::new_v4().to_string(),
        project_id: req.project_id,
        text_content: req.text_content,
        status: SampleStatus::Pending,
        created_at: chrono::Utc::now().to_rfc3339(),
    };

    let row = Put::builder()
        .table_name(table)
        .set_item(Some(sample_item(&sample)))
        .build();
    let pointer = Put::builder()
        .table_name(table)
        .set_item(Some(sample_pointer_item(&sample)))
        .build();
    let (row, pointer) = match (row, pointer) {
        (Ok(r), Ok(p)) => (r, p),
        _ => {
            return AppError::Internal("failed to build sample records".to_string())
                .into_response()
        }
    };

    let result = store::transact_write(
        client,
        vec![
            TransactWriteItem::builder().put(row).build(),
            TransactWriteItem::builder().put(pointer).build(),
        ],
    )
    .await;

    match result {
        Ok(()) => {
            tracing::info!(
                "sample {} created in project {}",
                sample.sample_id,
                sample.project_id
            );
            crate::respond::json(StatusCode::CREATED, &sample)
        }
        Err(TransactFailure::ConditionFailed) => {
            AppError::Conflict("Sample already exists".to_string()).into_response()
        }
        Err(TransactFailure::Other(detail)) => {
            AppError::Internal(format!("sample creation failed: {}", detail)).into_response()
        }
    }
}

/// Resolve the `status` query parameter; unknown statuses are rejected.
fn parse_status_filter(
    query: &HashMap<String, String>,
) -> Result<Option<SampleStatus>, AppError> {
    match query.get("status") {
        Some(raw) => raw
            .parse::<SampleStatus>()
            .map(Some)
            .map_err(AppError::Validation),
        None => Ok(None),
    }
}

/// List samples, optionally scoped to a project and/or a status. A
/// project scope turns into a partition query; the global listing scans.
/// The dedicated /samples/status/{status} route lands here too, with the
/// path segment folded into the query.
pub async fn list_samples(
    client: &DynamoClient,
    table: &str,
    query: &HashMap<String, String>,
) -> Result<Response<Body>, Error> {
    let items = match query.get("project_id") {
        Some(project_id) => {
            let pk = format!("{}{}", store::PROJECT_PREFIX, project_id);
            store::query_prefix(client, table, &pk, store::SAMPLE_PREFIX).await
        }
        None => store::scan_prefix(client, table, store::PROJECT_PREFIX, store::SAMPLE_PREFIX).await,
    };
    let items = match items {
        Ok(items) => items,
        Err(e) => return e.into_response(),
    };

    let status_filter = match parse_status_filter(query) {
        Ok(filter) => filter,
        Err(e) => return e.into_response(),
    };

    let mut samples = Vec::with_capacity(items.len());
    for item in &items {
        match sample_from_item(item) {
            Ok(sample) => samples.push(sample),
            Err(e) => return e.into_response(),
        }
    }
    if let Some(status) = status_filter {
        samples.retain(|s| s.status == status);
    }
    samples.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    let samples = store::paginate(samples, query);

    crate::respond::json(StatusCode::OK, &samples)
}

pub async fn get_sample(
    client: &DynamoClient,
    table: &str,
    sample_id: &str,
) -> Result<Response<Body>, Error> {
    match load_sample(client, table, sample_id).await {
        Ok(sample) => crate::respond::json(StatusCode::OK, &sample),
        Err(e) => e.into_response(),
    }
}

/// Update a sample's text. The status attribute is never written here;
/// only the workflow engine moves it.
pub async fn update_sample(
    client: &DynamoClient,
    table: &str,
    sample_id: &str,
    body: &[u8],
) -> Result<Response<Body>, Error> {
    let req: UpdateSampleRequest = match parse_body(body) {
        Ok(r) => r,
        Err(e) => return e.into_response(),
    };

    let mut sample = match load_sample(client, table, sample_id).await {
        Ok(sample) => sample,
        Err(e) => return e.into_response(),
    };

    if let Some(text_content) = req.text_content {
        if text_content.trim().is_empty() {
            return AppError::Validation("Sample text content must not be empty".to_string())
                .into_response();
        }
        sample.text_content = text_content;
    }

    let result = client
        .update_item()
        .table_name(table)
        .key(
            "PK",
            AttributeValue::S(format!("{}{}", store::PROJECT_PREFIX, sample.project_id)),
        )
        .key(
            "SK",
            AttributeValue::S(format!("{}{}", store::SAMPLE_PREFIX, sample.sample_id)),
        )
        .update_expression("SET text_content = :text")
        .expression_attribute_values(":text", AttributeValue::S(sample.text_content.clone()))
        .send()
        .await;

    match result {
        Ok(_) => {
            tracing::info!("sample {} updated", sample.sample_id);
            crate::respond::json(StatusCode::OK, &sample)
        }
        Err(e) => AppError::Internal(format!("sample update failed: {}", e)).into_response(),
    }
}

/// Delete a sample and its annotation/review subtree.
pub async fn delete_sample(
    client: &DynamoClient,
    table: &str,
    sample_id: &str,
) -> Result<Response<Body>, Error> {
    let sample = match load_sample(client, table, sample_id).await {
        Ok(sample) => sample,
        Err(e) => return e.into_response(),
    };

    match collect_sample_keys(client, table, &sample.project_id, sample_id).await {
        Ok(keys) => {
            let count = keys.len();
            if let Err(e) = store::delete_keys(client, table, keys).await {
                return e.into_response();
            }
            tracing::info!("deleted sample {} ({} records)", sample_id, count);
            crate::respond::no_content()
        }
        Err(e) => e.into_response(),
    }
}

/// Every key under a sample: the row, its pointer, and each annotation
/// subtree hanging off it.
pub async fn collect_sample_keys(
    client: &DynamoClient,
    table: &str,
    project_id: &str,
    sample_id: &str,
) -> Result<Vec<Item>, AppError> {
    let row_pk = format!("{}{}", store::PROJECT_PREFIX, project_id);
    let row_sk = format!("{}{}", store::SAMPLE_PREFIX, sample_id);
    let pointer = format!("{}{}", store::SAMPLE_PREFIX, sample_id);
    let mut keys = vec![
        store::make_key(&row_pk, &row_sk),
        store::make_key(&pointer, &pointer),
    ];

    let annotations =
        store::query_prefix(client, table, &pointer, store::ANNOTATION_PREFIX).await?;
    for item in &annotations {
        let sk = store::require_s(item, "SK")?;
        let annotation_id = store::strip_prefix(&sk, store::ANNOTATION_PREFIX)?;
        keys.extend(
            crate::annotations::collect_annotation_keys(client, table, &annotation_id).await?,
        );
    }

    Ok(keys)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending_sample() -> DataSample {
        DataSample {
            sample_id: "s-7".to_string(),
            project_id: "p-1".to_string(),
            text_content: "The service was excellent".to_string(),
            status: SampleStatus::Pending,
            created_at: "2026-03-02T08:00:00Z".to_string(),
        }
    }

    #[test]
    fn sample_item_round_trip() {
        let sample = pending_sample();
        let decoded = sample_from_item(&sample_item(&sample)).unwrap();
        assert_eq!(decoded.sample_id, sample.sample_id);
        assert_eq!(decoded.project_id, sample.project_id);
        assert_eq!(decoded.text_content, sample.text_content);
        assert_eq!(decoded.status, SampleStatus::Pending);
    }

    #[test]
    fn sample_lives_in_project_partition() {
        let item = sample_item(&pending_sample());
        assert_eq!(store::attr_s(&item, "PK").as_deref(), Some("PROJECT#p-1"));
        assert_eq!(store::attr_s(&item, "SK").as_deref(), Some("SAMPLE#s-7"));
    }

    #[test]
    fn pointer_carries_project_id() {
        let item = sample_pointer_item(&pending_sample());
        assert_eq!(store::attr_s(&item, "PK").as_deref(), Some("SAMPLE#s-7"));
        assert_eq!(store::attr_s(&item, "project_id").as_deref(), Some("p-1"));
    }

    #[test]
    fn status_filter_parses_or_rejects() {
        let mut query = HashMap::new();
        assert_eq!(parse_status_filter(&query).unwrap(), None);

        query.insert("status".to_string(), "pending".to_string());
        assert_eq!(
            parse_status_filter(&query).unwrap(),
            Some(SampleStatus::Pending)
        );

        query.insert("status".to_string(), "archived".to_string());
        assert!(parse_status_filter(&query).is_err());
    }

    #[test]
    fn decode_rejects_unknown_status() {
        let mut item = sample_item(&pending_sample());
        item.insert(
            "status".to_string(),
            AttributeValue::S("archived".to_string()),
        );
        assert!(sample_from_item(&item).is_err());
    }
}
