use crate::error::{parse_body, AppError};
use crate::store::{self, Item};
use crate::types::{Annotation, AnnotationLabel, CreateAnnotationRequest, User};
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client as DynamoClient;
use lambda_http::http::StatusCode;
use lambda_http::{Body, Error, Response};
use std::collections::HashMap;

// ========== ITEM CODEC ==========

/// Canonical annotation row, stored in its sample's partition.
pub fn annotation_item(annotation: &Annotation) -> Item {
    let mut item = HashMap::new();
    item.insert(
        "PK".to_string(),
        AttributeValue::S(format!("{}{}", store::SAMPLE_PREFIX, annotation.sample_id)),
    );
    item.insert(
        "SK".to_string(),
        AttributeValue::S(format!(
            "{}{}",
            store::ANNOTATION_PREFIX,
            annotation.annotation_id
        )),
    );
    item.insert(
        "annotator_id".to_string(),
        AttributeValue::S(annotation.annotator_id.clone()),
    );
    item.insert(
        "label".to_string(),
        AttributeValue::S(annotation.label.as_str().to_string()),
    );
    item.insert(
        "created_at".to_string(),
        AttributeValue::S(annotation.created_at.clone()),
    );
    item
}

pub fn annotation_pointer_item(annotation: &Annotation) -> Item {
    let key = format!("{}{}", store::ANNOTATION_PREFIX, annotation.annotation_id);
    let mut item = HashMap::new();
    item.insert("PK".to_string(), AttributeValue::S(key.clone()));
    item.insert("SK".to_string(), AttributeValue::S(key));
    item.insert(
        "sample_id".to_string(),
        AttributeValue::S(annotation.sample_id.clone()),
    );
    item
}

pub fn annotation_from_item(item: &Item) -> Result<Annotation, AppError> {
    let pk = store::require_s(item, "PK")?;
    let sk = store::require_s(item, "SK")?;
    let label = store::require_s(item, "label")?;
    Ok(Annotation {
        annotation_id: store::strip_prefix(&sk, store::ANNOTATION_PREFIX)?,
        sample_id: store::strip_prefix(&pk, store::SAMPLE_PREFIX)?,
        annotator_id: store::require_s(item, "annotator_id")?,
        label: label
            .parse::<AnnotationLabel>()
            .map_err(AppError::Internal)?,
        created_at: store::require_s(item, "created_at")?,
    })
}

pub async fn load_annotation(
    client: &DynamoClient,
    table: &str,
    annotation_id: &str,
) -> Result<Annotation, AppError> {
    let pointer_key = format!("{}{}", store::ANNOTATION_PREFIX, annotation_id);
    let pointer = store::get_item(client, table, &pointer_key, &pointer_key)
        .await?
        .ok_or_else(|| {
            AppError::NotFound(format!("Annotation with ID {} not found", annotation_id))
        })?;
    let sample_id = store::require_s(&pointer, "sample_id")?;

    let pk = format!("{}{}", store::SAMPLE_PREFIX, sample_id);
    let sk = format!("{}{}", store::ANNOTATION_PREFIX, annotation_id);
    match store::get_item(client, table, &pk, &sk).await? {
        Some(item) => annotation_from_item(&item),
        None => {
            tracing::error!("annotation pointer {} points at a missing row", annotation_id);
            Err(AppError::NotFound(format!(
                "Annotation with ID {} not found",
                annotation_id
            )))
        }
    }
}

// ========== HANDLERS ==========

/// Submit an annotation. All workflow semantics live in the engine; this
/// handler only parses and reports.
pub async fn submit_annotation(
    client: &DynamoClient,
    table: &str,
    annotator: &User,
    body: &[u8],
) -> Result<Response<Body>, Error> {
    let req: CreateAnnotationRequest = match parse_body(body) {
        Ok(r) => r,
        Err(e) => return e.into_response(),
    };

    match crate::workflow::annotate(client, table, &req.sample_id, &annotator.user_id, req.label)
        .await
    {
        Ok(annotation) => crate::respond::json(StatusCode::CREATED, &annotation),
        Err(e) => e.into_response(),
    }
}

/// List annotations across the table, filterable by sample or annotator.
/// Rejected annotations stay visible; the history of a sample is part of
/// the record.
pub async fn list_annotations(
    client: &DynamoClient,
    table: &str,
    query: &HashMap<String, String>,
) -> Result<Response<Body>, Error> {
    let items = match query.get("sample_id") {
        Some(sample_id) => {
            let pk = format!("{}{}", store::SAMPLE_PREFIX, sample_id);
            store::query_prefix(client, table, &pk, store::ANNOTATION_PREFIX).await
        }
        None => {
            store::scan_prefix(client, table, store::SAMPLE_PREFIX, store::ANNOTATION_PREFIX).await
        }
    };
    let items = match items {
        Ok(items) => items,
        Err(e) => return e.into_response(),
    };

    let mut annotations = Vec::with_capacity(items.len());
    for item in &items {
        match annotation_from_item(item) {
            Ok(annotation) => annotations.push(annotation),
            Err(e) => return e.into_response(),
        }
    }
    if let Some(annotator_id) = query.get("annotator_id") {
        annotations.retain(|a| &a.annotator_id == annotator_id);
    }
    annotations.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    let annotations = store::paginate(annotations, query);

    crate::respond::json(StatusCode::OK, &annotations)
}

pub async fn get_annotation(
    client: &DynamoClient,
    table: &str,
    annotation_id: &str,
) -> Result<Response<Body>, Error> {
    match load_annotation(client, table, annotation_id).await {
        Ok(annotation) => crate::respond::json(StatusCode::OK, &annotation),
        Err(e) => e.into_response(),
    }
}

/// Delete an annotation and its reviews. The owning sample's status is
/// left alone.
pub async fn delete_annotation(
    client: &DynamoClient,
    table: &str,
    annotation_id: &str,
) -> Result<Response<Body>, Error> {
    if let Err(e) = load_annotation(client, table, annotation_id).await {
        return e.into_response();
    }

    match collect_annotation_keys(client, table, annotation_id).await {
        Ok(keys) => {
            let count = keys.len();
            if let Err(e) = store::delete_keys(client, table, keys).await {
                return e.into_response();
            }
            tracing::info!("deleted annotation {} ({} records)", annotation_id, count);
            crate::respond::no_content()
        }
        Err(e) => e.into_response(),
    }
}

/// Every key under an annotation: the row, its pointer, and each review
/// (row + pointer) hanging off it.
pub async fn collect_annotation_keys(
    client: &DynamoClient,
    table: &str,
    annotation_id: &str,
) -> Result<Vec<Item>, AppError> {
    let pointer_key = format!("{}{}", store::ANNOTATION_PREFIX, annotation_id);
    let mut keys = vec![store::make_key(&pointer_key, &pointer_key)];

    if let Some(pointer) = store::get_item(client, table, &pointer_key, &pointer_key).await? {
        let sample_id = store::require_s(&pointer, "sample_id")?;
        let row_pk = format!("{}{}", store::SAMPLE_PREFIX, sample_id);
        keys.push(store::make_key(&row_pk, &pointer_key));
    }

    let reviews = store::query_prefix(client, table, &pointer_key, store::REVIEW_PREFIX).await?;
    for item in &reviews {
        let sk = store::require_s(item, "SK")?;
        keys.push(store::make_key(&pointer_key, &sk));
        let review_id = store::strip_prefix(&sk, store::REVIEW_PREFIX)?;
        let review_pointer = format!("{}{}", store::REVIEW_PREFIX, review_id);
        keys.push(store::make_key(&review_pointer, &review_pointer));
    }

    Ok(keys)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_annotation() -> Annotation {
        Annotation {
            annotation_id: "a-3".to_string(),
            sample_id: "s-7".to_string(),
            annotator_id: "u-ann".to_string(),
            label: AnnotationLabel::Negative,
            created_at: "2026-03-02T09:00:00Z".to_string(),
        }
    }

    #[test]
    fn annotation_item_round_trip() {
        let annotation = sample_annotation();
        let decoded = annotation_from_item(&annotation_item(&annotation)).unwrap();
        assert_eq!(decoded.annotation_id, annotation.annotation_id);
        assert_eq!(decoded.sample_id, annotation.sample_id);
        assert_eq!(decoded.annotator_id, annotation.annotator_id);
        assert_eq!(decoded.label, AnnotationLabel::Negative);
    }

    #[test]
    fn annotation_lives_in_sample_partition() {
        let item = annotation_item(&sample_annotation());
        assert_eq!(store::attr_s(&item, "PK").as_deref(), Some("SAMPLE#s-7"));
        assert_eq!(
            store::attr_s(&item, "SK").as_deref(),
            Some("ANNOTATION#a-3")
        );
    }

    #[test]
    fn pointer_carries_sample_id() {
        let item = annotation_pointer_item(&sample_annotation());
        assert_eq!(
            store::attr_s(&item, "PK").as_deref(),
            Some("ANNOTATION#a-3")
        );
        assert_eq!(store::attr_s(&item, "sample_id").as_deref(), Some("s-7"));
    }

    #[test]
    fn decode_rejects_unknown_label() {
        let mut item = annotation_item(&sample_annotation());
        item.insert("label".to_string(), AttributeValue::S("maybe".to_string()));
        assert!(annotation_from_item(&item).is_err());
    }
}
