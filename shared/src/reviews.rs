use crate::error::{parse_body, AppError};
use crate::store::{self, Item};
use crate::types::{
    ApproveRequest, CreateReviewRequest, RejectRequest, Review, ReviewDecision, User,
};
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client as DynamoClient;
use lambda_http::http::StatusCode;
use lambda_http::{Body, Error, Response};
use std::collections::HashMap;

// ========== ITEM CODEC ==========

/// Canonical review row, stored in its annotation's partition.
pub fn review_item(review: &Review) -> Item {
    let mut item = HashMap::new();
    item.insert(
        "PK".to_string(),
        AttributeValue::S(format!(
            "{}{}",
            store::ANNOTATION_PREFIX,
            review.annotation_id
        )),
    );
    item.insert(
        "SK".to_string(),
        AttributeValue::S(format!("{}{}", store::REVIEW_PREFIX, review.review_id)),
    );
    item.insert(
        "reviewer_id".to_string(),
        AttributeValue::S(review.reviewer_id.clone()),
    );
    item.insert(
        "decision".to_string(),
        AttributeValue::S(review.decision.as_str().to_string()),
    );
    if let Some(feedback) = &review.feedback {
        item.insert("feedback".to_string(), AttributeValue::S(feedback.clone()));
    }
    item.insert(
        "created_at".to_string(),
        AttributeValue::S(review.created_at.clone()),
    );
    item
}

pub fn review_pointer_item(review: &Review) -> Item {
    let key = format!("{}{}", store::REVIEW_PREFIX, review.review_id);
    let mut item = HashMap::new();
    item.insert("PK".to_string(), AttributeValue::S(key.clone()));
    item.insert("SK".to_string(), AttributeValue::S(key));
    item.insert(
        "annotation_id".to_string(),
        AttributeValue::S(review.annotation_id.clone()),
    );
    item
}

pub fn review_from_item(item: &Item) -> Result<Review, AppError> {
    let pk = store::require_s(item, "PK")?;
    let sk = store::require_s(item, "SK")?;
    let decision = store::require_s(item, "decision")?;
    Ok(Review {
        review_id: store::strip_prefix(&sk, store::REVIEW_PREFIX)?,
        annotation_id: store::strip_prefix(&pk, store::ANNOTATION_PREFIX)?,
        reviewer_id: store::require_s(item, "reviewer_id")?,
        decision: decision
            .parse::<ReviewDecision>()
            .map_err(AppError::Internal)?,
        feedback: store::attr_s(item, "feedback"),
        created_at: store::require_s(item, "created_at")?,
    })
}

pub async fn load_review(
    client: &DynamoClient,
    table: &str,
    review_id: &str,
) -> Result<Review, AppError> {
    let pointer_key = format!("{}{}", store::REVIEW_PREFIX, review_id);
    let pointer = store::get_item(client, table, &pointer_key, &pointer_key)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Review with ID {} not found", review_id)))?;
    let annotation_id = store::require_s(&pointer, "annotation_id")?;

    let pk = format!("{}{}", store::ANNOTATION_PREFIX, annotation_id);
    let sk = format!("{}{}", store::REVIEW_PREFIX, review_id);
    match store::get_item(client, table, &pk, &sk).await? {
        Some(item) => review_from_item(&item),
        None => {
            tracing::error!("review pointer {} points at a missing row", review_id);
            Err(AppError::NotFound(format!(
                "Review with ID {} not found",
                review_id
            )))
        }
    }
}

// ========== HANDLERS ==========

// All three submission endpoints funnel into the one engine entry point;
// the engine owns feedback validation and the status transition.

pub async fn create_review(
    client: &DynamoClient,
    table: &str,
    reviewer: &User,
    body: &[u8],
) -> Result<Response<Body>, Error> {
    let req: CreateReviewRequest = match parse_body(body) {
        Ok(r) => r,
        Err(e) => return e.into_response(),
    };

    match crate::workflow::review(
        client,
        table,
        &req.annotation_id,
        &reviewer.user_id,
        req.decision,
        req.feedback,
    )
    .await
    {
        Ok(review) => crate::respond::json(StatusCode::CREATED, &review),
        Err(e) => e.into_response(),
    }
}

pub async fn approve(
    client: &DynamoClient,
    table: &str,
    reviewer: &User,
    body: &[u8],
) -> Result<Response<Body>, Error> {
    let req: ApproveRequest = match parse_body(body) {
        Ok(r) => r,
        Err(e) => return e.into_response(),
    };

    match crate::workflow::review(
        client,
        table,
        &req.annotation_id,
        &reviewer.user_id,
        ReviewDecision::Approved,
        req.feedback,
    )
    .await
    {
        Ok(review) => crate::respond::json(StatusCode::CREATED, &review),
        Err(e) => e.into_response(),
    }
}

pub async fn reject(
    client: &DynamoClient,
    table: &str,
    reviewer: &User,
    body: &[u8],
) -> Result<Response<Body>, Error> {
    let req: RejectRequest = match parse_body(body) {
        Ok(r) => r,
        Err(e) => return e.into_response(),
    };

    match crate::workflow::review(
        client,
        table,
        &req.annotation_id,
        &reviewer.user_id,
        ReviewDecision::Rejected,
        Some(req.feedback),
    )
    .await
    {
        Ok(review) => crate::respond::json(StatusCode::CREATED, &review),
        Err(e) => e.into_response(),
    }
}

pub async fn list_reviews(
    client: &DynamoClient,
    table: &str,
    query: &HashMap<String, String>,
) -> Result<Response<Body>, Error> {
    let items = match query.get("annotation_id") {
        Some(annotation_id) => {
            let pk = format!("{}{}", store::ANNOTATION_PREFIX, annotation_id);
            store::query_prefix(client, table, &pk, store::REVIEW_PREFIX).await
        }
        None => {
            store::scan_prefix(client, table, store::ANNOTATION_PREFIX, store::REVIEW_PREFIX).await
        }
    };
    let items = match items {
        Ok(items) => items,
        Err(e) => return e.into_response(),
    };

    let decision_filter = match query.get("decision") {
        Some(raw) => match raw.parse::<ReviewDecision>() {
            Ok(decision) => Some(decision),
            Err(e) => return AppError::Validation(e).into_response(),
        },
        None => None,
    };

    let mut reviews = Vec::with_capacity(items.len());
    for item in &items {
        match review_from_item(item) {
            Ok(review) => reviews.push(review),
            Err(e) => return e.into_response(),
        }
    }
    if let Some(reviewer_id) = query.get("reviewer_id") {
        reviews.retain(|r| &r.reviewer_id == reviewer_id);
    }
    if let Some(decision) = decision_filter {
        reviews.retain(|r| r.decision == decision);
    }
    reviews.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    let reviews = store::paginate(reviews, query);

    crate::respond::json(StatusCode::OK, &reviews)
}

pub async fn get_review(
    client: &DynamoClient,
    table: &str,
    review_id: &str,
) -> Result<Response<Body>, Error> {
    match load_review(client, table, review_id).await {
        Ok(review) => crate::respond::json(StatusCode::OK, &review),
        Err(e) => e.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_review() -> Review {
        Review {
            review_id: "r-9".to_string(),
            annotation_id: "a-3".to_string(),
            reviewer_id: "u-rev".to_string(),
            decision: ReviewDecision::Rejected,
            feedback: Some("Label does not match the text".to_string()),
            created_at: "2026-03-02T10:00:00Z".to_string(),
        }
    }

    #[test]
    fn review_item_round_trip() {
        let review = sample_review();
        let decoded = review_from_item(&review_item(&review)).unwrap();
        assert_eq!(decoded.review_id, review.review_id);
        assert_eq!(decoded.annotation_id, review.annotation_id);
        assert_eq!(decoded.reviewer_id, review.reviewer_id);
        assert_eq!(decoded.decision, ReviewDecision::Rejected);
        assert_eq!(decoded.feedback, review.feedback);
    }

    #[test]
    fn review_lives_in_annotation_partition() {
        let item = review_item(&sample_review());
        assert_eq!(
            store::attr_s(&item, "PK").as_deref(),
            Some("ANNOTATION#a-3")
        );
        assert_eq!(store::attr_s(&item, "SK").as_deref(), Some("REVIEW#r-9"));
    }

    #[test]
    fn missing_feedback_decodes_as_none() {
        let mut review = sample_review();
        review.decision = ReviewDecision::Approved;
        review.feedback = None;
        let item = review_item(&review);
        assert!(!item.contains_key("feedback"));
        assert_eq!(review_from_item(&item).unwrap().feedback, None);
    }

    #[test]
    fn decode_rejects_unknown_decision() {
        let mut item = review_item(&sample_review());
        item.insert(
            "decision".to_string(),
            AttributeValue::S("deferred".to_string()),
        );
        assert!(review_from_item(&item).is_err());
    }
}
