use crate::error::AppError;
use crate::store::{self, Item};
use crate::types::{AnalyticsResponse, Annotation, DataSample, Review, ReviewDecision, SampleStatus};
use aws_sdk_dynamodb::Client as DynamoClient;
use lambda_http::http::StatusCode;
use lambda_http::{Body, Error, Response};
use std::collections::HashSet;

fn percentage(count: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    ((count as f64 / total as f64) * 100.0 * 100.0).round() / 100.0
}

/// Fold samples, annotations, and reviews into the analytics rollup.
/// Pure so the math is testable without a store.
pub fn compute(
    samples: &[DataSample],
    annotations: &[Annotation],
    reviews: &[Review],
) -> AnalyticsResponse {
    let mut pending = 0u64;
    let mut annotated = 0u64;
    let mut reviewed = 0u64;
    for sample in samples {
        match sample.status {
            SampleStatus::Pending => pending += 1,
            SampleStatus::Annotated => annotated += 1,
            SampleStatus::Reviewed => reviewed += 1,
        }
    }

    let approvals = reviews
        .iter()
        .filter(|r| r.decision == ReviewDecision::Approved)
        .count();
    let rejections = reviews.len() - approvals;

    let annotators: HashSet<&str> = annotations
        .iter()
        .map(|a| a.annotator_id.as_str())
        .collect();

    AnalyticsResponse {
        total_samples: samples.len() as u64,
        pending_samples: pending,
        annotated_samples: annotated,
        reviewed_samples: reviewed,
        approval_rate: percentage(approvals, reviews.len()),
        rejection_rate: percentage(rejections, reviews.len()),
        annotator_contribution_count: annotators.len() as u64,
    }
}

/// Classify a raw table item by its key shape.
enum RecordKind {
    Sample,
    Annotation,
    Review,
    Other,
}

fn classify(item: &Item) -> RecordKind {
    let pk = store::attr_s(item, "PK").unwrap_or_default();
    let sk = store::attr_s(item, "SK").unwrap_or_default();
    if pk.starts_with(store::PROJECT_PREFIX) && sk.starts_with(store::SAMPLE_PREFIX) {
        RecordKind::Sample
    } else if pk.starts_with(store::SAMPLE_PREFIX) && sk.starts_with(store::ANNOTATION_PREFIX) {
        RecordKind::Annotation
    } else if pk.starts_with(store::ANNOTATION_PREFIX) && sk.starts_with(store::REVIEW_PREFIX) {
        RecordKind::Review
    } else {
        RecordKind::Other
    }
}

fn bucket(
    items: &[Item],
) -> Result<(Vec<DataSample>, Vec<Annotation>, Vec<Review>), AppError> {
    let mut samples = Vec::new();
    let mut annotations = Vec::new();
    let mut reviews = Vec::new();
    for item in items {
        match classify(item) {
            RecordKind::Sample => samples.push(crate::samples::sample_from_item(item)?),
            RecordKind::Annotation => {
                annotations.push(crate::annotations::annotation_from_item(item)?)
            }
            RecordKind::Review => reviews.push(crate::reviews::review_from_item(item)?),
            RecordKind::Other => {}
        }
    }
    Ok((samples, annotations, reviews))
}

/// Workspace-wide analytics: one table scan, bucketed by key shape.
pub async fn global_analytics(
    client: &DynamoClient,
    table: &str,
) -> Result<Response<Body>, Error> {
    let items = match store::scan_all(client, table).await {
        Ok(items) => items,
        Err(e) => return e.into_response(),
    };

    match bucket(&items) {
        Ok((samples, annotations, reviews)) => {
            let rollup = compute(&samples, &annotations, &reviews);
            tracing::info!(
                "analytics rollup over {} samples, {} annotations, {} reviews",
                samples.len(),
                annotations.len(),
                reviews.len()
            );
            crate::respond::json(StatusCode::OK, &rollup)
        }
        Err(e) => e.into_response(),
    }
}

/// Analytics scoped to one project: walk its partition down through
/// samples, annotations, and reviews.
pub async fn project_analytics(
    client: &DynamoClient,
    table: &str,
    project_id: &str,
) -> Result<Response<Body>, Error> {
    if let Err(e) = crate::projects::load_project(client, table, project_id).await {
        return e.into_response();
    }

    match collect_project_records(client, table, project_id).await {
        Ok((samples, annotations, reviews)) => {
            let rollup = compute(&samples, &annotations, &reviews);
            crate::respond::json(StatusCode::OK, &rollup)
        }
        Err(e) => e.into_response(),
    }
}

async fn collect_project_records(
    client: &DynamoClient,
    table: &str,
    project_id: &str,
) -> Result<(Vec<DataSample>, Vec<Annotation>, Vec<Review>), AppError> {
    let project_key = format!("{}{}", store::PROJECT_PREFIX, project_id);
    let sample_items =
        store::query_prefix(client, table, &project_key, store::SAMPLE_PREFIX).await?;

    let mut samples = Vec::with_capacity(sample_items.len());
    let mut annotations = Vec::new();
    let mut reviews = Vec::new();

    for item in &sample_items {
        let sample = crate::samples::sample_from_item(item)?;
        let sample_key = format!("{}{}", store::SAMPLE_PREFIX, sample.sample_id);
        let annotation_items =
            store::query_prefix(client, table, &sample_key, store::ANNOTATION_PREFIX).await?;

        for annotation_item in &annotation_items {
            let annotation = crate::annotations::annotation_from_item(annotation_item)?;
            let annotation_key =
                format!("{}{}", store::ANNOTATION_PREFIX, annotation.annotation_id);
            let review_items =
                store::query_prefix(client, table, &annotation_key, store::REVIEW_PREFIX).await?;
            for review_item in &review_items {
                reviews.push(crate::reviews::review_from_item(review_item)?);
            }
            annotations.push(annotation);
        }
        samples.push(sample);
    }

    Ok((samples, annotations, reviews))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AnnotationLabel;

    fn sample(id: &str, status: SampleStatus) -> DataSample {
        DataSample {
            sample_id: id.to_string(),
            project_id: "p-1".to_string(),
            text_content: "text".to_string(),
            status,
            created_at: "2026-03-01T00:00:00Z".to_string(),
        }
    }

    fn annotation(id: &str, annotator_id: &str) -> Annotation {
        Annotation {
            annotation_id: id.to_string(),
            sample_id: "s-1".to_string(),
            annotator_id: annotator_id.to_string(),
            label: AnnotationLabel::Positive,
            created_at: "2026-03-01T00:00:00Z".to_string(),
        }
    }

    fn review(id: &str, decision: ReviewDecision) -> Review {
        Review {
            review_id: id.to_string(),
            annotation_id: "a-1".to_string(),
            reviewer_id: "u-rev".to_string(),
            decision,
            feedback: None,
            created_at: "2026-03-01T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn empty_workspace_rolls_up_to_zeroes() {
        let rollup = compute(&[], &[], &[]);
        assert_eq!(rollup.total_samples, 0);
        assert_eq!(rollup.approval_rate, 0.0);
        assert_eq!(rollup.rejection_rate, 0.0);
        assert_eq!(rollup.annotator_contribution_count, 0);
    }

    #[test]
    fn status_counts_are_exact() {
        let samples = vec![
            sample("s-1", SampleStatus::Pending),
            sample("s-2", SampleStatus::Pending),
            sample("s-3", SampleStatus::Annotated),
            sample("s-4", SampleStatus::Reviewed),
        ];
        let rollup = compute(&samples, &[], &[]);
        assert_eq!(rollup.total_samples, 4);
        assert_eq!(rollup.pending_samples, 2);
        assert_eq!(rollup.annotated_samples, 1);
        assert_eq!(rollup.reviewed_samples, 1);
    }

    #[test]
    fn rates_round_to_two_decimals() {
        let reviews = vec![
            review("r-1", ReviewDecision::Approved),
            review("r-2", ReviewDecision::Rejected),
            review("r-3", ReviewDecision::Rejected),
        ];
        let rollup = compute(&[], &[], &reviews);
        assert_eq!(rollup.approval_rate, 33.33);
        assert_eq!(rollup.rejection_rate, 66.67);
    }

    #[test]
    fn rates_sum_to_hundred_when_reviews_exist() {
        let reviews = vec![
            review("r-1", ReviewDecision::Approved),
            review("r-2", ReviewDecision::Approved),
        ];
        let rollup = compute(&[], &[], &reviews);
        assert_eq!(rollup.approval_rate, 100.0);
        assert_eq!(rollup.rejection_rate, 0.0);
    }

    #[test]
    fn annotator_count_is_distinct() {
        let annotations = vec![
            annotation("a-1", "u-1"),
            annotation("a-2", "u-1"),
            annotation("a-3", "u-2"),
        ];
        let rollup = compute(&[], &annotations, &[]);
        assert_eq!(rollup.annotator_contribution_count, 2);
    }

    #[test]
    fn bucket_splits_by_key_shape() {
        let items = vec![
            crate::samples::sample_item(&sample("s-1", SampleStatus::Pending)),
            crate::annotations::annotation_item(&annotation("a-1", "u-1")),
            crate::reviews::review_item(&review("r-1", ReviewDecision::Approved)),
            store::make_key("USER#u-1", "USER#u-1"),
        ];
        let (samples, annotations, reviews) = bucket(&items).unwrap();
        assert_eq!(samples.len(), 1);
        assert_eq!(annotations.len(), 1);
        assert_eq!(reviews.len(), 1);
    }
}
