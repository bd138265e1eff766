use crate::error::AppError;
use crate::store::{self, TransactFailure};
use crate::types::{Annotation, AnnotationLabel, Review, ReviewDecision, SampleStatus};
use aws_sdk_dynamodb::types::{AttributeValue, Put, TransactWriteItem, Update};
use aws_sdk_dynamodb::Client as DynamoClient;

/// The operations that move a sample through its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowOp {
    Annotate,
    Approve,
    Reject,
}

/// The whole lifecycle in one table. Exactly three transitions exist;
/// everything else is a dead end and `reviewed` is terminal.
pub fn next_status(current: SampleStatus, op: WorkflowOp) -> Option<SampleStatus> {
    match (current, op) {
        (SampleStatus::Pending, WorkflowOp::Annotate) => Some(SampleStatus::Annotated),
        (SampleStatus::Annotated, WorkflowOp::Approve) => Some(SampleStatus::Reviewed),
        (SampleStatus::Annotated, WorkflowOp::Reject) => Some(SampleStatus::Pending),
        _ => None,
    }
}

/// Conditional status update for a sample row: the new status only lands
/// if the row still holds the status we read. This is the compare-and-swap
/// that closes the concurrent-writer race.
fn status_update(
    table: &str,
    project_id: &str,
    sample_id: &str,
    expected: SampleStatus,
    next: SampleStatus,
) -> Result<Update, AppError> {
    Update::builder()
        .table_name(table)
        .key(
            "PK",
            AttributeValue::S(format!("{}{}", store::PROJECT_PREFIX, project_id)),
        )
        .key(
            "SK",
            AttributeValue::S(format!("{}{}", store::SAMPLE_PREFIX, sample_id)),
        )
        .update_expression("SET #status = :next")
        .condition_expression("#status = :expected")
        .expression_attribute_names("#status", "status")
        .expression_attribute_values(":next", AttributeValue::S(next.as_str().to_string()))
        .expression_attribute_values(
            ":expected",
            AttributeValue::S(expected.as_str().to_string()),
        )
        .build()
        .map_err(|e| AppError::Internal(format!("failed to build status update: {}", e)))
}

fn put_item(table: &str, item: store::Item) -> Result<Put, AppError> {
    Put::builder()
        .table_name(table)
        .set_item(Some(item))
        .build()
        .map_err(|e| AppError::Internal(format!("failed to build put: {}", e)))
}

/// Admit an annotation against a pending sample. The annotation rows and
/// the pending→annotated transition commit as one transaction; losing the
/// condition check means another annotator got there first.
pub async fn annotate(
    client: &DynamoClient,
    table: &str,
    sample_id: &str,
    annotator_id: &str,
    label: AnnotationLabel,
) -> Result<Annotation, AppError> {
    let sample = crate::samples::load_sample(client, table, sample_id).await?;

    let next = next_status(sample.status, WorkflowOp::Annotate).ok_or_else(|| {
        AppError::Conflict(format!(
            "Cannot annotate sample with status '{}'. Sample must be in 'pending' status.",
            sample.status
        ))
    })?;

    let annotation = Annotation {
        annotation_id: uuid::Uuid::new_v4().to_string(),
        sample_id: sample_id.to_string(),
        annotator_id: annotator_id.to_string(),
        label,
        created_at: chrono::Utc::now().to_rfc3339(),
    };

    let row = put_item(table, crate::annotations::annotation_item(&annotation))?;
    let pointer = put_item(table, crate::annotations::annotation_pointer_item(&annotation))?;
    let transition = status_update(table, &sample.project_id, sample_id, sample.status, next)?;

    let result = store::transact_write(
        client,
        vec![
            TransactWriteItem::builder().put(row).build(),
            TransactWriteItem::builder().put(pointer).build(),
            TransactWriteItem::builder().update(transition).build(),
        ],
    )
    .await;

    match result {
        Ok(()) => {
            tracing::info!(
                "annotation {} admitted for sample {} by {}",
                annotation.annotation_id,
                sample_id,
                annotator_id
            );
            Ok(annotation)
        }
        Err(TransactFailure::ConditionFailed) => {
            // Lost the race; report the status the sample holds now.
            let current = crate::samples::load_sample(client, table, sample_id)
                .await
                .map(|s| s.status.to_string())
                .unwrap_or_else(|_| "unknown".to_string());
            tracing::warn!(
                "concurrent transition beat annotation of sample {} (now '{}')",
                sample_id,
                current
            );
            Err(AppError::Conflict(format!(
                "Cannot annotate sample with status '{}'. Sample must be in 'pending' status.",
                current
            )))
        }
        Err(TransactFailure::Other(detail)) => Err(AppError::Internal(format!(
            "annotation transaction failed: {}",
            detail
        ))),
    }
}

/// Admit a review verdict against an annotated sample. Approval moves the
/// sample to reviewed; rejection sends it back to pending and requires
/// feedback. The review rows and the transition commit as one transaction.
pub async fn review(
    client: &DynamoClient,
    table: &str,
    annotation_id: &str,
    reviewer_id: &str,
    decision: ReviewDecision,
    feedback: Option<String>,
) -> Result<Review, AppError> {
    // Feedback is checked before anything is written, whatever the caller
    // claims to have validated.
    if decision == ReviewDecision::Rejected
        && feedback.as_deref().map_or(true, |f| f.trim().is_empty())
    {
        return Err(AppError::Validation(
            "Feedback is required when rejecting an annotation".to_string(),
        ));
    }

    let annotation = crate::annotations::load_annotation(client, table, annotation_id).await?;
    let sample = crate::samples::load_sample(client, table, &annotation.sample_id)
        .await
        .map_err(|e| match e {
            AppError::NotFound(_) => AppError::NotFound(format!(
                "Data sample for annotation {} not found",
                annotation_id
            )),
            other => other,
        })?;

    let op = match decision {
        ReviewDecision::Approved => WorkflowOp::Approve,
        ReviewDecision::Rejected => WorkflowOp::Reject,
    };
    let next = next_status(sample.status, op).ok_or_else(|| {
        AppError::Conflict(format!(
            "Cannot review sample with status '{}'. Sample must be in 'annotated' status.",
            sample.status
        ))
    })?;

    let review = Review {
        review_id: uuid::Uuid::new_v4().to_string(),
        annotation_id: annotation_id.to_string(),
        reviewer_id: reviewer_id.to_string(),
        decision,
        feedback,
        created_at: chrono::Utc::now().to_rfc3339(),
    };

    let row = put_item(table, crate::reviews::review_item(&review))?;
    let pointer = put_item(table, crate::reviews::review_pointer_item(&review))?;
    let transition = status_update(
        table,
        &sample.project_id,
        &sample.sample_id,
        sample.status,
        next,
    )?;

    let result = store::transact_write(
        client,
        vec![
            TransactWriteItem::builder().put(row).build(),
            TransactWriteItem::builder().put(pointer).build(),
            TransactWriteItem::builder().update(transition).build(),
        ],
    )
    .await;

    match result {
        Ok(()) => {
            tracing::info!(
                "review {} ({}) recorded for annotation {} by {}",
                review.review_id,
                review.decision,
                annotation_id,
                reviewer_id
            );
            Ok(review)
        }
        Err(TransactFailure::ConditionFailed) => {
            let current = crate::samples::load_sample(client, table, &sample.sample_id)
                .await
                .map(|s| s.status.to_string())
                .unwrap_or_else(|_| "unknown".to_string());
            tracing::warn!(
                "concurrent transition beat review of sample {} (now '{}')",
                sample.sample_id,
                current
            );
            Err(AppError::Conflict(format!(
                "Cannot review sample with status '{}'. Sample must be in 'annotated' status.",
                current
            )))
        }
        Err(TransactFailure::Other(detail)) => Err(AppError::Internal(format!(
            "review transaction failed: {}",
            detail
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_dynamodb::config::BehaviorVersion;

    // Client that never sends a request; the feedback check fires before
    // any store call.
    fn offline_client() -> DynamoClient {
        let config = aws_sdk_dynamodb::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .build();
        DynamoClient::from_conf(config)
    }

    #[tokio::test]
    async fn rejection_without_feedback_fails_before_any_write() {
        let client = offline_client();
        let err = review(
            &client,
            "table",
            "a-1",
            "u-rev",
            ReviewDecision::Rejected,
            None,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn rejection_with_blank_feedback_fails_before_any_write() {
        let client = offline_client();
        let err = review(
            &client,
            "table",
            "a-1",
            "u-rev",
            ReviewDecision::Rejected,
            Some("   ".to_string()),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn only_three_transitions_exist() {
        let statuses = [
            SampleStatus::Pending,
            SampleStatus::Annotated,
            SampleStatus::Reviewed,
        ];
        let ops = [WorkflowOp::Annotate, WorkflowOp::Approve, WorkflowOp::Reject];

        let mut live = Vec::new();
        for status in statuses {
            for op in ops {
                if let Some(next) = next_status(status, op) {
                    live.push((status, op, next));
                }
            }
        }
        assert_eq!(
            live,
            vec![
                (
                    SampleStatus::Pending,
                    WorkflowOp::Annotate,
                    SampleStatus::Annotated
                ),
                (
                    SampleStatus::Annotated,
                    WorkflowOp::Approve,
                    SampleStatus::Reviewed
                ),
                (
                    SampleStatus::Annotated,
                    WorkflowOp::Reject,
                    SampleStatus::Pending
                ),
            ]
        );
    }

    #[test]
    fn reviewed_is_terminal() {
        for op in [WorkflowOp::Annotate, WorkflowOp::Approve, WorkflowOp::Reject] {
            assert_eq!(next_status(SampleStatus::Reviewed, op), None);
        }
    }

    #[test]
    fn pending_cannot_be_reviewed() {
        assert_eq!(next_status(SampleStatus::Pending, WorkflowOp::Approve), None);
        assert_eq!(next_status(SampleStatus::Pending, WorkflowOp::Reject), None);
    }

    #[test]
    fn annotated_cannot_be_annotated_again() {
        assert_eq!(
            next_status(SampleStatus::Annotated, WorkflowOp::Annotate),
            None
        );
    }

    #[test]
    fn rejection_returns_to_pending_and_is_annotatable_again() {
        let back = next_status(SampleStatus::Annotated, WorkflowOp::Reject).unwrap();
        assert_eq!(back, SampleStatus::Pending);
        assert_eq!(
            next_status(back, WorkflowOp::Annotate),
            Some(SampleStatus::Annotated)
        );
    }
}
