use crate::error::AppError;
use aws_sdk_dynamodb::error::SdkError;
use aws_sdk_dynamodb::operation::transact_write_items::TransactWriteItemsError;
use aws_sdk_dynamodb::types::{AttributeValue, DeleteRequest, TransactWriteItem, WriteRequest};
use aws_sdk_dynamodb::Client as DynamoClient;
use std::collections::{HashMap, HashSet};

pub type Item = HashMap<String, AttributeValue>;

// Key prefixes for the single-table layout. Child records live in their
// parent's partition; *_PREFIX values never overlap as string prefixes.
pub const USER_PREFIX: &str = "USER#";
pub const EMAIL_PREFIX: &str = "EMAIL#";
pub const PROJECT_PREFIX: &str = "PROJECT#";
pub const NAME_PREFIX: &str = "NAME#";
pub const SAMPLE_PREFIX: &str = "SAMPLE#";
pub const ANNOTATION_PREFIX: &str = "ANNOTATION#";
pub const REVIEW_PREFIX: &str = "REVIEW#";

pub fn make_key(pk: &str, sk: &str) -> Item {
    let mut key = HashMap::new();
    key.insert("PK".to_string(), AttributeValue::S(pk.to_string()));
    key.insert("SK".to_string(), AttributeValue::S(sk.to_string()));
    key
}

pub fn attr_s(item: &Item, name: &str) -> Option<String> {
    item.get(name)
        .and_then(|v| v.as_s().ok())
        .map(|s| s.to_string())
}

pub fn require_s(item: &Item, name: &str) -> Result<String, AppError> {
    attr_s(item, name)
        .ok_or_else(|| AppError::Internal(format!("item missing string attribute '{}'", name)))
}

/// Strip a key prefix, failing if the record has an unexpected shape.
pub fn strip_prefix(value: &str, prefix: &str) -> Result<String, AppError> {
    value
        .strip_prefix(prefix)
        .map(|s| s.to_string())
        .ok_or_else(|| AppError::Internal(format!("key '{}' lacks prefix '{}'", value, prefix)))
}

pub async fn get_item(
    client: &DynamoClient,
    table: &str,
    pk: &str,
    sk: &str,
) -> Result<Option<Item>, AppError> {
    let result = client
        .get_item()
        .table_name(table)
        .key("PK", AttributeValue::S(pk.to_string()))
        .key("SK", AttributeValue::S(sk.to_string()))
        .send()
        .await
        .map_err(|e| AppError::Internal(format!("get_item {}/{} failed: {}", pk, sk, e)))?;

    Ok(result.item().cloned())
}

/// Query all records in one partition whose sort key carries a prefix,
/// following pagination to the end.
pub async fn query_prefix(
    client: &DynamoClient,
    table: &str,
    pk: &str,
    sk_prefix: &str,
) -> Result<Vec<Item>, AppError> {
    let mut items = Vec::new();
    let mut start_key: Option<Item> = None;

    loop {
        let mut req = client
            .query()
            .table_name(table)
            .key_condition_expression("PK = :pk AND begins_with(SK, :sk_prefix)")
            .expression_attribute_values(":pk", AttributeValue::S(pk.to_string()))
            .expression_attribute_values(":sk_prefix", AttributeValue::S(sk_prefix.to_string()));
        if let Some(k) = start_key.take() {
            req = req.set_exclusive_start_key(Some(k));
        }

        let resp = req
            .send()
            .await
            .map_err(|e| AppError::Internal(format!("query on {} failed: {}", pk, e)))?;

        items.extend_from_slice(resp.items());

        match resp.last_evaluated_key() {
            Some(k) if !k.is_empty() => start_key = Some(k.clone()),
            _ => break,
        }
    }

    Ok(items)
}

/// Scan the table for records matching a PK/SK prefix pair. Used by the
/// global list endpoints and the analytics rollup, where no single
/// partition holds the answer.
pub async fn scan_prefix(
    client: &DynamoClient,
    table: &str,
    pk_prefix: &str,
    sk_prefix: &str,
) -> Result<Vec<Item>, AppError> {
    let mut items = Vec::new();
    let mut start_key: Option<Item> = None;

    loop {
        let mut req = client
            .scan()
            .table_name(table)
            .filter_expression("begins_with(PK, :pk_prefix) AND begins_with(SK, :sk_prefix)")
            .expression_attribute_values(":pk_prefix", AttributeValue::S(pk_prefix.to_string()))
            .expression_attribute_values(":sk_prefix", AttributeValue::S(sk_prefix.to_string()));
        if let Some(k) = start_key.take() {
            req = req.set_exclusive_start_key(Some(k));
        }

        let resp = req
            .send()
            .await
            .map_err(|e| AppError::Internal(format!("scan for {} failed: {}", pk_prefix, e)))?;

        items.extend_from_slice(resp.items());

        match resp.last_evaluated_key() {
            Some(k) if !k.is_empty() => start_key = Some(k.clone()),
            _ => break,
        }
    }

    Ok(items)
}

/// Scan the whole table, following pagination to the end. The analytics
/// rollup buckets the result by key shape in one pass.
pub async fn scan_all(client: &DynamoClient, table: &str) -> Result<Vec<Item>, AppError> {
    let mut items = Vec::new();
    let mut start_key: Option<Item> = None;

    loop {
        let mut req = client.scan().table_name(table);
        if let Some(k) = start_key.take() {
            req = req.set_exclusive_start_key(Some(k));
        }

        let resp = req
            .send()
            .await
            .map_err(|e| AppError::Internal(format!("table scan failed: {}", e)))?;

        items.extend_from_slice(resp.items());

        match resp.last_evaluated_key() {
            Some(k) if !k.is_empty() => start_key = Some(k.clone()),
            _ => break,
        }
    }

    Ok(items)
}

/// Apply skip/limit query parameters to an already-ordered list.
pub fn paginate<T>(items: Vec<T>, query: &HashMap<String, String>) -> Vec<T> {
    let skip = query
        .get("skip")
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(0);
    let limit = query
        .get("limit")
        .and_then(|v| v.parse::<usize>().ok())
        .map(|v| v.clamp(1, 100))
        .unwrap_or(100);
    items.into_iter().skip(skip).take(limit).collect()
}

/// Outcome of a transactional write that distinguishes a failed
/// condition check from everything else. Condition failures are the
/// compare-and-swap losing a race or a uniqueness guard firing; callers
/// turn them into Conflict with a domain message.
#[derive(Debug)]
pub enum TransactFailure {
    ConditionFailed,
    Other(String),
}

/// Run a set of writes as one atomic transaction: either every item
/// commits or none do.
pub async fn transact_write(
    client: &DynamoClient,
    items: Vec<TransactWriteItem>,
) -> Result<(), TransactFailure> {
    match client
        .transact_write_items()
        .set_transact_items(Some(items))
        .send()
        .await
    {
        Ok(_) => Ok(()),
        Err(err) => {
            if let SdkError::ServiceError(ctx) = &err {
                if let TransactWriteItemsError::TransactionCanceledException(cancel) = ctx.err() {
                    let condition_failed = cancel
                        .cancellation_reasons()
                        .iter()
                        .any(|reason| reason.code() == Some("ConditionalCheckFailed"));
                    if condition_failed {
                        return Err(TransactFailure::ConditionFailed);
                    }
                }
            }
            Err(TransactFailure::Other(err.to_string()))
        }
    }
}

/// Batch-delete a set of keys in 25-item chunks, retrying unprocessed
/// items with backoff. Duplicate keys are collapsed first: cascade walks
/// can reach the same record through more than one parent, and DynamoDB
/// rejects batches containing duplicates.
pub async fn delete_keys(
    client: &DynamoClient,
    table: &str,
    keys: Vec<Item>,
) -> Result<(), AppError> {
    let mut seen = HashSet::new();
    let mut unique = Vec::new();
    for key in keys {
        let pk = attr_s(&key, "PK").unwrap_or_default();
        let sk = attr_s(&key, "SK").unwrap_or_default();
        if seen.insert((pk, sk)) {
            unique.push(key);
        }
    }

    for chunk in unique.chunks(25) {
        let delete_requests: Result<Vec<_>, _> = chunk
            .iter()
            .map(|key| {
                DeleteRequest::builder()
                    .set_key(Some(key.clone()))
                    .build()
                    .map(|del| WriteRequest::builder().delete_request(del).build())
            })
            .collect();
        let delete_requests = delete_requests
            .map_err(|e| AppError::Internal(format!("failed to build delete request: {}", e)))?;

        let mut attempts = 0;
        let mut unprocessed = Some(delete_requests);

        while let Some(requests) = unprocessed {
            attempts += 1;
            if attempts > 5 {
                tracing::warn!(
                    "max retry attempts reached, {} items may not be deleted",
                    requests.len()
                );
                break;
            }

            let result = client
                .batch_write_item()
                .request_items(table, requests)
                .send()
                .await
                .map_err(|e| AppError::Internal(format!("batch delete failed: {}", e)))?;

            unprocessed = result
                .unprocessed_items()
                .and_then(|items| items.get(table))
                .filter(|items| !items.is_empty())
                .cloned();

            if let Some(remaining) = &unprocessed {
                tracing::info!(
                    "retrying {} unprocessed deletes (attempt {})",
                    remaining.len(),
                    attempts
                );
                tokio::time::sleep(tokio::time::Duration::from_millis(100 * attempts as u64))
                    .await;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn make_key_shape() {
        let key = make_key("USER#1", "USER#1");
        assert_eq!(attr_s(&key, "PK").as_deref(), Some("USER#1"));
        assert_eq!(attr_s(&key, "SK").as_deref(), Some("USER#1"));
    }

    #[test]
    fn strip_prefix_enforces_shape() {
        assert_eq!(strip_prefix("SAMPLE#abc", SAMPLE_PREFIX).unwrap(), "abc");
        assert!(strip_prefix("PROJECT#abc", SAMPLE_PREFIX).is_err());
    }

    #[test]
    fn paginate_applies_skip_then_limit() {
        let items: Vec<u32> = (0..10).collect();
        let mut query = HashMap::new();
        query.insert("skip".to_string(), "3".to_string());
        query.insert("limit".to_string(), "4".to_string());
        assert_eq!(paginate(items.clone(), &query), vec![3, 4, 5, 6]);

        let empty = HashMap::new();
        assert_eq!(paginate(items, &empty).len(), 10);
    }

    #[test]
    fn paginate_caps_limit_at_hundred() {
        let items: Vec<u32> = (0..150).collect();
        let mut query = HashMap::new();
        query.insert("limit".to_string(), "1000".to_string());
        assert_eq!(paginate(items.clone(), &query).len(), 100);

        query.insert("limit".to_string(), "0".to_string());
        assert_eq!(paginate(items, &query).len(), 1);
    }

    #[test]
    fn key_prefixes_do_not_shadow_each_other() {
        let prefixes = [
            USER_PREFIX,
            EMAIL_PREFIX,
            PROJECT_PREFIX,
            NAME_PREFIX,
            SAMPLE_PREFIX,
            ANNOTATION_PREFIX,
            REVIEW_PREFIX,
        ];
        for a in &prefixes {
            for b in &prefixes {
                if a != b {
                    assert!(!a.starts_with(b), "{} shadowed by {}", a, b);
                }
            }
        }
    }
}
