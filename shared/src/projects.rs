use crate::error::{parse_body, AppError};
use crate::store::{self, Item, TransactFailure};
use crate::types::{
    CreateProjectRequest, Project, ProjectStats, SampleStatus, UpdateProjectRequest,
};
use aws_sdk_dynamodb::types::{AttributeValue, Delete, Put, TransactWriteItem};
use aws_sdk_dynamodb::Client as DynamoClient;
use lambda_http::http::StatusCode;
use lambda_http::{Body, Error, Response};
use std::collections::HashMap;

// ========== ITEM CODEC ==========

pub fn project_item(project: &Project) -> Item {
    let key = format!("{}{}", store::PROJECT_PREFIX, project.project_id);
    let mut item = HashMap::new();
    item.insert("PK".to_string(), AttributeValue::S(key.clone()));
    item.insert("SK".to_string(), AttributeValue::S(key));
    item.insert("name".to_string(), AttributeValue::S(project.name.clone()));
    if let Some(description) = &project.description {
        item.insert(
            "description".to_string(),
            AttributeValue::S(description.clone()),
        );
    }
    item.insert(
        "created_by".to_string(),
        AttributeValue::S(project.created_by.clone()),
    );
    item.insert(
        "created_at".to_string(),
        AttributeValue::S(project.created_at.clone()),
    );
    item
}

pub fn project_from_item(item: &Item) -> Result<Project, AppError> {
    let pk = store::require_s(item, "PK")?;
    Ok(Project {
        project_id: store::strip_prefix(&pk, store::PROJECT_PREFIX)?,
        name: store::require_s(item, "name")?,
        description: store::attr_s(item, "description"),
        created_by: store::require_s(item, "created_by")?,
        created_at: store::require_s(item, "created_at")?,
    })
}

pub async fn load_project(
    client: &DynamoClient,
    table: &str,
    project_id: &str,
) -> Result<Project, AppError> {
    let key = format!("{}{}", store::PROJECT_PREFIX, project_id);
    match store::get_item(client, table, &key, &key).await? {
        Some(item) => project_from_item(&item),
        None => Err(AppError::NotFound(format!(
            "Project with ID {} not found",
            project_id
        ))),
    }
}

fn name_guard_put(table: &str, name: &str, project_id: &str) -> Result<Put, AppError> {
    let key = format!("{}{}", store::NAME_PREFIX, name);
    Put::builder()
        .table_name(table)
        .item("PK", AttributeValue::S(key.clone()))
        .item("SK", AttributeValue::S(key))
        .item("project_id", AttributeValue::S(project_id.to_string()))
        .condition_expression("attribute_not_exists(PK)")
        .build()
        .map_err(|e| AppError::Internal(format!("failed to build name guard: {}", e)))
}

// ========== HANDLERS ==========

/// Create a project. The name uniqueness guard and the project record
/// commit together, so duplicate names lose the race cleanly.
pub async fn create_project(
    client: &DynamoClient,
    table: &str,
    created_by: &str,
    body: &[u8],
) -> Result<Response<Body>, Error> {
    let req: CreateProjectRequest = match parse_body(body) {
        Ok(r) => r,
        Err(e) => return e.into_response(),
    };
    if req.name.trim().is_empty() {
        return AppError::Validation("Project name must not be empty".to_string())
            .into_response();
    }

    let project = Project {
        project_id: uuid::Uuid::new_v4().to_string(),
        name: req.name,
        description: req.description,
        created_by: created_by.to_string(),
        created_at: chrono::Utc::now().to_rfc3339(),
    };

    let guard = match name_guard_put(table, &project.name, &project.project_id) {
        Ok(put) => put,
        Err(e) => return e.into_response(),
    };
    let record = match Put::builder()
        .table_name(table)
        .set_item(Some(project_item(&project)))
        .build()
    {
        Ok(put) => put,
        Err(e) => {
            return AppError::Internal(format!("failed to build project record: {}", e))
                .into_response()
        }
    };

    let result = store::transact_write(
        client,
        vec![
            TransactWriteItem::builder().put(guard).build(),
            TransactWriteItem::builder().put(record).build(),
        ],
    )
    .await;

    match result {
        Ok(()) => {
            tracing::info!("project {} created by {}", project.project_id, created_by);
            crate::respond::json(StatusCode::CREATED, &project)
        }
        Err(TransactFailure::ConditionFailed) => AppError::Conflict(format!(
            "Project with name '{}' already exists",
            project.name
        ))
        .into_response(),
        Err(TransactFailure::Other(detail)) => {
            AppError::Internal(format!("project creation failed: {}", detail)).into_response()
        }
    }
}

pub async fn list_projects(
    client: &DynamoClient,
    table: &str,
    query: &HashMap<String, String>,
) -> Result<Response<Body>, Error> {
    let items =
        match store::scan_prefix(client, table, store::PROJECT_PREFIX, store::PROJECT_PREFIX)
            .await
        {
            Ok(items) => items,
            Err(e) => return e.into_response(),
        };

    let mut projects = Vec::with_capacity(items.len());
    for item in &items {
        match project_from_item(item) {
            Ok(project) => projects.push(project),
            Err(e) => return e.into_response(),
        }
    }

    if let Some(created_by) = query.get("created_by") {
        projects.retain(|p| &p.created_by == created_by);
    }
    projects.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    let projects = store::paginate(projects, query);

    crate::respond::json(StatusCode::OK, &projects)
}

pub async fn get_project(
    client: &DynamoClient,
    table: &str,
    project_id: &str,
) -> Result<Response<Body>, Error> {
    match load_project(client, table, project_id).await {
        Ok(project) => crate::respond::json(StatusCode::OK, &project),
        Err(e) => e.into_response(),
    }
}

pub async fn update_project(
    client: &DynamoClient,
    table: &str,
    project_id: &str,
    body: &[u8],
) -> Result<Response<Body>, Error> {
    let req: UpdateProjectRequest = match parse_body(body) {
        Ok(r) => r,
        Err(e) => return e.into_response(),
    };

    let mut project = match load_project(client, table, project_id).await {
        Ok(project) => project,
        Err(e) => return e.into_response(),
    };
    let previous_name = project.name.clone();

    if let Some(name) = req.name {
        if name.trim().is_empty() {
            return AppError::Validation("Project name must not be empty".to_string())
                .into_response();
        }
        project.name = name;
    }
    if let Some(description) = req.description {
        project.description = Some(description);
    }

    let result = if project.name != previous_name {
        rename_project(client, table, &project, &previous_name).await
    } else {
        client
            .put_item()
            .table_name(table)
            .set_item(Some(project_item(&project)))
            .send()
            .await
            .map(|_| ())
            .map_err(|e| AppError::Internal(format!("failed to store project: {}", e)))
    };

    match result {
        Ok(()) => {
            tracing::info!("project {} updated", project.project_id);
            crate::respond::json(StatusCode::OK, &project)
        }
        Err(e) => e.into_response(),
    }
}

/// Rename swaps the name guards and rewrites the record atomically.
async fn rename_project(
    client: &DynamoClient,
    table: &str,
    project: &Project,
    previous_name: &str,
) -> Result<(), AppError> {
    let claim = name_guard_put(table, &project.name, &project.project_id)?;

    let old_key = format!("{}{}", store::NAME_PREFIX, previous_name);
    let release = Delete::builder()
        .table_name(table)
        .set_key(Some(store::make_key(&old_key, &old_key)))
        .build()
        .map_err(|e| AppError::Internal(format!("failed to build guard delete: {}", e)))?;

    let record = Put::builder()
        .table_name(table)
        .set_item(Some(project_item(project)))
        .build()
        .map_err(|e| AppError::Internal(format!("failed to build project record: {}", e)))?;

    store::transact_write(
        client,
        vec![
            TransactWriteItem::builder().put(claim).build(),
            TransactWriteItem::builder().delete(release).build(),
            TransactWriteItem::builder().put(record).build(),
        ],
    )
    .await
    .map_err(|failure| match failure {
        TransactFailure::ConditionFailed => AppError::Conflict(format!(
            "Project with name '{}' already exists",
            project.name
        )),
        TransactFailure::Other(detail) => {
            AppError::Internal(format!("project rename failed: {}", detail))
        }
    })
}

/// Delete a project and everything underneath it.
pub async fn delete_project(
    client: &DynamoClient,
    table: &str,
    project_id: &str,
) -> Result<Response<Body>, Error> {
    let project = match load_project(client, table, project_id).await {
        Ok(project) => project,
        Err(e) => return e.into_response(),
    };

    match collect_project_keys(client, table, project_id).await {
        Ok(mut keys) => {
            let name_key = format!("{}{}", store::NAME_PREFIX, project.name);
            keys.push(store::make_key(&name_key, &name_key));
            let count = keys.len();
            if let Err(e) = store::delete_keys(client, table, keys).await {
                return e.into_response();
            }
            tracing::info!("deleted project {} ({} records)", project_id, count);
            crate::respond::no_content()
        }
        Err(e) => e.into_response(),
    }
}

/// Walk the project's partition and collect every key in its cascade:
/// the project record, each sample (row + pointer), and each sample's
/// annotation/review subtree. The name guard is NOT included; the caller
/// owns it because user-cascade deletes also come through here.
pub async fn collect_project_keys(
    client: &DynamoClient,
    table: &str,
    project_id: &str,
) -> Result<Vec<Item>, AppError> {
    let project_key = format!("{}{}", store::PROJECT_PREFIX, project_id);
    let mut keys = vec![store::make_key(&project_key, &project_key)];

    let samples = store::query_prefix(client, table, &project_key, store::SAMPLE_PREFIX).await?;
    for item in &samples {
        let sk = store::require_s(item, "SK")?;
        let sample_id = store::strip_prefix(&sk, store::SAMPLE_PREFIX)?;
        keys.extend(crate::samples::collect_sample_keys(client, table, project_id, &sample_id).await?);
    }

    Ok(keys)
}

/// Per-project sample counts broken down by status.
pub async fn project_stats(
    client: &DynamoClient,
    table: &str,
    project_id: &str,
) -> Result<Response<Body>, Error> {
    if let Err(e) = load_project(client, table, project_id).await {
        return e.into_response();
    }

    let project_key = format!("{}{}", store::PROJECT_PREFIX, project_id);
    let items = match store::query_prefix(client, table, &project_key, store::SAMPLE_PREFIX).await
    {
        Ok(items) => items,
        Err(e) => return e.into_response(),
    };

    let mut stats = ProjectStats::default();
    for item in &items {
        let status = match store::require_s(item, "status")
            .and_then(|s| s.parse::<SampleStatus>().map_err(AppError::Internal))
        {
            Ok(status) => status,
            Err(e) => return e.into_response(),
        };
        stats.total_samples += 1;
        match status {
            SampleStatus::Pending => stats.pending_samples += 1,
            SampleStatus::Annotated => stats.annotated_samples += 1,
            SampleStatus::Reviewed => stats.reviewed_samples += 1,
        }
    }

    crate::respond::json(StatusCode::OK, &stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_project() -> Project {
        Project {
            project_id: "p-1".to_string(),
            name: "Sentiment v2".to_string(),
            description: Some("Customer feedback labelling".to_string()),
            created_by: "u-admin".to_string(),
            created_at: "2026-03-01T12:00:00Z".to_string(),
        }
    }

    #[test]
    fn project_item_round_trip() {
        let project = sample_project();
        let decoded = project_from_item(&project_item(&project)).unwrap();
        assert_eq!(decoded.project_id, project.project_id);
        assert_eq!(decoded.name, project.name);
        assert_eq!(decoded.description, project.description);
        assert_eq!(decoded.created_by, project.created_by);
    }

    #[test]
    fn missing_description_decodes_as_none() {
        let mut project = sample_project();
        project.description = None;
        let item = project_item(&project);
        assert!(!item.contains_key("description"));
        assert_eq!(project_from_item(&item).unwrap().description, None);
    }

    #[test]
    fn decode_requires_project_key_shape() {
        let mut item = project_item(&sample_project());
        item.insert("PK".to_string(), AttributeValue::S("USER#p-1".to_string()));
        assert!(project_from_item(&item).is_err());
    }
}
