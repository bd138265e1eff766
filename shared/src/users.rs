use crate::auth;
use crate::error::{parse_body, AppError};
use crate::store::{self, Item, TransactFailure};
use crate::types::{UpdateUserRequest, User, UserRole};
use aws_sdk_dynamodb::types::{AttributeValue, Delete, Put, TransactWriteItem};
use aws_sdk_dynamodb::Client as DynamoClient;
use lambda_http::http::StatusCode;
use lambda_http::{Body, Error, Response};
use std::collections::HashMap;

// ========== ITEM CODEC ==========

pub fn user_item(user: &User) -> Item {
    let key = format!("{}{}", store::USER_PREFIX, user.user_id);
    let mut item = HashMap::new();
    item.insert("PK".to_string(), AttributeValue::S(key.clone()));
    item.insert("SK".to_string(), AttributeValue::S(key));
    item.insert("email".to_string(), AttributeValue::S(user.email.clone()));
    item.insert(
        "password_hash".to_string(),
        AttributeValue::S(user.password_hash.clone()),
    );
    item.insert(
        "role".to_string(),
        AttributeValue::S(user.role.as_str().to_string()),
    );
    item.insert(
        "created_at".to_string(),
        AttributeValue::S(user.created_at.clone()),
    );
    item
}

pub fn user_from_item(item: &Item) -> Result<User, AppError> {
    let pk = store::require_s(item, "PK")?;
    let role = store::require_s(item, "role")?;
    Ok(User {
        user_id: store::strip_prefix(&pk, store::USER_PREFIX)?,
        email: store::require_s(item, "email")?,
        password_hash: store::require_s(item, "password_hash")?,
        role: role
            .parse::<UserRole>()
            .map_err(AppError::Internal)?,
        created_at: store::require_s(item, "created_at")?,
    })
}

pub async fn load_user(
    client: &DynamoClient,
    table: &str,
    user_id: &str,
) -> Result<User, AppError> {
    let key = format!("{}{}", store::USER_PREFIX, user_id);
    match store::get_item(client, table, &key, &key).await? {
        Some(item) => user_from_item(&item),
        None => Err(AppError::NotFound(format!(
            "User with ID {} not found",
            user_id
        ))),
    }
}

/// Look a user up through the email uniqueness guard.
pub async fn find_by_email(
    client: &DynamoClient,
    table: &str,
    email: &str,
) -> Result<Option<User>, AppError> {
    let key = format!("{}{}", store::EMAIL_PREFIX, email);
    let guard = match store::get_item(client, table, &key, &key).await? {
        Some(item) => item,
        None => return Ok(None),
    };
    let user_id = store::require_s(&guard, "user_id")?;
    match load_user(client, table, &user_id).await {
        Ok(user) => Ok(Some(user)),
        Err(AppError::NotFound(_)) => {
            tracing::error!("email guard for {} points at a missing user", email);
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

// ========== HANDLERS ==========

pub async fn list_users(client: &DynamoClient, table: &str) -> Result<Response<Body>, Error> {
    let items = match store::scan_prefix(client, table, store::USER_PREFIX, store::USER_PREFIX)
        .await
    {
        Ok(items) => items,
        Err(e) => return e.into_response(),
    };

    let mut users = Vec::with_capacity(items.len());
    for item in &items {
        match user_from_item(item) {
            Ok(user) => users.push(user),
            Err(e) => return e.into_response(),
        }
    }
    users.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    crate::respond::json(StatusCode::OK, &users)
}

pub async fn get_user(
    client: &DynamoClient,
    table: &str,
    user_id: &str,
) -> Result<Response<Body>, Error> {
    match load_user(client, table, user_id).await {
        Ok(user) => crate::respond::json(StatusCode::OK, &user),
        Err(e) => e.into_response(),
    }
}

/// A user may touch their own account; admins may touch anyone's.
fn require_self_or_admin(actor: &User, user_id: &str) -> Result<(), AppError> {
    if actor.user_id == user_id || actor.role == UserRole::Admin {
        return Ok(());
    }
    tracing::warn!(
        "user {} denied access to account {}",
        actor.user_id,
        user_id
    );
    Err(AppError::Forbidden(
        "Not authorized to modify this user".to_string(),
    ))
}

pub async fn update_user(
    client: &DynamoClient,
    table: &str,
    actor: &User,
    user_id: &str,
    body: &[u8],
) -> Result<Response<Body>, Error> {
    if let Err(e) = require_self_or_admin(actor, user_id) {
        return e.into_response();
    }

    let req: UpdateUserRequest = match parse_body(body) {
        Ok(r) => r,
        Err(e) => return e.into_response(),
    };

    let mut user = match load_user(client, table, user_id).await {
        Ok(user) => user,
        Err(e) => return e.into_response(),
    };
    let previous_email = user.email.clone();

    if let Some(password) = &req.password {
        if let Err(e) = auth::validate_password_strength(password) {
            return e.into_response();
        }
        user.password_hash = match auth::hash_password(password) {
            Ok(h) => h,
            Err(e) => return e.into_response(),
        };
    }
    if let Some(role) = req.role {
        // Only admins may grant roles.
        if actor.role != UserRole::Admin && role != user.role {
            return AppError::Forbidden("Only admins can change roles".to_string())
                .into_response();
        }
        user.role = role;
    }
    if let Some(email) = &req.email {
        if let Err(e) = auth::validate_email(email) {
            return e.into_response();
        }
        user.email = email.clone();
    }

    let result = if user.email != previous_email {
        store_user_with_email_change(client, table, &user, &previous_email).await
    } else {
        store_user(client, table, &user).await
    };

    match result {
        Ok(()) => {
            tracing::info!("user {} updated", user.user_id);
            crate::respond::json(StatusCode::OK, &user)
        }
        Err(e) => e.into_response(),
    }
}

async fn store_user(client: &DynamoClient, table: &str, user: &User) -> Result<(), AppError> {
    client
        .put_item()
        .table_name(table)
        .set_item(Some(user_item(user)))
        .send()
        .await
        .map_err(|e| AppError::Internal(format!("failed to store user: {}", e)))?;
    Ok(())
}

/// Swap the email guard and rewrite the user record in one transaction, so
/// a concurrent registration cannot slip in between.
async fn store_user_with_email_change(
    client: &DynamoClient,
    table: &str,
    user: &User,
    previous_email: &str,
) -> Result<(), AppError> {
    let new_key = format!("{}{}", store::EMAIL_PREFIX, user.email);
    let old_key = format!("{}{}", store::EMAIL_PREFIX, previous_email);

    let claim = Put::builder()
        .table_name(table)
        .item("PK", AttributeValue::S(new_key.clone()))
        .item("SK", AttributeValue::S(new_key))
        .item("user_id", AttributeValue::S(user.user_id.clone()))
        .condition_expression("attribute_not_exists(PK)")
        .build()
        .map_err(|e| AppError::Internal(format!("failed to build email guard: {}", e)))?;

    let release = Delete::builder()
        .table_name(table)
        .set_key(Some(store::make_key(&old_key, &old_key)))
        .build()
        .map_err(|e| AppError::Internal(format!("failed to build guard delete: {}", e)))?;

    let record = Put::builder()
        .table_name(table)
        .set_item(Some(user_item(user)))
        .build()
        .map_err(|e| AppError::Internal(format!("failed to build user record: {}", e)))?;

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
            "User with email {} already exists",
            user.email
        )),
        TransactFailure::Other(detail) => {
            AppError::Internal(format!("user update failed: {}", detail))
        }
    })
}

/// Delete a user and everything they own: projects they created (with the
/// full project cascade), annotations they authored (with their reviews),
/// and reviews they wrote.
pub async fn delete_user(
    client: &DynamoClient,
    table: &str,
    actor: &User,
    user_id: &str,
) -> Result<Response<Body>, Error> {
    if let Err(e) = require_self_or_admin(actor, user_id) {
        return e.into_response();
    }

    let user = match load_user(client, table, user_id).await {
        Ok(user) => user,
        Err(e) => return e.into_response(),
    };

    match collect_user_keys(client, table, &user).await {
        Ok(keys) => {
            let count = keys.len();
            if let Err(e) = store::delete_keys(client, table, keys).await {
                return e.into_response();
            }
            tracing::info!("deleted user {} and {} owned records", user_id, count);
            crate::respond::no_content()
        }
        Err(e) => e.into_response(),
    }
}

async fn collect_user_keys(
    client: &DynamoClient,
    table: &str,
    user: &User,
) -> Result<Vec<Item>, AppError> {
    let mut keys = Vec::new();

    let user_key = format!("{}{}", store::USER_PREFIX, user.user_id);
    keys.push(store::make_key(&user_key, &user_key));
    let email_key = format!("{}{}", store::EMAIL_PREFIX, user.email);
    keys.push(store::make_key(&email_key, &email_key));

    // Projects the user created, each with its full cascade.
    let projects =
        store::scan_prefix(client, table, store::PROJECT_PREFIX, store::PROJECT_PREFIX).await?;
    for item in &projects {
        if store::attr_s(item, "created_by").as_deref() == Some(user.user_id.as_str()) {
            let pk = store::require_s(item, "PK")?;
            let project_id = store::strip_prefix(&pk, store::PROJECT_PREFIX)?;
            keys.extend(crate::projects::collect_project_keys(client, table, &project_id).await?);
        }
    }

    // Annotations the user authored, each with its reviews.
    let annotations =
        store::scan_prefix(client, table, store::SAMPLE_PREFIX, store::ANNOTATION_PREFIX).await?;
    for item in &annotations {
        if store::attr_s(item, "annotator_id").as_deref() == Some(user.user_id.as_str()) {
            let sk = store::require_s(item, "SK")?;
            let annotation_id = store::strip_prefix(&sk, store::ANNOTATION_PREFIX)?;
            keys.extend(
                crate::annotations::collect_annotation_keys(client, table, &annotation_id).await?,
            );
        }
    }

    // Reviews the user wrote on other people's annotations.
    let reviews =
        store::scan_prefix(client, table, store::ANNOTATION_PREFIX, store::REVIEW_PREFIX).await?;
    for item in &reviews {
        if store::attr_s(item, "reviewer_id").as_deref() == Some(user.user_id.as_str()) {
            let pk = store::require_s(item, "PK")?;
            let sk = store::require_s(item, "SK")?;
            keys.push(store::make_key(&pk, &sk));
            let review_id = store::strip_prefix(&sk, store::REVIEW_PREFIX)?;
            let pointer = format!("{}{}", store::REVIEW_PREFIX, review_id);
            keys.push(store::make_key(&pointer, &pointer));
        }
    }

    Ok(keys)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_user() -> User {
        User {
            user_id: "u-42".to_string(),
            email: "reviewer@example.com".to_string(),
            password_hash: "$argon2id$v=19$m=19456,t=2,p=1$abc$def".to_string(),
            role: UserRole::Reviewer,
            created_at: "2026-02-03T04:05:06Z".to_string(),
        }
    }

    #[test]
    fn user_item_round_trip() {
        let user = sample_user();
        let decoded = user_from_item(&user_item(&user)).unwrap();
        assert_eq!(decoded.user_id, user.user_id);
        assert_eq!(decoded.email, user.email);
        assert_eq!(decoded.password_hash, user.password_hash);
        assert_eq!(decoded.role, user.role);
        assert_eq!(decoded.created_at, user.created_at);
    }

    #[test]
    fn user_item_key_shape() {
        let item = user_item(&sample_user());
        assert_eq!(store::attr_s(&item, "PK").as_deref(), Some("USER#u-42"));
        assert_eq!(store::attr_s(&item, "SK").as_deref(), Some("USER#u-42"));
    }

    #[test]
    fn decode_rejects_unknown_role() {
        let mut item = user_item(&sample_user());
        item.insert("role".to_string(), AttributeValue::S("owner".to_string()));
        assert!(user_from_item(&item).is_err());
    }

    #[test]
    fn self_or_admin_gate() {
        let mut actor = sample_user();
        assert!(require_self_or_admin(&actor, "u-42").is_ok());
        assert!(require_self_or_admin(&actor, "u-99").is_err());
        actor.role = UserRole::Admin;
        assert!(require_self_or_admin(&actor, "u-99").is_ok());
    }
}
