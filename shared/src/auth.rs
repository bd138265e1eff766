use crate::config::Config;
use crate::error::{parse_body, AppError};
use crate::store::{self, TransactFailure};
use crate::types::{LoginRequest, RegisterRequest, TokenResponse, User, UserRole, VerifyTokenRequest};
use crate::users;
use argon2::password_hash::{rand_core::OsRng, SaltString};
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use aws_sdk_dynamodb::types::{AttributeValue, Put, TransactWriteItem};
use aws_sdk_dynamodb::Client as DynamoClient;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use hmac::{Hmac, Mac};
use lambda_http::http::{HeaderMap, StatusCode};
use lambda_http::{Body, Error, Response};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

const JWT_HEADER: &[u8] = br#"{"alg":"HS256","typ":"JWT"}"#;

/// JWT claims carried by an access token.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub email: String,
    pub role: UserRole,
    pub iat: i64,
    pub exp: i64,
    #[serde(rename = "type")]
    pub token_type: String,
}

// ========== PASSWORDS ==========

pub fn validate_password_strength(password: &str) -> Result<(), AppError> {
    if password.chars().count() < 8 {
        return Err(AppError::Validation(
            "Password must be at least 8 characters long".to_string(),
        ));
    }
    if password.chars().count() > 128 {
        return Err(AppError::Validation(
            "Password must be 128 characters or fewer".to_string(),
        ));
    }
    if !password.chars().any(|c| c.is_ascii_uppercase()) {
        return Err(AppError::Validation(
            "Password must contain at least one uppercase letter".to_string(),
        ));
    }
    if !password.chars().any(|c| c.is_ascii_lowercase()) {
        return Err(AppError::Validation(
            "Password must contain at least one lowercase letter".to_string(),
        ));
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        return Err(AppError::Validation(
            "Password must contain at least one digit".to_string(),
        ));
    }
    Ok(())
}

/// Minimal email shape check: one '@' with non-empty local and domain
/// parts. Guard records are keyed on the email, so garbage must be kept
/// out of the keyspace.
pub fn validate_email(email: &str) -> Result<(), AppError> {
    let valid = email
        .split_once('@')
        .map(|(local, domain)| {
            !local.is_empty()
                && !domain.is_empty()
                && !domain.contains('@')
                && !email.chars().any(char::is_whitespace)
        })
        .unwrap_or(false);
    if !valid {
        return Err(AppError::Validation(format!(
            "Invalid email address: {}",
            email
        )));
    }
    Ok(())
}

pub fn hash_password(password: &str) -> Result<String, AppError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::Internal(format!("password hashing failed: {}", e)))
}

pub fn verify_password(password: &str, password_hash: &str) -> bool {
    match PasswordHash::new(password_hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            tracing::error!("stored password hash unparseable: {}", e);
            false
        }
    }
}

// ========== TOKENS ==========

fn encode_token(secret: &str, claims: &Claims) -> Result<String, AppError> {
    let header = URL_SAFE_NO_PAD.encode(JWT_HEADER);
    let payload = serde_json::to_vec(claims)
        .map_err(|e| AppError::Internal(format!("failed to serialize claims: {}", e)))?;
    let payload = URL_SAFE_NO_PAD.encode(payload);
    let signing_input = format!("{}.{}", header, payload);

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| AppError::Internal(format!("invalid signing key: {}", e)))?;
    mac.update(signing_input.as_bytes());
    let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

    Ok(format!("{}.{}", signing_input, signature))
}

/// Issue a signed, time-limited access token for a user.
pub fn create_access_token(config: &Config, user: &User) -> Result<String, AppError> {
    let now = chrono::Utc::now();
    let claims = Claims {
        sub: user.user_id.clone(),
        email: user.email.clone(),
        role: user.role,
        iat: now.timestamp(),
        exp: (now + chrono::Duration::minutes(config.token_expiry_minutes)).timestamp(),
        token_type: "access".to_string(),
    };
    encode_token(&config.jwt_secret, &claims)
}

/// Verify signature, expiry, and token type; returns the claims when the
/// token is valid.
pub fn decode_access_token(secret: &str, token: &str) -> Option<Claims> {
    let mut parts = token.split('.');
    let header = parts.next()?;
    let payload = parts.next()?;
    let signature = parts.next()?;
    if parts.next().is_some() {
        return None;
    }

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(format!("{}.{}", header, payload).as_bytes());
    let signature = URL_SAFE_NO_PAD.decode(signature).ok()?;
    if mac.verify_slice(&signature).is_err() {
        tracing::warn!("token signature verification failed");
        return None;
    }

    let claims: Claims = serde_json::from_slice(&URL_SAFE_NO_PAD.decode(payload).ok()?).ok()?;
    if claims.token_type != "access" {
        tracing::warn!("token type mismatch");
        return None;
    }
    if claims.exp <= chrono::Utc::now().timestamp() {
        tracing::warn!("token has expired");
        return None;
    }
    Some(claims)
}

/// Session resolver: bearer token in, authenticated user out.
pub async fn resolve_user(
    client: &DynamoClient,
    table: &str,
    config: &Config,
    headers: &HeaderMap,
) -> Result<User, AppError> {
    let header = headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("Not authenticated".to_string()))?;
    let token = header
        .strip_prefix("Bearer ")
        .ok_or_else(|| AppError::Unauthorized("Not authenticated".to_string()))?;

    let claims = decode_access_token(&config.jwt_secret, token)
        .ok_or_else(|| AppError::Unauthorized("Could not validate credentials".to_string()))?;

    users::load_user(client, table, &claims.sub).await.map_err(|e| {
        tracing::warn!("user {} from token not resolvable: {}", claims.sub, e);
        AppError::Unauthorized("Could not validate credentials".to_string())
    })
}

// ========== HANDLERS ==========

/// Register a new user account.
pub async fn register(
    client: &DynamoClient,
    table: &str,
    body: &[u8],
) -> Result<Response<Body>, Error> {
    let req: RegisterRequest = match parse_body(body) {
        Ok(r) => r,
        Err(e) => return e.into_response(),
    };

    if let Err(e) = validate_email(&req.email) {
        return e.into_response();
    }
    if let Err(e) = validate_password_strength(&req.password) {
        return e.into_response();
    }

    let password_hash = match hash_password(&req.password) {
        Ok(h) => h,
        Err(e) => return e.into_response(),
    };

    let user = User {
        user_id: uuid::Uuid::new_v4().to_string(),
        email: req.email,
        password_hash,
        role: req.role.unwrap_or(UserRole::Annotator),
        created_at: chrono::Utc::now().to_rfc3339(),
    };

    match create_user(client, table, &user).await {
        Ok(()) => {
            tracing::info!("new user registered: {} ({})", user.user_id, user.email);
            crate::respond::json(StatusCode::CREATED, &user)
        }
        Err(e) => e.into_response(),
    }
}

/// Persist a user record together with its email uniqueness guard.
async fn create_user(client: &DynamoClient, table: &str, user: &User) -> Result<(), AppError> {
    let email_key = format!("{}{}", store::EMAIL_PREFIX, user.email);
    let guard = Put::builder()
        .table_name(table)
        .item("PK", AttributeValue::S(email_key.clone()))
        .item("SK", AttributeValue::S(email_key))
        .item("user_id", AttributeValue::S(user.user_id.clone()))
        .condition_expression("attribute_not_exists(PK)")
        .build()
        .map_err(|e| AppError::Internal(format!("failed to build email guard: {}", e)))?;

    let record = Put::builder()
        .table_name(table)
        .set_item(Some(users::user_item(user)))
        .build()
        .map_err(|e| AppError::Internal(format!("failed to build user record: {}", e)))?;

    store::transact_write(
        client,
        vec![
            TransactWriteItem::builder().put(guard).build(),
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
            AppError::Internal(format!("user registration failed: {}", detail))
        }
    })
}

/// Authenticate with email + password and hand back an access token.
pub async fn login(
    client: &DynamoClient,
    table: &str,
    config: &Config,
    body: &[u8],
) -> Result<Response<Body>, Error> {
    let req: LoginRequest = match parse_body(body) {
        Ok(r) => r,
        Err(e) => return e.into_response(),
    };

    match authenticate(client, table, &req.email, &req.password).await {
        Ok(user) => match create_access_token(config, &user) {
            Ok(access_token) => {
                tracing::info!("access token created for user {}", user.user_id);
                crate::respond::json(
                    StatusCode::OK,
                    &TokenResponse {
                        access_token,
                        token_type: "bearer".to_string(),
                    },
                )
            }
            Err(e) => e.into_response(),
        },
        Err(e) => e.into_response(),
    }
}

async fn authenticate(
    client: &DynamoClient,
    table: &str,
    email: &str,
    password: &str,
) -> Result<User, AppError> {
    let user = match users::find_by_email(client, table, email).await? {
        Some(user) => user,
        None => {
            tracing::warn!("authentication failed: no user for email {}", email);
            return Err(AppError::Unauthorized(
                "Incorrect email or password".to_string(),
            ));
        }
    };

    if !verify_password(password, &user.password_hash) {
        tracing::warn!("authentication failed: bad password for user {}", user.user_id);
        return Err(AppError::Unauthorized(
            "Incorrect email or password".to_string(),
        ));
    }

    tracing::info!("user {} authenticated", user.user_id);
    Ok(user)
}

/// Check whether a presented token is currently valid.
pub async fn verify_token(config: &Config, body: &[u8]) -> Result<Response<Body>, Error> {
    let req: VerifyTokenRequest = match parse_body(body) {
        Ok(r) => r,
        Err(e) => return e.into_response(),
    };

    if decode_access_token(&config.jwt_secret, &req.token).is_some() {
        crate::respond::json(
            StatusCode::OK,
            &serde_json::json!({"valid": true, "message": "Token is valid"}),
        )
    } else {
        AppError::Unauthorized("Invalid or expired token".to_string()).into_response()
    }
}

/// Return the already-resolved current user.
pub fn me(user: &User) -> Result<Response<Body>, Error> {
    crate::respond::json(StatusCode::OK, user)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Config {
        Config {
            table_name: "test".to_string(),
            jwt_secret: "unit-test-secret".to_string(),
            token_expiry_minutes: 30,
        }
    }

    fn test_user() -> User {
        User {
            user_id: "11111111-2222-3333-4444-555555555555".to_string(),
            email: "annotator@example.com".to_string(),
            password_hash: String::new(),
            role: UserRole::Annotator,
            created_at: "2026-01-01T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn password_strength_rules() {
        assert!(validate_password_strength("Passw0rd").is_ok());
        assert!(validate_password_strength("Sh0rt").is_err());
        assert!(validate_password_strength("alllower1").is_err());
        assert!(validate_password_strength("ALLUPPER1").is_err());
        assert!(validate_password_strength("NoDigitsHere").is_err());
        let long = format!("Aa1{}", "x".repeat(130));
        assert!(validate_password_strength(&long).is_err());
    }

    #[test]
    fn email_shape_rules() {
        assert!(validate_email("annotator@example.com").is_ok());
        assert!(validate_email("a@b").is_ok());
        assert!(validate_email("").is_err());
        assert!(validate_email("no-at-sign").is_err());
        assert!(validate_email("@example.com").is_err());
        assert!(validate_email("user@").is_err());
        assert!(validate_email("a@b@c").is_err());
        assert!(validate_email("user name@example.com").is_err());
    }

    #[test]
    fn hash_and_verify_round_trip() {
        let hash = hash_password("Passw0rd!").unwrap();
        assert!(verify_password("Passw0rd!", &hash));
        assert!(!verify_password("Passw0rd?", &hash));
    }

    #[test]
    fn verify_rejects_garbage_hash() {
        assert!(!verify_password("Passw0rd!", "not-a-phc-string"));
    }

    #[test]
    fn token_round_trip() {
        let config = test_config();
        let user = test_user();
        let token = create_access_token(&config, &user).unwrap();
        let claims = decode_access_token(&config.jwt_secret, &token).unwrap();
        assert_eq!(claims.sub, user.user_id);
        assert_eq!(claims.email, user.email);
        assert_eq!(claims.role, UserRole::Annotator);
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn token_rejected_with_wrong_secret() {
        let config = test_config();
        let token = create_access_token(&config, &test_user()).unwrap();
        assert!(decode_access_token("another-secret", &token).is_none());
    }

    #[test]
    fn tampered_payload_rejected() {
        let config = test_config();
        let token = create_access_token(&config, &test_user()).unwrap();
        let mut parts: Vec<&str> = token.split('.').collect();
        let forged = URL_SAFE_NO_PAD.encode(
            br#"{"sub":"attacker","email":"x@y.z","role":"admin","iat":0,"exp":99999999999,"type":"access"}"#,
        );
        parts[1] = &forged;
        assert!(decode_access_token(&config.jwt_secret, &parts.join(".")).is_none());
    }

    #[test]
    fn expired_token_rejected() {
        let config = test_config();
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            sub: "u".to_string(),
            email: "u@example.com".to_string(),
            role: UserRole::Admin,
            iat: now - 7200,
            exp: now - 3600,
            token_type: "access".to_string(),
        };
        let token = encode_token(&config.jwt_secret, &claims).unwrap();
        assert!(decode_access_token(&config.jwt_secret, &token).is_none());
    }

    #[test]
    fn non_access_token_rejected() {
        let config = test_config();
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            sub: "u".to_string(),
            email: "u@example.com".to_string(),
            role: UserRole::Admin,
            iat: now,
            exp: now + 3600,
            token_type: "refresh".to_string(),
        };
        let token = encode_token(&config.jwt_secret, &claims).unwrap();
        assert!(decode_access_token(&config.jwt_secret, &token).is_none());
    }
}
