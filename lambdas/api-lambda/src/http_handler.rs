use annoflow_shared::{
    analytics, annotations, auth, authz, authz::Capability, projects, reviews, samples, users,
    AppState,
};
use lambda_http::{
    http::{Method, StatusCode},
    Body, Error, Request, RequestExt, Response,
};
use std::collections::HashMap;
use std::sync::Arc;

/// Main Lambda handler: CORS preflight, public auth routes, then session
/// resolution and the role-gated route table.
pub(crate) async fn function_handler(
    event: Request,
    state: Arc<AppState>,
) -> Result<Response<Body>, Error> {
    let method = event.method().clone();
    let path = event.uri().path().to_string();
    tracing::info!("{} {}", method, path);

    // Handle CORS preflight
    if method == Method::OPTIONS {
        return Ok(Response::builder()
            .status(StatusCode::OK)
            .header("Access-Control-Allow-Origin", "*")
            .header(
                "Access-Control-Allow-Methods",
                "GET,POST,PUT,PATCH,DELETE,OPTIONS",
            )
            .header(
                "Access-Control-Allow-Headers",
                "Content-Type,Authorization",
            )
            .body(Body::Empty)
            .map_err(Box::new)?);
    }

    let query: HashMap<String, String> = event
        .query_string_parameters_ref()
        .map(|params| {
            params
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect()
        })
        .unwrap_or_default();

    let client = &state.dynamo_client;
    let table = state.config.table_name.as_str();
    let config = &state.config;
    let headers = event.headers().clone();
    let body = event.body().to_vec();

    let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    // Public routes: no session required.
    match (&method, parts.as_slice()) {
        (&Method::GET, ["health"]) => {
            return annoflow_shared::respond::json(
                StatusCode::OK,
                &serde_json::json!({"status": "ok"}),
            );
        }
        (&Method::POST, ["auth", "register"]) => {
            return auth::register(client, table, &body).await;
        }
        (&Method::POST, ["auth", "login"]) => {
            return auth::login(client, table, config, &body).await;
        }
        (&Method::POST, ["auth", "verify-token"]) => {
            return auth::verify_token(config, &body).await;
        }
        _ => {}
    }

    // Everything else runs as an authenticated user.
    let user = match auth::resolve_user(client, table, config, &headers).await {
        Ok(user) => user,
        Err(e) => return e.into_response(),
    };

    macro_rules! gate {
        ($capability:expr) => {
            if let Err(e) = authz::require_capability(&user, $capability) {
                return e.into_response();
            }
        };
    }

    match (&method, parts.as_slice()) {
        // ===== SESSION =====
        (&Method::GET, ["auth", "me"]) => auth::me(&user),

        // ===== USERS =====
        (&Method::GET, ["users"]) => users::list_users(client, table).await,
        (&Method::GET, ["users", user_id]) => users::get_user(client, table, user_id).await,
        (&Method::PUT, ["users", user_id]) => {
            users::update_user(client, table, &user, user_id, &body).await
        }
        (&Method::DELETE, ["users", user_id]) => {
            users::delete_user(client, table, &user, user_id).await
        }

        // ===== PROJECTS =====
        (&Method::POST, ["projects"]) => {
            gate!(Capability::CreateProject);
            projects::create_project(client, table, &user.user_id, &body).await
        }
        (&Method::GET, ["projects"]) => projects::list_projects(client, table, &query).await,
        (&Method::GET, ["projects", project_id]) => {
            projects::get_project(client, table, project_id).await
        }
        (&Method::PATCH, ["projects", project_id]) => {
            gate!(Capability::CreateProject);
            projects::update_project(client, table, project_id, &body).await
        }
        (&Method::DELETE, ["projects", project_id]) => {
            gate!(Capability::CreateProject);
            projects::delete_project(client, table, project_id).await
        }
        (&Method::GET, ["projects", project_id, "stats"]) => {
            projects::project_stats(client, table, project_id).await
        }

        // ===== SAMPLES =====
        (&Method::POST, ["samples"]) => {
            gate!(Capability::AddSample);
            samples::create_sample(client, table, &body).await
        }
        (&Method::GET, ["samples"]) => samples::list_samples(client, table, &query).await,
        (&Method::GET, ["samples", "status", status]) => {
            let mut query = query.clone();
            query.insert("status".to_string(), status.to_string());
            samples::list_samples(client, table, &query).await
        }
        (&Method::GET, ["samples", sample_id]) => {
            samples::get_sample(client, table, sample_id).await
        }
        (&Method::PATCH, ["samples", sample_id]) => {
            gate!(Capability::AddSample);
            samples::update_sample(client, table, sample_id, &body).await
        }
        (&Method::DELETE, ["samples", sample_id]) => {
            gate!(Capability::AddSample);
            samples::delete_sample(client, table, sample_id).await
        }

        // ===== ANNOTATIONS =====
        (&Method::POST, ["annotations"]) => {
            gate!(Capability::SubmitAnnotation);
            annotations::submit_annotation(client, table, &user, &body).await
        }
        (&Method::GET, ["annotations"]) => {
            annotations::list_annotations(client, table, &query).await
        }
        (&Method::GET, ["annotations", annotation_id]) => {
            annotations::get_annotation(client, table, annotation_id).await
        }
        (&Method::DELETE, ["annotations", annotation_id]) => {
            gate!(Capability::AddSample);
            annotations::delete_annotation(client, table, annotation_id).await
        }

        // ===== REVIEWS =====
        (&Method::POST, ["reviews"]) => {
            gate!(Capability::ReviewAnnotation);
            reviews::create_review(client, table, &user, &body).await
        }
        (&Method::POST, ["reviews", "approve"]) => {
            gate!(Capability::ReviewAnnotation);
            reviews::approve(client, table, &user, &body).await
        }
        (&Method::POST, ["reviews", "reject"]) => {
            gate!(Capability::ReviewAnnotation);
            reviews::reject(client, table, &user, &body).await
        }
        (&Method::GET, ["reviews"]) => reviews::list_reviews(client, table, &query).await,
        (&Method::GET, ["reviews", review_id]) => {
            reviews::get_review(client, table, review_id).await
        }

        // ===== ANALYTICS =====
        (&Method::GET, ["analytics"]) => {
            gate!(Capability::ViewAnalytics);
            analytics::global_analytics(client, table).await
        }
        (&Method::GET, ["analytics", "projects", project_id]) => {
            gate!(Capability::ViewAnalytics);
            analytics::project_analytics(client, table, project_id).await
        }

        _ => Ok(Response::builder()
            .status(StatusCode::NOT_FOUND)
            .header("Content-Type", "application/json")
            .header("Access-Control-Allow-Origin", "*")
            .body(
                serde_json::json!({"error": "NotFound", "message": "Route not found"})
                    .to_string()
                    .into(),
            )
            .map_err(Box::new)?),
    }
}
