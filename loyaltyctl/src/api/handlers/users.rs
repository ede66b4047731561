use crate::{
    api::models::users::{CurrentUser, GetUserQuery, ListUsersQuery, UserCreate, UserResponse, UserUpdate},
    auth::permissions::{can_read_all_resources, can_read_own_resource, can_read_user_resource, operation, resource, RequiresPermission},
    db::{
        handlers::{users::UserFilter, Points, Repository, Users},
        models::users::{UserCreateDBRequest, UserUpdateDBRequest},
    },
    errors::{Error, Result},
    types::{Operation, Permission, Resource, UserId, UserIdOrCurrent},
    AppState,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};

// GET /users - List users
#[utoipa::path(
    get,
    path = "/users",
    tag = "users",
    summary = "List users",
    description = "List all users (Users:ReadAll required)",
    params(ListUsersQuery),
    responses(
        (status = 200, description = "List of users", body = [UserResponse]),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden"),
        (status = 500, description = "Internal server error"),
    ),
    security(
        ("X-Loyalty-User" = [])
    )
)]
pub async fn list_users(
    State(state): State<AppState>,
    Query(query): Query<ListUsersQuery>,
    _: RequiresPermission<resource::Users, operation::ReadAll>,
) -> Result<Json<Vec<UserResponse>>> {
    let skip = query.skip.unwrap_or(0);
    let limit = query.limit.unwrap_or(100).clamp(1, 1000);

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let users = Users::new(&mut conn).list(&UserFilter::new(skip, limit)).await?;

    Ok(Json(users.into_iter().map(UserResponse::from).collect()))
}

// GET /users/{user_id} - Get specific user or current user
#[utoipa::path(
    get,
    path = "/users/{user_id}",
    tag = "users",
    summary = "Get user",
    description = "Get a specific user by ID or the current user",
    params(
        ("user_id" = String, Path, description = "User ID (UUID) or 'current' for current user"),
        GetUserQuery,
    ),
    responses(
        (status = 200, description = "User information", body = UserResponse),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden - can only view own user data"),
        (status = 404, description = "User not found"),
        (status = 500, description = "Internal server error")
    ),
    security(
        ("X-Loyalty-User" = [])
    )
)]
pub async fn get_user(
    State(state): State<AppState>,
    Path(user_id): Path<UserIdOrCurrent>,
    Query(query): Query<GetUserQuery>,
    // Can't use RequiresPermission here because we need conditional logic for own vs other users
    current_user: CurrentUser,
) -> Result<Json<UserResponse>> {
    let target_user_id = user_id.resolve(current_user.id);

    if !can_read_all_resources(&current_user, Resource::Users) && !can_read_own_resource(&current_user, Resource::Users, target_user_id) {
        return Err(Error::InsufficientPermissions {
            required: Permission::Any(vec![
                Permission::Allow(Resource::Users, Operation::ReadAll),
                Permission::Allow(Resource::Users, Operation::ReadOwn),
            ]),
            action: Operation::ReadAll,
            resource: format!("user data for user {target_user_id}"),
        });
    }

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let user = Users::new(&mut conn).get_by_id(target_user_id).await?.ok_or_else(|| Error::NotFound {
        resource: "User".to_string(),
        id: target_user_id.to_string(),
    })?;

    let mut response = UserResponse::from(user);

    // The balance is only included for callers allowed to see this user's points
    if query.includes("points") && can_read_user_resource(&current_user, Resource::Points, target_user_id) {
        let balance = Points::new(&mut conn).get_balance(target_user_id).await?;
        response = response.with_points_balance(balance);
    }

    Ok(Json(response))
}

// POST /users - Create user
#[utoipa::path(
    post,
    path = "/users",
    tag = "users",
    summary = "Create user",
    description = "Create a new user (Users:CreateAll required)",
    request_body = UserCreate,
    responses(
        (status = 201, description = "User created successfully", body = UserResponse),
        (status = 400, description = "Bad request - invalid user data"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden"),
        (status = 409, description = "Username or email already in use"),
        (status = 500, description = "Internal server error"),
    ),
    security(
        ("X-Loyalty-User" = [])
    )
)]
pub async fn create_user(
    State(state): State<AppState>,
    _: RequiresPermission<resource::Users, operation::CreateAll>,
    Json(user_data): Json<UserCreate>,
) -> Result<(StatusCode, Json<UserResponse>)> {
    if user_data.username.trim().is_empty() {
        return Err(Error::BadRequest {
            message: "Username must not be empty".to_string(),
        });
    }
    if !user_data.email.contains('@') {
        return Err(Error::BadRequest {
            message: "Email must be a valid address".to_string(),
        });
    }

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let user = Users::new(&mut conn).create(&UserCreateDBRequest::from(user_data)).await?;

    Ok((StatusCode::CREATED, Json(UserResponse::from(user))))
}

// PATCH /users/{user_id} - Update user
#[utoipa::path(
    patch,
    path = "/users/{user_id}",
    tag = "users",
    summary = "Update user",
    description = "Update an existing user's profile, roles or active flag (Users:UpdateAll required)",
    request_body = UserUpdate,
    params(
        ("user_id" = uuid::Uuid, Path, description = "User ID to update"),
    ),
    responses(
        (status = 200, description = "User updated successfully", body = UserResponse),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "User not found"),
        (status = 500, description = "Internal server error"),
    ),
    security(
        ("X-Loyalty-User" = [])
    )
)]
pub async fn update_user(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    _: RequiresPermission<resource::Users, operation::UpdateAll>,
    Json(user_data): Json<UserUpdate>,
) -> Result<Json<UserResponse>> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let user = Users::new(&mut conn).update(user_id, &UserUpdateDBRequest::new(user_data)).await?;
    Ok(Json(UserResponse::from(user)))
}

// DELETE /users/{user_id} - Deactivate user
#[utoipa::path(
    delete,
    path = "/users/{user_id}",
    tag = "users",
    summary = "Deactivate user",
    description = "Deactivate a user. Their ledger history is kept. (Users:DeleteAll required)",
    params(
        ("user_id" = uuid::Uuid, Path, description = "User ID to deactivate"),
    ),
    responses(
        (status = 204, description = "User deactivated"),
        (status = 400, description = "Bad request - cannot deactivate yourself"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "User not found or already inactive"),
        (status = 500, description = "Internal server error"),
    ),
    security(
        ("X-Loyalty-User" = [])
    )
)]
pub async fn delete_user(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    current_user: RequiresPermission<resource::Users, operation::DeleteAll>,
) -> Result<StatusCode> {
    if user_id == current_user.id {
        return Err(Error::BadRequest {
            message: "You cannot deactivate your own account".to_string(),
        });
    }

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    match Users::new(&mut conn).delete(user_id).await? {
        true => Ok(StatusCode::NO_CONTENT),
        false => Err(Error::NotFound {
            resource: "User".to_string(),
            id: user_id.to_string(),
        }),
    }
}
