use crate::{
    api::models::users::Role,
    db::{
        errors::{DbError, Result},
        handlers::repository::Repository,
        models::users::{UserCreateDBRequest, UserDBResponse, UserUpdateDBRequest},
    },
    types::UserId,
};
use chrono::{DateTime, Utc};
use sqlx::{Connection, FromRow, PgConnection};
use std::collections::HashMap;
use tracing::instrument;

/// Filter for listing users
#[derive(Debug, Clone)]
pub struct UserFilter {
    pub skip: i64,
    pub limit: i64,
}

impl UserFilter {
    pub fn new(skip: i64, limit: i64) -> Self {
        Self { skip, limit }
    }
}

// Database entity model for a user, roles are loaded separately
#[derive(Debug, Clone, FromRow)]
struct User {
    id: UserId,
    username: String,
    email: String,
    display_name: Option<String>,
    is_admin: bool,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl User {
    fn with_roles(self, roles: Vec<Role>) -> UserDBResponse {
        UserDBResponse {
            id: self.id,
            username: self.username,
            email: self.email,
            display_name: self.display_name,
            is_admin: self.is_admin,
            is_active: self.is_active,
            roles,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

const USER_COLUMNS: &str = "id, username, email, display_name, is_admin, is_active, created_at, updated_at";

pub struct Users<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Users<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    async fn roles_for(&mut self, user_id: UserId) -> Result<Vec<Role>> {
        let roles = sqlx::query_scalar::<_, Role>("SELECT role FROM user_roles WHERE user_id = $1 ORDER BY role")
            .bind(user_id)
            .fetch_all(&mut *self.db)
            .await?;
        Ok(roles)
    }

    async fn roles_for_bulk(&mut self, user_ids: &[UserId]) -> Result<HashMap<UserId, Vec<Role>>> {
        let rows = sqlx::query_as::<_, (UserId, Role)>("SELECT user_id, role FROM user_roles WHERE user_id = ANY($1) ORDER BY role")
            .bind(user_ids)
            .fetch_all(&mut *self.db)
            .await?;

        let mut map: HashMap<UserId, Vec<Role>> = HashMap::new();
        for (user_id, role) in rows {
            map.entry(user_id).or_default().push(role);
        }
        Ok(map)
    }

    async fn replace_roles(conn: &mut PgConnection, user_id: UserId, roles: &[Role]) -> Result<()> {
        sqlx::query("DELETE FROM user_roles WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *conn)
            .await?;
        for role in roles {
            sqlx::query("INSERT INTO user_roles (user_id, role) VALUES ($1, $2) ON CONFLICT DO NOTHING")
                .bind(user_id)
                .bind(role)
                .execute(&mut *conn)
                .await?;
        }
        Ok(())
    }

    /// Look up an active or inactive user by email
    #[instrument(skip(self), err)]
    pub async fn get_user_by_email(&mut self, email: &str) -> Result<Option<UserDBResponse>> {
        let user = sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1"))
            .bind(email)
            .fetch_optional(&mut *self.db)
            .await?;

        match user {
            Some(user) => {
                let roles = self.roles_for(user.id).await?;
                Ok(Some(user.with_roles(roles)))
            }
            None => Ok(None),
        }
    }

    pub async fn exists(&mut self, user_id: UserId) -> Result<bool> {
        let exists = sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM users WHERE id = $1)")
            .bind(user_id)
            .fetch_one(&mut *self.db)
            .await?;
        Ok(exists)
    }
}

#[async_trait::async_trait]
impl<'c> Repository for Users<'c> {
    type CreateRequest = UserCreateDBRequest;
    type UpdateRequest = UserUpdateDBRequest;
    type Response = UserDBResponse;
    type Id = UserId;
    type Filter = UserFilter;

    #[instrument(skip(self, request), fields(email = %request.email), err)]
    async fn create(&mut self, request: &Self::CreateRequest) -> Result<Self::Response> {
        let mut tx = self.db.begin().await?;

        let user = sqlx::query_as::<_, User>(&format!(
            "INSERT INTO users (username, email, display_name, is_admin) VALUES ($1, $2, $3, $4) RETURNING {USER_COLUMNS}"
        ))
        .bind(&request.username)
        .bind(&request.email)
        .bind(&request.display_name)
        .bind(request.is_admin)
        .fetch_one(&mut *tx)
        .await?;

        Self::replace_roles(&mut tx, user.id, &request.roles).await?;
        tx.commit().await?;

        Ok(user.with_roles(request.roles.clone()))
    }

    async fn get_by_id(&mut self, id: Self::Id) -> Result<Option<Self::Response>> {
        let user = sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;

        match user {
            Some(user) => {
                let roles = self.roles_for(user.id).await?;
                Ok(Some(user.with_roles(roles)))
            }
            None => Ok(None),
        }
    }

    #[instrument(skip(self, request), err)]
    async fn update(&mut self, id: Self::Id, request: &Self::UpdateRequest) -> Result<Self::Response> {
        let mut tx = self.db.begin().await?;

        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users SET
                display_name = COALESCE($2, display_name),
                is_active = COALESCE($3, is_active),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(&request.display_name)
        .bind(request.is_active)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(DbError::NotFound)?;

        if let Some(roles) = &request.roles {
            Self::replace_roles(&mut tx, id, roles).await?;
        }
        tx.commit().await?;

        let roles = self.roles_for(id).await?;
        Ok(user.with_roles(roles))
    }

    /// Users own ledger history, so they are deactivated rather than removed
    async fn delete(&mut self, id: Self::Id) -> Result<bool> {
        let result = sqlx::query("UPDATE users SET is_active = false, updated_at = NOW() WHERE id = $1 AND is_active")
            .bind(id)
            .execute(&mut *self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list(&mut self, filter: &Self::Filter) -> Result<Vec<Self::Response>> {
        let users = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY created_at DESC, id OFFSET $1 LIMIT $2"
        ))
        .bind(filter.skip)
        .bind(filter.limit)
        .fetch_all(&mut *self.db)
        .await?;

        let ids: Vec<UserId> = users.iter().map(|u| u.id).collect();
        let mut roles = self.roles_for_bulk(&ids).await?;

        Ok(users
            .into_iter()
            .map(|user| {
                let user_roles = roles.remove(&user.id).unwrap_or_default();
                user.with_roles(user_roles)
            })
            .collect())
    }
}
