use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};
use tracing::{error, info, instrument};

use crate::{
    db::{DbPool, LOOKUP_CHUNK_IDS},
    entities::user::{self, Entity as User},
    errors::ServiceError,
};

/// Read access to requesters; the shop never edits accounts.
#[derive(Clone)]
pub struct UserService {
    db_pool: Arc<DbPool>,
}

impl UserService {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    /// Resolves a requester or fails with `NotFound`.
    #[instrument(skip(self))]
    pub async fn get_user(&self, user_id: i32) -> Result<user::Model, ServiceError> {
        let db = &*self.db_pool;
        User::find_by_id(user_id)
            .one(db)
            .await
            .map_err(|e| {
                error!(user_id, error = %e, "Database error when fetching user");
                ServiceError::db_error(e)
            })?
            .ok_or_else(|| ServiceError::NotFound(format!("User with ID {} not found", user_id)))
    }

    /// Returns the subset of `ids` that exist.
    pub async fn existing_ids(&self, ids: &HashSet<i32>) -> Result<HashSet<i32>, ServiceError> {
        if ids.is_empty() {
            return Ok(HashSet::new());
        }
        let db = &*self.db_pool;
        let ids: Vec<i32> = ids.iter().copied().collect();
        let mut known = HashSet::with_capacity(ids.len());
        for chunk in ids.chunks(LOOKUP_CHUNK_IDS) {
            let found = User::find()
                .filter(user::Column::Id.is_in(chunk.iter().copied()))
                .all(db)
                .await
                .map_err(|e| {
                    error!(error = %e, "Failed to resolve users");
                    ServiceError::db_error(e)
                })?;
            known.extend(found.into_iter().map(|u| u.id));
        }
        Ok(known)
    }

    /// Looks a user up by username, creating a bare account on first use.
    #[instrument(skip(self))]
    pub async fn get_or_create(&self, username: &str) -> Result<user::Model, ServiceError> {
        let db = &*self.db_pool;
        if let Some(existing) = User::find()
            .filter(user::Column::Username.eq(username))
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
        {
            return Ok(existing);
        }

        let created = user::ActiveModel {
            username: Set(username.to_string()),
            email: Set(String::new()),
            first_name: Set(String::new()),
            last_name: Set(String::new()),
            date_joined: Set(Utc::now()),
            ..Default::default()
        }
        .insert(db)
        .await
        .map_err(|e| {
            error!(username, error = %e, "Failed to create user");
            ServiceError::db_error(e)
        })?;

        info!(user_id = created.id, username, "User created");
        Ok(created)
    }
}
