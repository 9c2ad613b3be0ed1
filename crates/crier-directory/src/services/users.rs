use std::sync::Arc;

use crier_database::DbConnection;
use crier_entities::users;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, QueryOrder};

use super::types::DirectoryError;

/// Read access to the user directory. User records are written by the
/// surrounding school system; Crier only consumes them.
pub struct UserService {
    db: Arc<DbConnection>,
}

impl UserService {
    pub fn new(db: Arc<DbConnection>) -> Self {
        Self { db }
    }

    pub async fn find_user(&self, id: i32) -> Result<Option<users::Model>, DirectoryError> {
        Ok(users::Entity::find_by_id(id).one(self.db.as_ref()).await?)
    }

    pub async fn get_user(&self, id: i32) -> Result<users::Model, DirectoryError> {
        self.find_user(id)
            .await?
            .ok_or(DirectoryError::UserNotFound { id })
    }

    /// Fetch several users at once, id-ordered. Unknown ids are skipped.
    pub async fn find_by_ids(&self, ids: &[i32]) -> Result<Vec<users::Model>, DirectoryError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        Ok(users::Entity::find()
            .filter(users::Column::Id.is_in(ids.iter().copied()))
            .order_by_asc(users::Column::Id)
            .all(self.db.as_ref())
            .await?)
    }

    /// Active, non-deleted users only; the variant the dispatch paths use
    /// when a campaign carries an explicit id list.
    pub async fn find_active_by_ids(
        &self,
        ids: &[i32],
    ) -> Result<Vec<users::Model>, DirectoryError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        Ok(users::Entity::find()
            .filter(users::Column::Id.is_in(ids.iter().copied()))
            .filter(users::Column::IsActive.eq(true))
            .filter(users::Column::DeletedAt.is_null())
            .order_by_asc(users::Column::Id)
            .all(self.db.as_ref())
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crier_database::test_utils::TestDatabase;
    use crier_entities::users;
    use sea_orm::{ActiveModelTrait, Set};

    async fn seed_user(
        db: &DbConnection,
        first: &str,
        email: Option<&str>,
        active: bool,
    ) -> users::Model {
        users::ActiveModel {
            first_name: Set(first.to_string()),
            last_name: Set("Tester".to_string()),
            email: Set(email.map(|e| e.to_string())),
            phone: Set(None),
            locale: Set("en".to_string()),
            is_active: Set(active),
            deleted_at: Set(None),
            ..Default::default()
        }
        .insert(db)
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn get_user_distinguishes_missing_ids() {
        let test_db = TestDatabase::with_migrations().await.unwrap();
        let service = UserService::new(test_db.connection_arc());

        let user = seed_user(test_db.connection(), "Asha", Some("asha@school.example"), true).await;

        let found = service.get_user(user.id).await.unwrap();
        assert_eq!(found.full_name(), "Asha Tester");

        let err = service.get_user(user.id + 1000).await.unwrap_err();
        assert!(matches!(err, DirectoryError::UserNotFound { .. }));
    }

    #[tokio::test]
    async fn find_active_by_ids_skips_deactivated_users() {
        let test_db = TestDatabase::with_migrations().await.unwrap();
        let service = UserService::new(test_db.connection_arc());
        let db = test_db.connection();

        let active = seed_user(db, "Active", None, true).await;
        let inactive = seed_user(db, "Inactive", None, false).await;

        let all = service.find_by_ids(&[inactive.id, active.id]).await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.windows(2).all(|w| w[0].id < w[1].id));

        let only_active = service
            .find_active_by_ids(&[inactive.id, active.id])
            .await
            .unwrap();
        assert_eq!(only_active.len(), 1);
        assert_eq!(only_active[0].id, active.id);
    }
}
