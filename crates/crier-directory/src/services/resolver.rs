use std::sync::Arc;

use crier_database::DbConnection;
use crier_entities::{
    device_tokens, guardian_links, staff_profiles, student_profiles, user_roles, users, Audience,
    TargetFilters, UserRole,
};
use sea_orm::sea_query::{Query, SelectStatement};
use sea_orm::{
    ColumnTrait, Condition, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect,
};
use tracing::debug;

use super::types::{AudienceDescriptor, ChannelReach, DirectoryError, ReachEstimate};

/// Page size used when callers do not bring their own batching.
pub const DEFAULT_PAGE_SIZE: u64 = 500;

/// Turns an [`AudienceDescriptor`] into id-ordered, deduplicated pages of
/// active users.
///
/// Everything is expressed as one SQL query over `users` with `IN (subquery)`
/// conditions, so pages stay consistent with keyset pagination and never
/// contain duplicates.
pub struct AudienceResolver {
    db: Arc<DbConnection>,
}

impl AudienceResolver {
    pub fn new(db: Arc<DbConnection>) -> Self {
        Self { db }
    }

    /// Fetch one page after the given id cursor.
    pub async fn resolve_page(
        &self,
        descriptor: &AudienceDescriptor,
        after_id: Option<i32>,
        limit: u64,
    ) -> Result<Vec<users::Model>, DirectoryError> {
        let mut query = users::Entity::find().filter(base_condition(descriptor)?);
        if let Some(after) = after_id {
            query = query.filter(users::Column::Id.gt(after));
        }
        let page = query
            .order_by_asc(users::Column::Id)
            .limit(limit)
            .all(self.db.as_ref())
            .await?;
        debug!(
            audience = %descriptor.audience,
            after_id,
            page_len = page.len(),
            "Resolved audience page"
        );
        Ok(page)
    }

    /// Drain all pages. Dispatch paths page themselves; this is for small
    /// audiences and previews.
    pub async fn resolve_all(
        &self,
        descriptor: &AudienceDescriptor,
    ) -> Result<Vec<users::Model>, DirectoryError> {
        let mut out = Vec::new();
        let mut after_id = None;
        loop {
            let page = self
                .resolve_page(descriptor, after_id, DEFAULT_PAGE_SIZE)
                .await?;
            let full_page = page.len() as u64 == DEFAULT_PAGE_SIZE;
            if let Some(last) = page.last() {
                after_id = Some(last.id);
            }
            out.extend(page);
            if !full_page {
                break;
            }
        }
        Ok(out)
    }

    pub async fn count(&self, descriptor: &AudienceDescriptor) -> Result<u64, DirectoryError> {
        Ok(users::Entity::find()
            .filter(base_condition(descriptor)?)
            .count(self.db.as_ref())
            .await?)
    }

    /// Count resolution plus per-channel contact coverage for the preview
    /// endpoint. In-app reaches every resolved user.
    pub async fn estimate_reach(
        &self,
        descriptor: &AudienceDescriptor,
    ) -> Result<ReachEstimate, DirectoryError> {
        let condition = base_condition(descriptor)?;
        let db = self.db.as_ref();

        let total = users::Entity::find()
            .filter(condition.clone())
            .count(db)
            .await?;
        let email = users::Entity::find()
            .filter(condition.clone())
            .filter(users::Column::Email.is_not_null())
            .count(db)
            .await?;
        let sms = users::Entity::find()
            .filter(condition.clone())
            .filter(users::Column::Phone.is_not_null())
            .count(db)
            .await?;
        let push = users::Entity::find()
            .filter(condition)
            .filter(
                users::Column::Id.in_subquery(
                    Query::select()
                        .column(device_tokens::Column::UserId)
                        .from(device_tokens::Entity)
                        .and_where(device_tokens::Column::IsActive.eq(true))
                        .to_owned(),
                ),
            )
            .count(db)
            .await?;

        Ok(ReachEstimate {
            total,
            reachable_by_channel: ChannelReach {
                email,
                sms,
                push,
                in_app: total,
            },
        })
    }
}

fn audience_role(audience: Audience) -> Option<UserRole> {
    match audience {
        Audience::All | Audience::Custom => None,
        Audience::Students => Some(UserRole::Student),
        Audience::Teachers => Some(UserRole::Teacher),
        Audience::Parents => Some(UserRole::Parent),
        Audience::Staff => Some(UserRole::Staff),
    }
}

fn base_condition(descriptor: &AudienceDescriptor) -> Result<Condition, DirectoryError> {
    descriptor.validate()?;

    let mut condition = Condition::all()
        .add(users::Column::IsActive.eq(true))
        .add(users::Column::DeletedAt.is_null());

    if let Some(role) = audience_role(descriptor.audience) {
        condition = condition.add(
            users::Column::Id.in_subquery(
                Query::select()
                    .column(user_roles::Column::UserId)
                    .from(user_roles::Entity)
                    .and_where(user_roles::Column::Role.eq(role))
                    .to_owned(),
            ),
        );
    }

    if descriptor.has_user_ids() {
        if let Some(ids) = &descriptor.user_ids {
            condition = condition.add(users::Column::Id.is_in(ids.0.iter().copied()));
        }
    }

    if let Some(filters) = descriptor.filters.as_ref().filter(|f| !f.is_empty()) {
        if has_student_filters(filters) {
            let student_sub = student_profile_subquery(filters);
            let direct = users::Column::Id.in_subquery(student_sub.clone());
            let via_guardian = users::Column::Id.in_subquery(
                Query::select()
                    .column(guardian_links::Column::GuardianUserId)
                    .from(guardian_links::Entity)
                    .and_where(
                        guardian_links::Column::StudentUserId.in_subquery(student_sub),
                    )
                    .to_owned(),
            );
            // Students match on their own profile, parents through their
            // linked students; mixed audiences accept either path.
            condition = condition.add(match descriptor.audience {
                Audience::Students => Condition::all().add(direct),
                Audience::Parents => Condition::all().add(via_guardian),
                _ => Condition::any().add(direct).add(via_guardian),
            });
        }

        if let Some(departments) = filters.departments.as_ref().filter(|d| !d.is_empty()) {
            condition = condition.add(
                users::Column::Id.in_subquery(
                    Query::select()
                        .column(staff_profiles::Column::UserId)
                        .from(staff_profiles::Entity)
                        .and_where(
                            staff_profiles::Column::Department
                                .is_in(departments.iter().cloned()),
                        )
                        .to_owned(),
                ),
            );
        }
    }

    Ok(condition)
}

fn has_student_filters(filters: &TargetFilters) -> bool {
    fn present<T>(v: &Option<Vec<T>>) -> bool {
        v.as_ref().map(|v| !v.is_empty()).unwrap_or(false)
    }
    present(&filters.sections) || present(&filters.grades) || present(&filters.classes)
}

fn student_profile_subquery(filters: &TargetFilters) -> SelectStatement {
    let mut query = Query::select();
    query
        .column(student_profiles::Column::UserId)
        .from(student_profiles::Entity);

    if let Some(grades) = filters.grades.as_ref().filter(|g| !g.is_empty()) {
        query.and_where(student_profiles::Column::Grade.is_in(grades.iter().copied()));
    }
    if let Some(sections) = filters.sections.as_ref().filter(|s| !s.is_empty()) {
        query.and_where(student_profiles::Column::Section.is_in(sections.iter().cloned()));
    }
    if let Some(classes) = filters.classes.as_ref().filter(|c| !c.is_empty()) {
        query.and_where(student_profiles::Column::ClassName.is_in(classes.iter().cloned()));
    }

    query.to_owned()
}
