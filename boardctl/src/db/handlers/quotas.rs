//! Quota policy resolution and the daily usage ledger.
//!
//! Two concerns live here. Policy resolution answers "how many units of this
//! action does this user get per day" from a three-tier hierarchy: per-user
//! override, then the deployment defaults row, then built-in constants.
//! The ledger answers "is one more unit available today" with [`Quotas::reserve`],
//! which must stay correct when multiple request handlers race on the same
//! (user, day, kind) counter.
//!
//! The reservation never decides based on a read: the decisive operation is
//! always a conditional `UPDATE ... WHERE used_count < limit` or an insert
//! guarded by the counter table's primary key. A limit of 0 means unlimited
//! and bypasses the ledger entirely.

use crate::db::{
    errors::{DbError, Result},
    models::quotas::{
        DailyQuotaUsageDBResponse, QuotaDefaultsDBResponse, QuotaDefaultsUpdateDBRequest,
        QuotaKind, QuotaOverrideDBResponse,
    },
};
use crate::types::{abbrev_uuid, UserId};
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::SqliteConnection;
use tracing::instrument;

pub struct Quotas<'c> {
    db: &'c mut SqliteConnection,
}

impl<'c> Quotas<'c> {
    pub fn new(db: &'c mut SqliteConnection) -> Self {
        Self { db }
    }

    /// Resolve the effective daily limit for a user and kind.
    ///
    /// A non-null per-user override wins, clamped to >= 0 (so a negative
    /// override reads as 0, i.e. unlimited). Otherwise the deployment
    /// defaults row decides; if that row cannot be read or created, the
    /// built-in constant for the kind is used. Always returns a usable
    /// number for any user that exists.
    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id), kind = %kind), err)]
    pub async fn effective_limit(&mut self, user_id: UserId, kind: QuotaKind) -> Result<i64> {
        let override_limit: Option<Option<i64>> = sqlx::query_scalar(
            "SELECT daily_limit FROM user_quota_overrides WHERE user_id = ? AND quota_kind = ?",
        )
        .bind(user_id)
        .bind(kind)
        .fetch_optional(&mut *self.db)
        .await?;

        if let Some(Some(limit)) = override_limit {
            return Ok(limit.max(0));
        }

        match self.get_or_init_defaults().await {
            Ok(defaults) => Ok(kind.limit_in(&defaults)),
            Err(e) => {
                tracing::warn!("Quota defaults unavailable, using built-in limits: {}", e);
                Ok(kind.fallback_limit())
            }
        }
    }

    /// Read the deployment defaults row, creating it from the built-in
    /// constants if this deployment has never had one.
    pub async fn get_or_init_defaults(&mut self) -> Result<QuotaDefaultsDBResponse> {
        sqlx::query(
            r#"
            INSERT INTO quota_defaults (id, card_creation_limit, evaluation_limit, report_analysis_limit, updated_at)
            VALUES (1, ?, ?, ?, ?)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(QuotaKind::CardCreation.fallback_limit())
        .bind(QuotaKind::Evaluation.fallback_limit())
        .bind(QuotaKind::ReportAnalysis.fallback_limit())
        .bind(Utc::now())
        .execute(&mut *self.db)
        .await?;

        let defaults =
            sqlx::query_as::<_, QuotaDefaultsDBResponse>("SELECT * FROM quota_defaults WHERE id = 1")
                .fetch_one(&mut *self.db)
                .await?;

        Ok(defaults)
    }

    #[instrument(skip(self, request), err)]
    pub async fn update_defaults(
        &mut self,
        request: &QuotaDefaultsUpdateDBRequest,
    ) -> Result<QuotaDefaultsDBResponse> {
        let defaults = sqlx::query_as::<_, QuotaDefaultsDBResponse>(
            r#"
            INSERT INTO quota_defaults (id, card_creation_limit, evaluation_limit, report_analysis_limit, updated_at)
            VALUES (1, ?, ?, ?, ?)
            ON CONFLICT (id) DO UPDATE SET
                card_creation_limit = excluded.card_creation_limit,
                evaluation_limit = excluded.evaluation_limit,
                report_analysis_limit = excluded.report_analysis_limit,
                updated_at = excluded.updated_at
            RETURNING *
            "#,
        )
        .bind(request.card_creation_limit)
        .bind(request.evaluation_limit)
        .bind(request.report_analysis_limit)
        .bind(Utc::now())
        .fetch_one(&mut *self.db)
        .await?;

        Ok(defaults)
    }

    pub async fn list_overrides(&mut self, user_id: UserId) -> Result<Vec<QuotaOverrideDBResponse>> {
        let overrides = sqlx::query_as::<_, QuotaOverrideDBResponse>(
            "SELECT * FROM user_quota_overrides WHERE user_id = ? ORDER BY quota_kind",
        )
        .bind(user_id)
        .fetch_all(&mut *self.db)
        .await?;

        Ok(overrides)
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id), kind = %kind), err)]
    pub async fn set_override(
        &mut self,
        user_id: UserId,
        kind: QuotaKind,
        daily_limit: i64,
    ) -> Result<QuotaOverrideDBResponse> {
        let now = Utc::now();
        let row = sqlx::query_as::<_, QuotaOverrideDBResponse>(
            r#"
            INSERT INTO user_quota_overrides (user_id, quota_kind, daily_limit, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (user_id, quota_kind) DO UPDATE SET
                daily_limit = excluded.daily_limit,
                updated_at = excluded.updated_at
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(kind)
        .bind(daily_limit)
        .bind(now)
        .bind(now)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(row)
    }

    /// Remove an override so the user inherits the deployment default again.
    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id), kind = %kind), err)]
    pub async fn clear_override(&mut self, user_id: UserId, kind: QuotaKind) -> Result<bool> {
        let result =
            sqlx::query("DELETE FROM user_quota_overrides WHERE user_id = ? AND quota_kind = ?")
                .bind(user_id)
                .bind(kind)
                .execute(&mut *self.db)
                .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Consume one unit of daily quota if any is left.
    ///
    /// Returns `true` when the unit was granted and `false` when the counter
    /// already sits at the limit. Grants are never rolled back: a caller that
    /// reserves and then fails downstream has used its unit for the day.
    ///
    /// The sequence is conditional increment, keyed insert of a fresh counter,
    /// then one increment retry for the case where a concurrent insert won the
    /// key. If none of those land, the counter is re-read purely to classify
    /// the outcome: at or over the limit means an ordinary denial, anything
    /// else means the ledger misbehaved and the reservation fails closed.
    #[instrument(
        skip(self),
        fields(user_id = %abbrev_uuid(&user_id), date = %quota_date, kind = %kind, limit),
        err
    )]
    pub async fn reserve(
        &mut self,
        user_id: UserId,
        quota_date: NaiveDate,
        kind: QuotaKind,
        limit: i64,
    ) -> Result<bool> {
        if limit == 0 {
            return Ok(true);
        }

        let now = Utc::now();

        if self.try_increment(user_id, quota_date, kind, limit, now).await? {
            return Ok(true);
        }

        // No row matched: either the counter does not exist yet, or it is full.
        let inserted = sqlx::query(
            r#"
            INSERT INTO daily_quota_usage (user_id, quota_date, quota_kind, used_count, created_at, updated_at)
            VALUES (?, ?, ?, 1, ?, ?)
            ON CONFLICT (user_id, quota_date, quota_kind) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(quota_date)
        .bind(kind)
        .bind(now)
        .bind(now)
        .execute(&mut *self.db)
        .await?;

        if inserted.rows_affected() == 1 {
            return Ok(true);
        }

        // Lost the insert race to a concurrent caller; their row is visible now.
        if self.try_increment(user_id, quota_date, kind, limit, now).await? {
            return Ok(true);
        }

        let used: Option<i64> = sqlx::query_scalar(
            "SELECT used_count FROM daily_quota_usage WHERE user_id = ? AND quota_date = ? AND quota_kind = ?",
        )
        .bind(user_id)
        .bind(quota_date)
        .bind(kind)
        .fetch_optional(&mut *self.db)
        .await?;

        match used {
            Some(count) if count >= limit => Ok(false),
            _ => Err(DbError::Other(anyhow::anyhow!(
                "quota counter for user {} on {} ({}) is in an inconsistent state after a failed increment",
                user_id,
                quota_date,
                kind
            ))),
        }
    }

    async fn try_increment(
        &mut self,
        user_id: UserId,
        quota_date: NaiveDate,
        kind: QuotaKind,
        limit: i64,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE daily_quota_usage
            SET used_count = used_count + 1, updated_at = ?
            WHERE user_id = ? AND quota_date = ? AND quota_kind = ? AND used_count < ?
            "#,
        )
        .bind(now)
        .bind(user_id)
        .bind(quota_date)
        .bind(kind)
        .bind(limit)
        .execute(&mut *self.db)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Units already consumed by a user for one kind on one day.
    pub async fn used_on(
        &mut self,
        user_id: UserId,
        quota_date: NaiveDate,
        kind: QuotaKind,
    ) -> Result<i64> {
        let used: Option<i64> = sqlx::query_scalar(
            "SELECT used_count FROM daily_quota_usage WHERE user_id = ? AND quota_date = ? AND quota_kind = ?",
        )
        .bind(user_id)
        .bind(quota_date)
        .bind(kind)
        .fetch_optional(&mut *self.db)
        .await?;

        Ok(used.unwrap_or(0))
    }

    pub async fn usage_for_day(
        &mut self,
        user_id: UserId,
        quota_date: NaiveDate,
    ) -> Result<Vec<DailyQuotaUsageDBResponse>> {
        let rows = sqlx::query_as::<_, DailyQuotaUsageDBResponse>(
            "SELECT * FROM daily_quota_usage WHERE user_id = ? AND quota_date = ? ORDER BY quota_kind",
        )
        .bind(user_id)
        .bind(quota_date)
        .fetch_all(&mut *self.db)
        .await?;

        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::handlers::{Repository, Users};
    use crate::db::models::users::UserCreateDBRequest;
    use sqlx::SqlitePool;

    async fn create_test_user(pool: &SqlitePool) -> UserId {
        let mut conn = pool.acquire().await.unwrap();
        let mut users = Users::new(&mut conn);
        let user = users
            .create(&UserCreateDBRequest {
                username: format!("quota-{}", uuid::Uuid::new_v4()),
                email: format!("{}@example.com", uuid::Uuid::new_v4()),
                display_name: None,
                is_admin: false,
                auth_source: "proxy-header".to_string(),
            })
            .await
            .unwrap();
        user.id
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 1).unwrap()
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_reserve_grants_up_to_limit_then_denies(pool: SqlitePool) {
        let user_id = create_test_user(&pool).await;
        let mut conn = pool.acquire().await.unwrap();
        let mut quotas = Quotas::new(&mut conn);

        for i in 0..3 {
            let granted = quotas
                .reserve(user_id, day(), QuotaKind::ReportAnalysis, 3)
                .await
                .unwrap();
            assert!(granted, "reservation {} should be granted", i + 1);
        }

        let denied = quotas
            .reserve(user_id, day(), QuotaKind::ReportAnalysis, 3)
            .await
            .unwrap();
        assert!(!denied);

        assert_eq!(
            quotas.used_on(user_id, day(), QuotaKind::ReportAnalysis).await.unwrap(),
            3
        );
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_reserve_next_day_starts_fresh(pool: SqlitePool) {
        let user_id = create_test_user(&pool).await;
        let mut conn = pool.acquire().await.unwrap();
        let mut quotas = Quotas::new(&mut conn);

        assert!(quotas.reserve(user_id, day(), QuotaKind::Evaluation, 1).await.unwrap());
        assert!(!quotas.reserve(user_id, day(), QuotaKind::Evaluation, 1).await.unwrap());

        let next_day = day().succ_opt().unwrap();
        assert!(quotas.reserve(user_id, next_day, QuotaKind::Evaluation, 1).await.unwrap());
        assert_eq!(quotas.used_on(user_id, next_day, QuotaKind::Evaluation).await.unwrap(), 1);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_reserve_kinds_count_independently(pool: SqlitePool) {
        let user_id = create_test_user(&pool).await;
        let mut conn = pool.acquire().await.unwrap();
        let mut quotas = Quotas::new(&mut conn);

        assert!(quotas.reserve(user_id, day(), QuotaKind::CardCreation, 1).await.unwrap());
        assert!(!quotas.reserve(user_id, day(), QuotaKind::CardCreation, 1).await.unwrap());

        // A different kind still has its full budget
        assert!(quotas.reserve(user_id, day(), QuotaKind::ReportAnalysis, 1).await.unwrap());
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_unlimited_never_touches_the_ledger(pool: SqlitePool) {
        let user_id = create_test_user(&pool).await;
        let mut conn = pool.acquire().await.unwrap();
        let mut quotas = Quotas::new(&mut conn);

        for _ in 0..10 {
            assert!(quotas.reserve(user_id, day(), QuotaKind::CardCreation, 0).await.unwrap());
        }

        let rows = quotas.usage_for_day(user_id, day()).await.unwrap();
        assert!(rows.is_empty());
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_reserve_is_monotonic_under_concurrency(pool: SqlitePool) {
        let user_id = create_test_user(&pool).await;
        let limit = 5i64;

        let mut handles = Vec::new();
        for _ in 0..12 {
            let pool = pool.clone();
            handles.push(tokio::spawn(async move {
                let mut conn = pool.acquire().await.unwrap();
                let mut quotas = Quotas::new(&mut conn);
                quotas
                    .reserve(user_id, day(), QuotaKind::ReportAnalysis, limit)
                    .await
                    .unwrap()
            }));
        }

        let mut granted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                granted += 1;
            }
        }

        assert_eq!(granted, limit);

        let mut conn = pool.acquire().await.unwrap();
        let mut quotas = Quotas::new(&mut conn);
        assert_eq!(
            quotas.used_on(user_id, day(), QuotaKind::ReportAnalysis).await.unwrap(),
            limit
        );
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_effective_limit_resolution_order(pool: SqlitePool) {
        let user_id = create_test_user(&pool).await;
        let mut conn = pool.acquire().await.unwrap();
        let mut quotas = Quotas::new(&mut conn);

        // No defaults row, no override: built-in constants apply (and the
        // defaults row is created as a side effect)
        let limit = quotas
            .effective_limit(user_id, QuotaKind::ReportAnalysis)
            .await
            .unwrap();
        assert_eq!(limit, QuotaKind::ReportAnalysis.fallback_limit());

        let defaults = quotas.get_or_init_defaults().await.unwrap();
        assert_eq!(defaults.report_analysis_limit, QuotaKind::ReportAnalysis.fallback_limit());

        // Deployment default beats the constant
        quotas
            .update_defaults(&QuotaDefaultsUpdateDBRequest {
                card_creation_limit: 50,
                evaluation_limit: 20,
                report_analysis_limit: 10,
            })
            .await
            .unwrap();

        // Override beats the default
        quotas.set_override(user_id, QuotaKind::ReportAnalysis, 5).await.unwrap();
        assert_eq!(
            quotas.effective_limit(user_id, QuotaKind::ReportAnalysis).await.unwrap(),
            5
        );

        // Clearing the override falls back to the default
        assert!(quotas.clear_override(user_id, QuotaKind::ReportAnalysis).await.unwrap());
        assert_eq!(
            quotas.effective_limit(user_id, QuotaKind::ReportAnalysis).await.unwrap(),
            10
        );
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_negative_override_reads_as_unlimited(pool: SqlitePool) {
        let user_id = create_test_user(&pool).await;
        let mut conn = pool.acquire().await.unwrap();
        let mut quotas = Quotas::new(&mut conn);

        quotas.set_override(user_id, QuotaKind::Evaluation, -3).await.unwrap();
        assert_eq!(
            quotas.effective_limit(user_id, QuotaKind::Evaluation).await.unwrap(),
            0
        );
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_override_only_affects_its_kind(pool: SqlitePool) {
        let user_id = create_test_user(&pool).await;
        let mut conn = pool.acquire().await.unwrap();
        let mut quotas = Quotas::new(&mut conn);

        quotas.set_override(user_id, QuotaKind::CardCreation, 2).await.unwrap();

        assert_eq!(
            quotas.effective_limit(user_id, QuotaKind::CardCreation).await.unwrap(),
            2
        );
        assert_eq!(
            quotas.effective_limit(user_id, QuotaKind::ReportAnalysis).await.unwrap(),
            QuotaKind::ReportAnalysis.fallback_limit()
        );

        let overrides = quotas.list_overrides(user_id).await.unwrap();
        assert_eq!(overrides.len(), 1);
        assert_eq!(overrides[0].quota_kind, QuotaKind::CardCreation);
        assert_eq!(overrides[0].daily_limit, Some(2));
    }
}
