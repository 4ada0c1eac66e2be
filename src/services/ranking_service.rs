use std::collections::hash_map::Entry;
use std::collections::HashMap;

use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::dto::attempt_dto::{LeaderboardEntry, LeaderboardPage};
use crate::error::Result;

const MAX_PAGE_SIZE: i64 = 100;

#[derive(Debug, Clone, FromRow)]
pub struct SubmittedAttemptRow {
    pub user_id: Uuid,
    pub attempt_number: i32,
    pub obtained_marks: Decimal,
    pub percentage: i32,
    pub time_taken_seconds: i32,
}

#[derive(Clone)]
pub struct RankingService {
    pool: PgPool,
}

impl RankingService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Rank and percentile against the submitted attempts that exist at this
    /// moment. Computed once when an attempt is scored and frozen on it;
    /// later submissions do not rewrite history.
    pub async fn compute_rank(
        &self,
        test_id: Uuid,
        obtained_marks: Decimal,
    ) -> Result<(i32, i32)> {
        let snapshot: Vec<Decimal> = sqlx::query_scalar(
            "SELECT obtained_marks FROM attempts WHERE test_id = $1 AND status = 'submitted'",
        )
        .bind(test_id)
        .fetch_all(&self.pool)
        .await?;

        let rank = rank_against(&snapshot, obtained_marks);
        Ok((rank, percentile_for(snapshot.len() as i64, rank)))
    }

    /// Best-attempt-per-user leaderboard, paginated. Display positions are
    /// page-relative and independent of the frozen per-attempt rank.
    pub async fn leaderboard(
        &self,
        test_id: Uuid,
        page: i64,
        page_size: i64,
    ) -> Result<LeaderboardPage> {
        let page = page.max(1);
        let page_size = page_size.clamp(1, MAX_PAGE_SIZE);

        let rows: Vec<SubmittedAttemptRow> = sqlx::query_as(
            r#"
            SELECT user_id, attempt_number, obtained_marks, percentage, time_taken_seconds
            FROM attempts
            WHERE test_id = $1 AND status = 'submitted'
            "#,
        )
        .bind(test_id)
        .fetch_all(&self.pool)
        .await?;

        let best = best_attempt_per_user(rows);
        let total_participants = best.len() as i64;
        let offset = (page - 1) * page_size;

        let entries = best
            .into_iter()
            .skip(offset as usize)
            .take(page_size as usize)
            .enumerate()
            .map(|(index, row)| LeaderboardEntry {
                position: offset + index as i64 + 1,
                user_id: row.user_id,
                attempt_number: row.attempt_number,
                obtained_marks: row.obtained_marks,
                percentage: row.percentage,
                time_taken_seconds: row.time_taken_seconds,
            })
            .collect();

        Ok(LeaderboardPage {
            entries,
            total_participants,
            page,
            page_size,
        })
    }
}

/// 1 + the number of snapshot entries with strictly greater marks.
pub fn rank_against(snapshot: &[Decimal], obtained_marks: Decimal) -> i32 {
    1 + snapshot.iter().filter(|m| **m > obtained_marks).count() as i32
}

pub fn percentile_for(total_submitted: i64, rank: i32) -> i32 {
    if total_submitted == 0 {
        return 100;
    }
    (((total_submitted - rank as i64) as f64 / total_submitted as f64) * 100.0).round() as i32
}

/// Reduces submitted attempts to one best attempt per user (highest marks,
/// ties to the faster time) and sorts for display.
pub fn best_attempt_per_user(rows: Vec<SubmittedAttemptRow>) -> Vec<SubmittedAttemptRow> {
    let mut best: HashMap<Uuid, SubmittedAttemptRow> = HashMap::new();
    for row in rows {
        match best.entry(row.user_id) {
            Entry::Occupied(mut slot) => {
                let current = slot.get();
                let better = row.obtained_marks > current.obtained_marks
                    || (row.obtained_marks == current.obtained_marks
                        && row.time_taken_seconds < current.time_taken_seconds);
                if better {
                    slot.insert(row);
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(row);
            }
        }
    }

    let mut ordered: Vec<SubmittedAttemptRow> = best.into_values().collect();
    ordered.sort_by(|a, b| {
        b.obtained_marks
            .cmp(&a.obtained_marks)
            .then_with(|| a.time_taken_seconds.cmp(&b.time_taken_seconds))
            .then_with(|| a.user_id.cmp(&b.user_id))
    });
    ordered
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(user: Uuid, attempt: i32, marks: i64, time: i32) -> SubmittedAttemptRow {
        SubmittedAttemptRow {
            user_id: user,
            attempt_number: attempt,
            obtained_marks: Decimal::new(marks, 0),
            percentage: 0,
            time_taken_seconds: time,
        }
    }

    #[test]
    fn rank_counts_strictly_greater_marks() {
        let snapshot = vec![
            Decimal::new(90, 0),
            Decimal::new(80, 0),
            Decimal::new(80, 0),
            Decimal::new(70, 0),
        ];
        assert_eq!(rank_against(&snapshot, Decimal::new(95, 0)), 1);
        assert_eq!(rank_against(&snapshot, Decimal::new(80, 0)), 2);
        assert_eq!(rank_against(&snapshot, Decimal::new(60, 0)), 5);
    }

    #[test]
    fn rank_is_monotonic_in_marks() {
        let snapshot = vec![
            Decimal::new(50, 0),
            Decimal::new(60, 0),
            Decimal::new(70, 0),
        ];
        let rank_high = rank_against(&snapshot, Decimal::new(65, 0));
        let rank_low = rank_against(&snapshot, Decimal::new(55, 0));
        assert!(rank_high < rank_low);
    }

    #[test]
    fn percentile_guards_empty_snapshot() {
        assert_eq!(percentile_for(0, 1), 100);
        assert_eq!(percentile_for(1, 1), 0);
        assert_eq!(percentile_for(10, 1), 90);
        assert_eq!(percentile_for(10, 10), 0);
        assert_eq!(percentile_for(3, 2), 33);
    }

    #[test]
    fn best_attempt_keeps_highest_marks_then_fastest() {
        let user = Uuid::new_v4();
        let rows = vec![
            row(user, 1, 70, 100),
            row(user, 2, 90, 400),
            row(user, 3, 90, 250),
            row(user, 4, 50, 10),
        ];

        let best = best_attempt_per_user(rows);
        assert_eq!(best.len(), 1);
        assert_eq!(best[0].attempt_number, 3);
        assert_eq!(best[0].obtained_marks, Decimal::new(90, 0));
        assert_eq!(best[0].time_taken_seconds, 250);
    }

    #[test]
    fn tie_on_marks_ranks_faster_user_first() {
        // A: 90 marks in 300s, B: 90 marks in 200s. B places above A.
        let user_a = Uuid::new_v4();
        let user_b = Uuid::new_v4();
        let ordered = best_attempt_per_user(vec![
            row(user_a, 1, 90, 300),
            row(user_b, 1, 90, 200),
        ]);

        assert_eq!(ordered[0].user_id, user_b);
        assert_eq!(ordered[1].user_id, user_a);
    }

    #[test]
    fn ordering_is_descending_marks_then_ascending_time() {
        let rows = vec![
            row(Uuid::new_v4(), 1, 40, 50),
            row(Uuid::new_v4(), 1, 100, 900),
            row(Uuid::new_v4(), 1, 70, 10),
        ];
        let ordered = best_attempt_per_user(rows);
        let marks: Vec<i64> = ordered
            .iter()
            .map(|r| r.obtained_marks.mantissa() as i64)
            .collect();
        assert_eq!(marks, vec![100, 70, 40]);
    }
}
