use std::collections::BTreeSet;

use chrono::{Duration, NaiveDate};
use chrono_tz::Tz;

use crate::models::{ActivityItem, ActivityType, CourseProgress, DashboardSummary, Learner};
use crate::utils::time::local_date;

pub fn compute_summary(
    learner: &Learner,
    courses: &[CourseProgress],
    activity: &[ActivityItem],
    tz: Tz,
) -> DashboardSummary {
    let total_courses = courses.len() as u32;
    let completed_courses = courses.iter().filter(|c| c.progress.is_completed()).count() as u32;
    let in_progress_courses = courses.iter().filter(|c| c.progress.is_in_progress()).count() as u32;

    let learning_minutes: f64 = courses
        .iter()
        .map(|c| {
            c.product.duration_minutes as f64 * c.progress.completed_lessons as f64
                / c.progress.total_lessons as f64
        })
        .sum();

    let average_completion_rate = if courses.is_empty() {
        0.0
    } else {
        let total: f64 = courses.iter().map(|c| c.progress.progress_percentage as f64).sum();
        (total / courses.len() as f64 * 100.0).round() / 100.0
    };

    let total_certificates = activity
        .iter()
        .filter(|a| a.activity_type == ActivityType::CertificateEarned)
        .count() as u32;

    let newest_activity = activity.iter().map(|a| a.timestamp).max();
    let last_active_date = match (learner.last_active_at, newest_activity) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    };

    DashboardSummary {
        total_courses,
        completed_courses,
        in_progress_courses,
        total_learning_time: learning_minutes.round() as u32,
        average_completion_rate,
        streak_days: streak_days(activity, tz),
        total_certificates,
        last_active_date,
    }
}

pub fn active_days(activity: &[ActivityItem], tz: Tz) -> BTreeSet<NaiveDate> {
    activity.iter().map(|a| local_date(a.timestamp, tz)).collect()
}

/// Length of the run of consecutive active days ending on the most recent active day.
pub fn streak_days(activity: &[ActivityItem], tz: Tz) -> u32 {
    let days = active_days(activity, tz);
    let Some(mut day) = days.last().copied() else {
        return 0;
    };
    let mut streak = 1;
    while days.contains(&(day - Duration::days(1))) {
        day -= Duration::days(1);
        streak += 1;
    }
    streak
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProgressReport;
    use crate::services::testing::{self, activity, at};

    fn course(id: &str, completed: u32, lessons: usize) -> CourseProgress {
        let product = testing::product(id, "yoga", &[], lessons, 0);
        let record = testing::enrollment(&product, completed, 1);
        CourseProgress {
            progress: ProgressReport::from_counts(
                &record.enrollment.id,
                completed,
                lessons as u32,
                &product.syllabus,
            )
            .expect("valid"),
            enrollment: record.enrollment,
            product,
        }
    }

    #[test]
    fn streak_counts_consecutive_days_up_to_latest_activity() {
        let items = vec![
            activity("a", ActivityType::Discussion, at(1, 10), None),
            activity("b", ActivityType::Discussion, at(3, 10), None),
            activity("c", ActivityType::Discussion, at(4, 23), None),
            activity("d", ActivityType::Discussion, at(5, 1), None),
            activity("e", ActivityType::Discussion, at(5, 9), None),
        ];
        assert_eq!(streak_days(&items, Tz::UTC), 3);
    }

    #[test]
    fn gap_resets_streak() {
        let items = vec![
            activity("a", ActivityType::Discussion, at(1, 10), None),
            activity("b", ActivityType::Discussion, at(2, 10), None),
            activity("c", ActivityType::Discussion, at(4, 10), None),
        ];
        assert_eq!(streak_days(&items, Tz::UTC), 1);
        assert_eq!(streak_days(&[], Tz::UTC), 0);
    }

    #[test]
    fn streak_uses_learner_day_boundary() {
        // 20:00 and 23:00 UTC on the 1st fall on the 2nd in Kolkata, 02:00 UTC on the 1st stays on the 1st.
        let items = vec![
            activity("a", ActivityType::Discussion, at(1, 2), None),
            activity("b", ActivityType::Discussion, at(1, 20), None),
        ];
        assert_eq!(streak_days(&items, Tz::UTC), 1);
        assert_eq!(streak_days(&items, chrono_tz::Asia::Kolkata), 2);
    }

    #[test]
    fn summary_counts_are_consistent() {
        let courses = vec![course("a", 6, 6), course("b", 3, 6), course("c", 0, 4)];
        let items = vec![activity("x", ActivityType::CertificateEarned, at(4, 10), Some("a"))];
        let summary = compute_summary(&testing::learner(), &courses, &items, Tz::UTC);

        assert_eq!(summary.total_courses, 3);
        assert_eq!(summary.completed_courses, 1);
        assert_eq!(summary.in_progress_courses, 1);
        assert!(summary.completed_courses + summary.in_progress_courses <= summary.total_courses);
        // 360 + 180 + 0 minutes
        assert_eq!(summary.total_learning_time, 540);
        assert_eq!(summary.average_completion_rate, 50.0);
        assert_eq!(summary.total_certificates, 1);
        // learner last active on the 9th is newer than the activity on the 4th
        assert_eq!(summary.last_active_date, Some(at(9, 7)));
    }

    #[test]
    fn empty_course_list_has_zero_rate() {
        let summary = compute_summary(&testing::learner(), &[], &[], Tz::UTC);
        assert_eq!(summary.total_courses, 0);
        assert_eq!(summary.average_completion_rate, 0.0);
    }
}
