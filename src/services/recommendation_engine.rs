use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;

use crate::models::{
    CourseProgress, DashboardSnapshot, Product, RealTimeFactors, Recommendation,
    RecommendationProfile, RecommendationSettings, RecommendationType, TimeOfDay,
};
use crate::utils::time::{learner_timezone, local_date, time_of_day};

/// Upper bound on any single real-time adjustment.
pub const MAX_FACTOR_BONUS: f64 = 0.05;

const RESUME_BASE: f64 = 0.80;
const RESUME_PROGRESS_WEIGHT: f64 = 0.15;
const NEXT_LESSON_BASE: f64 = 0.75;
const CATEGORY_MATCH_BASE: f64 = 0.40;
const CATEGORY_MATCH_WEIGHT: f64 = 0.30;
const SIMILAR_BASE: f64 = 0.30;
const SIMILAR_WEIGHT: f64 = 0.35;
const SIMILAR_THRESHOLD: f64 = 0.2;
const POPULAR_BASE: f64 = 0.15;
const POPULAR_WEIGHT: f64 = 0.40;
const SEEN_PENALTY: f64 = 0.05;

pub struct RecommendationEngine {
    settings: RecommendationSettings,
}

impl RecommendationEngine {
    pub fn new(mut settings: RecommendationSettings) -> Self {
        settings.max_results = settings.max_results.max(1);
        settings.time_of_day_bonus = settings.time_of_day_bonus.clamp(0.0, MAX_FACTOR_BONUS);
        settings.streak_bonus = settings.streak_bonus.clamp(0.0, MAX_FACTOR_BONUS);
        settings.recent_activity_bonus = settings.recent_activity_bonus.clamp(0.0, MAX_FACTOR_BONUS);
        Self { settings }
    }

    pub fn max_results(&self) -> usize {
        self.settings.max_results
    }

    /// Derives ownership, exposure, popularity and preferred category from a snapshot.
    pub fn build_profile(&self, snapshot: &DashboardSnapshot) -> RecommendationProfile {
        let mut owned: BTreeSet<String> = snapshot
            .courses
            .iter()
            .map(|c| c.product.id.clone())
            .collect();
        owned.extend(
            snapshot
                .transactions
                .iter()
                .filter(|t| t.grants_access())
                .map(|t| t.product_id.clone()),
        );

        let seen = snapshot
            .activity
            .iter()
            .filter_map(|a| a.product_id.clone())
            .filter(|id| !owned.contains(id))
            .collect();

        let popularity = snapshot
            .catalog
            .iter()
            .map(|p| (p.id.clone(), p.learner_count as f64))
            .collect();

        RecommendationProfile {
            learner_id: snapshot.learner.id.clone(),
            owned_product_ids: owned,
            seen_product_ids: seen,
            popularity,
            preferred_category: most_completed_category(snapshot),
            streak_days: snapshot.summary.streak_days,
        }
    }

    /// Ranked, de-duplicated list. Pure over its inputs.
    pub fn rank(
        &self,
        snapshot: &DashboardSnapshot,
        profile: &RecommendationProfile,
        now: DateTime<Utc>,
    ) -> Vec<Recommendation> {
        if snapshot.catalog.is_empty() {
            return Vec::new();
        }

        let tz = learner_timezone(&snapshot.learner, &self.settings.default_timezone);
        let signals = Signals::collect(snapshot, profile, now, tz, self.settings.streak_threshold_days);

        let mut candidates = Vec::new();
        self.continuation_candidates(snapshot, &mut candidates);

        let pool: Vec<&Product> = snapshot
            .catalog
            .iter()
            .filter(|p| !profile.owned_product_ids.contains(&p.id) && !snapshot.is_enrolled(&p.id))
            .collect();
        let before = candidates.len();
        category_candidates(snapshot, profile, &pool, &mut candidates);
        // finished everything with no category left to explore: popular only
        let exhausted = candidates.len() == before
            && !snapshot.courses.is_empty()
            && snapshot.courses.iter().all(|c| c.progress.is_completed());
        if !exhausted {
            similar_candidates(snapshot, &pool, &mut candidates);
        }
        popular_candidates(profile, &pool, &mut candidates);

        let mut best: HashMap<String, Recommendation> = HashMap::new();
        for candidate in candidates {
            let penalty = if !candidate.kind.is_continuation()
                && profile.seen_product_ids.contains(&candidate.product.id)
            {
                SEEN_PENALTY
            } else {
                0.0
            };
            let recommendation = self.finish(candidate, penalty, &signals);
            let replace = match best.get(&recommendation.product.id) {
                Some(existing) => {
                    recommendation.score > existing.score
                        || (recommendation.score == existing.score
                            && recommendation.recommendation_type.priority()
                                < existing.recommendation_type.priority())
                }
                None => true,
            };
            if replace {
                best.insert(recommendation.product.id.clone(), recommendation);
            }
        }

        let mut ranked: Vec<Recommendation> = best.into_values().collect();
        ranked.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| {
                    a.recommendation_type
                        .priority()
                        .cmp(&b.recommendation_type.priority())
                })
                .then_with(|| {
                    // more recent category activity first, unknown last
                    let a_seen = signals.category_last_active(&a.product.category);
                    let b_seen = signals.category_last_active(&b.product.category);
                    b_seen.cmp(&a_seen)
                })
                .then_with(|| a.product.id.cmp(&b.product.id))
        });
        ranked.truncate(self.settings.max_results);
        ranked
    }

    fn continuation_candidates(&self, snapshot: &DashboardSnapshot, out: &mut Vec<Candidate>) {
        for course in &snapshot.courses {
            let Some(lesson) = &course.progress.next_lesson else {
                continue;
            };
            let pct = course.progress.progress_percentage;
            if course.progress.is_in_progress() {
                out.push(Candidate {
                    product: course.product.clone(),
                    kind: RecommendationType::Resume,
                    base: RESUME_BASE + RESUME_PROGRESS_WEIGHT * pct as f64 / 100.0,
                    reason: format!("Pick up where you left off: {} ({}% complete)", lesson.title, pct),
                });
            } else if course.progress.is_not_started() {
                out.push(Candidate {
                    product: course.product.clone(),
                    kind: RecommendationType::NextLesson,
                    base: NEXT_LESSON_BASE,
                    reason: format!("Start with {}", lesson.title),
                });
            }
        }
    }

    fn finish(&self, candidate: Candidate, penalty: f64, signals: &Signals) -> Recommendation {
        let continuation = candidate.kind.is_continuation();
        let habitual = signals
            .habitual_by_product
            .get(&candidate.product.id)
            .copied()
            .or(if continuation { signals.habitual } else { None });

        let factors = RealTimeFactors {
            time_of_day: signals.now_bucket,
            time_of_day_match: habitual == Some(signals.now_bucket),
            streak_bonus: continuation && signals.streak_alive,
            recent_activity_boost: signals.recent
                && (continuation
                    || signals
                        .recent_categories
                        .contains(&normalize(&candidate.product.category))),
        };

        let mut score = candidate.base - penalty;
        if factors.time_of_day_match {
            score += self.settings.time_of_day_bonus;
        }
        if factors.streak_bonus {
            score += self.settings.streak_bonus;
        }
        if factors.recent_activity_boost {
            score += self.settings.recent_activity_bonus;
        }

        Recommendation {
            product: candidate.product,
            score: round_score(score),
            reason: candidate.reason,
            recommendation_type: candidate.kind,
            factors,
        }
    }
}

struct Candidate {
    product: Product,
    kind: RecommendationType,
    base: f64,
    reason: String,
}

fn category_candidates(
    snapshot: &DashboardSnapshot,
    profile: &RecommendationProfile,
    pool: &[&Product],
    out: &mut Vec<Candidate>,
) {
    let Some(category) = profile.preferred_category.as_deref() else {
        return;
    };
    let category = normalize(category);
    let learner_tags: HashSet<String> = snapshot
        .courses
        .iter()
        .filter(|c| normalize(&c.product.category) == category)
        .flat_map(|c| c.product.tags.iter().map(|t| normalize(t)))
        .collect();

    for product in pool.iter().filter(|p| normalize(&p.category) == category) {
        let overlap = jaccard(&tag_set(product), &learner_tags);
        out.push(Candidate {
            product: (*product).clone(),
            kind: RecommendationType::CategoryMatch,
            base: CATEGORY_MATCH_BASE + CATEGORY_MATCH_WEIGHT * overlap,
            reason: format!("Matches your interest in {}", product.category),
        });
    }
}

fn similar_candidates(snapshot: &DashboardSnapshot, pool: &[&Product], out: &mut Vec<Candidate>) {
    let completed: Vec<(&CourseProgress, HashSet<String>)> = snapshot
        .courses
        .iter()
        .filter(|c| c.progress.is_completed())
        .map(|c| (c, feature_set(&c.product)))
        .collect();
    if completed.is_empty() {
        return;
    }

    for product in pool {
        let features = feature_set(product);
        let best = completed
            .iter()
            .map(|(course, done)| (jaccard(&features, done), *course))
            .max_by(|a, b| a.0.total_cmp(&b.0).then_with(|| b.1.product.id.cmp(&a.1.product.id)));
        if let Some((overlap, course)) = best {
            if overlap >= SIMILAR_THRESHOLD {
                out.push(Candidate {
                    product: (*product).clone(),
                    kind: RecommendationType::Similar,
                    base: SIMILAR_BASE + SIMILAR_WEIGHT * overlap,
                    reason: format!("Similar to {}, which you completed", course.product.title),
                });
            }
        }
    }
}

fn popular_candidates(profile: &RecommendationProfile, pool: &[&Product], out: &mut Vec<Candidate>) {
    let popularity = |p: &Product| {
        profile
            .popularity
            .get(&p.id)
            .copied()
            .unwrap_or(p.learner_count as f64)
            .max(0.0)
    };
    let max = pool.iter().map(|p| popularity(*p)).fold(0.0_f64, f64::max);

    for product in pool {
        let normalized = if max > 0.0 { popularity(*product) / max } else { 0.0 };
        out.push(Candidate {
            product: (*product).clone(),
            kind: RecommendationType::Popular,
            base: POPULAR_BASE + POPULAR_WEIGHT * normalized,
            reason: "Popular with learners across the platform".to_string(),
        });
    }
}

/// Category with the most completed lessons; ties go to the most recently active, then by name.
fn most_completed_category(snapshot: &DashboardSnapshot) -> Option<String> {
    let mut completed: BTreeMap<String, (u32, String)> = BTreeMap::new();
    for course in &snapshot.courses {
        if course.progress.completed_lessons == 0 {
            continue;
        }
        let entry = completed
            .entry(normalize(&course.product.category))
            .or_insert((0, course.product.category.clone()));
        entry.0 += course.progress.completed_lessons;
    }

    let category_of = product_categories(snapshot);
    let mut last_active: HashMap<String, DateTime<Utc>> = HashMap::new();
    for item in &snapshot.activity {
        if let Some(category) = item.product_id.as_ref().and_then(|id| category_of.get(id)) {
            let slot = last_active.entry(category.clone()).or_insert(item.timestamp);
            *slot = (*slot).max(item.timestamp);
        }
    }

    completed
        .into_iter()
        .max_by(|(a_key, a), (b_key, b)| {
            a.0.cmp(&b.0)
                .then_with(|| last_active.get(a_key).cmp(&last_active.get(b_key)))
                .then_with(|| b_key.cmp(a_key))
        })
        .map(|(_, (_, display))| display)
}

/// Normalized category per known product id.
fn product_categories(snapshot: &DashboardSnapshot) -> HashMap<String, String> {
    snapshot
        .catalog
        .iter()
        .chain(snapshot.courses.iter().map(|c| &c.product))
        .map(|p| (p.id.clone(), normalize(&p.category)))
        .collect()
}

struct Signals {
    now_bucket: TimeOfDay,
    habitual: Option<TimeOfDay>,
    habitual_by_product: HashMap<String, TimeOfDay>,
    streak_alive: bool,
    recent: bool,
    recent_categories: HashSet<String>,
    last_active_by_category: HashMap<String, DateTime<Utc>>,
}

impl Signals {
    fn collect(
        snapshot: &DashboardSnapshot,
        profile: &RecommendationProfile,
        now: DateTime<Utc>,
        tz: Tz,
        streak_threshold: u32,
    ) -> Self {
        let category_of = product_categories(snapshot);

        let mut overall: BTreeMap<TimeOfDay, usize> = BTreeMap::new();
        let mut per_product: HashMap<String, BTreeMap<TimeOfDay, usize>> = HashMap::new();
        let mut last_active_by_category: HashMap<String, DateTime<Utc>> = HashMap::new();
        let mut recent_categories = HashSet::new();
        let mut recent = false;
        let window_start = now - Duration::hours(24);

        for item in &snapshot.activity {
            let bucket = time_of_day(item.timestamp, tz);
            *overall.entry(bucket).or_insert(0) += 1;

            let is_recent = item.timestamp > window_start && item.timestamp <= now;
            recent |= is_recent;

            if let Some(product_id) = &item.product_id {
                *per_product
                    .entry(product_id.clone())
                    .or_default()
                    .entry(bucket)
                    .or_insert(0) += 1;
                if let Some(category) = category_of.get(product_id) {
                    let slot = last_active_by_category
                        .entry(category.clone())
                        .or_insert(item.timestamp);
                    *slot = (*slot).max(item.timestamp);
                    if is_recent {
                        recent_categories.insert(category.clone());
                    }
                }
            }
        }

        let today = local_date(now, tz);
        let last_day = snapshot.activity.iter().map(|a| local_date(a.timestamp, tz)).max();
        let streak_alive = profile.streak_days >= streak_threshold
            && last_day.is_some_and(|day| day == today || day == today - Duration::days(1));

        Self {
            now_bucket: time_of_day(now, tz),
            habitual: dominant_bucket(&overall),
            habitual_by_product: per_product
                .into_iter()
                .filter_map(|(id, counts)| dominant_bucket(&counts).map(|b| (id, b)))
                .collect(),
            streak_alive,
            recent,
            recent_categories,
            last_active_by_category,
        }
    }

    fn category_last_active(&self, category: &str) -> Option<DateTime<Utc>> {
        self.last_active_by_category.get(&normalize(category)).copied()
    }
}

/// Most frequent bucket; ties resolve to the earlier bucket in the day.
fn dominant_bucket(counts: &BTreeMap<TimeOfDay, usize>) -> Option<TimeOfDay> {
    let mut best: Option<(TimeOfDay, usize)> = None;
    for (&bucket, &count) in counts {
        if best.map_or(true, |(_, c)| count > c) {
            best = Some((bucket, count));
        }
    }
    best.map(|(bucket, _)| bucket)
}

fn normalize(value: &str) -> String {
    value.trim().to_lowercase()
}

fn tag_set(product: &Product) -> HashSet<String> {
    product.tags.iter().map(|t| normalize(t)).collect()
}

fn feature_set(product: &Product) -> HashSet<String> {
    let mut features = tag_set(product);
    features.insert(normalize(&product.category));
    features
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

fn round_score(score: f64) -> f64 {
    ((score * 10_000.0).round() / 10_000.0).clamp(0.0, 1.0)
}
