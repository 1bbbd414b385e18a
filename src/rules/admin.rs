//! Admin snapshot: overview, per-rule stats, percentiles, health score

use serde::Serialize;

use super::engine::{RuleEngine, RuleSummary};

#[derive(Debug, Clone, Serialize)]
pub struct AdminOverview {
    pub total_rules: usize,
    pub enabled_rules: usize,
    pub total_executions: u64,
    pub successes: u64,
    pub failures: u64,
    pub skips: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Percentiles {
    pub p50_ms: u64,
    pub p95_ms: u64,
    pub p99_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Health {
    /// 0 (unusable) to 100 (quiet and healthy)
    pub score: u8,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AdminSnapshot {
    pub overview: AdminOverview,
    pub rules: Vec<RuleSummary>,
    pub performance: Percentiles,
    pub health: Health,
}

impl RuleEngine {
    /// Point-in-time admin view over the registry, log, and statistics.
    pub fn admin_snapshot(&self) -> AdminSnapshot {
        let rules = self.summaries();

        let overview = AdminOverview {
            total_rules: rules.len(),
            enabled_rules: rules.iter().filter(|r| r.enabled).count(),
            total_executions: rules.iter().map(|r| r.stats.total()).sum(),
            successes: rules.iter().map(|r| r.stats.successes).sum(),
            failures: rules.iter().map(|r| r.stats.failures).sum(),
            skips: rules.iter().map(|r| r.stats.skips).sum(),
        };

        let mut durations = self.log().completed_durations();
        durations.sort_unstable();
        let performance = Percentiles {
            p50_ms: percentile(&durations, 50),
            p95_ms: percentile(&durations, 95),
            p99_ms: percentile(&durations, 99),
        };

        let health = score_health(&overview, &performance);

        AdminSnapshot {
            overview,
            rules,
            performance,
            health,
        }
    }
}

/// Nearest-rank percentile over sorted samples; 0 when empty.
fn percentile(sorted: &[u64], p: u32) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let rank = (p as f64 / 100.0 * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

fn score_health(overview: &AdminOverview, performance: &Percentiles) -> Health {
    let mut score: i32 = 100;
    let mut recommendations = Vec::new();

    let completed = overview.successes + overview.failures;
    if completed > 0 {
        let failure_rate = overview.failures as f64 / completed as f64;
        score -= (failure_rate * 50.0) as i32;
        if failure_rate > 0.1 {
            recommendations.push(format!(
                "{:.0}% of rule executions fail; check the execution log for recurring errors",
                failure_rate * 100.0
            ));
        }
    }

    if performance.p95_ms > 5000 {
        score -= 10;
        recommendations.push(format!(
            "P95 rule duration is {} ms; consider moving slow work into workflows",
            performance.p95_ms
        ));
    }

    if overview.enabled_rules == 0 && overview.total_rules > 0 {
        score -= 20;
        recommendations.push("every registered rule is disabled".to_string());
    }

    Health {
        score: score.clamp(0, 100) as u8,
        recommendations,
    }
}
