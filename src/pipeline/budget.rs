//! Creation-time cost estimation and the daily budget gate.

use crate::config::Config;
use crate::error::{Error, Result};
use tracing::warn;

/// Worst-case cost of a job before early-exit savings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostEstimate {
    pub credits: i64,
    pub cost_usd: f64,
}

/// The budget guard blocks job creation past the hard ceiling and warns
/// past the soft one. It is advisory during execution; nothing aborts a
/// running job.
#[derive(Debug, Clone)]
pub struct BudgetGuard {
    daily_budget_usd: f64,
    cost_per_credit: f64,
    soft_pct: f64,
    hard_pct: f64,
}

impl BudgetGuard {
    pub fn from_config(config: &Config) -> Self {
        Self {
            daily_budget_usd: config.daily_budget_usd,
            cost_per_credit: config.cost_per_credit,
            soft_pct: config.budget_soft_pct,
            hard_pct: config.budget_hard_pct,
        }
    }

    /// Worst case is one credit per query: zips × pages.
    pub fn estimate(&self, zips: usize, pages: i32) -> CostEstimate {
        let credits = zips as i64 * i64::from(pages.max(0));
        CostEstimate {
            credits,
            cost_usd: credits as f64 * self.cost_per_credit,
        }
    }

    /// Gate a new job against today's cumulative spend.
    pub fn check(&self, estimate: &CostEstimate, credits_spent_today: i64) -> Result<()> {
        let spent_usd = credits_spent_today as f64 * self.cost_per_credit;
        let hard_ceiling = self.daily_budget_usd * self.hard_pct / 100.0;
        let soft_ceiling = self.daily_budget_usd * self.soft_pct / 100.0;
        let projected = spent_usd + estimate.cost_usd;

        if projected > hard_ceiling {
            return Err(Error::BudgetExceeded {
                estimated_cost: estimate.cost_usd,
                remaining: hard_ceiling - spent_usd,
            });
        }

        if projected > soft_ceiling {
            warn!(
                estimated_cost_usd = estimate.cost_usd,
                spent_today_usd = spent_usd,
                soft_ceiling_usd = soft_ceiling,
                "job crosses the soft budget threshold"
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard(daily: f64, per_credit: f64, soft: f64, hard: f64) -> BudgetGuard {
        BudgetGuard {
            daily_budget_usd: daily,
            cost_per_credit: per_credit,
            soft_pct: soft,
            hard_pct: hard,
        }
    }

    #[test]
    fn estimate_is_zips_times_pages() {
        let g = guard(50.0, 0.01, 80.0, 100.0);
        let est = g.estimate(100, 2);
        assert_eq!(est.credits, 200);
        assert_eq!(est.cost_usd, 2.0);
    }

    #[test]
    fn blocks_past_hard_ceiling() {
        // $1 daily budget, 200 credits at $0.01 = $2 estimate.
        let g = guard(1.0, 0.01, 80.0, 100.0);
        let est = g.estimate(100, 2);
        let err = g.check(&est, 0).expect_err("should block");
        match err {
            Error::BudgetExceeded {
                estimated_cost,
                remaining,
            } => {
                assert_eq!(estimated_cost, 2.0);
                assert!(remaining < 1.0 + f64::EPSILON);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn prior_spend_counts_against_the_ceiling() {
        let g = guard(10.0, 0.01, 80.0, 100.0);
        let est = g.estimate(100, 2); // $2
        assert!(g.check(&est, 700).is_ok()); // $7 spent, $9 projected
        assert!(g.check(&est, 900).is_err()); // $9 spent, $11 projected
    }

    #[test]
    fn soft_threshold_does_not_block() {
        let g = guard(10.0, 0.01, 50.0, 100.0);
        let est = g.estimate(100, 2); // $2
        assert!(g.check(&est, 400).is_ok()); // $6 projected, past 50% soft
    }

    #[test]
    fn hard_pct_scales_the_ceiling() {
        let g = guard(10.0, 0.01, 50.0, 50.0);
        let est = g.estimate(100, 2); // $2
        assert!(g.check(&est, 350).is_err()); // $5.50 projected > $5 ceiling
        assert!(g.check(&est, 250).is_ok()); // $4.50 projected
    }
}
