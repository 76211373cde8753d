//! One-shot component reachability checks for `health-check`.

use crate::config::Config;
use crate::db::DbContext;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct HealthCheck {
    pub name: &'static str,
    pub ok: bool,
    pub detail: String,
}

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub checks: Vec<HealthCheck>,
}

impl HealthReport {
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        for check in &self.checks {
            let mark = if check.ok { "ok" } else { "FAIL" };
            out.push_str(&format!("[{mark:>4}] {}: {}\n", check.name, check.detail));
        }
        out.push_str(if self.healthy {
            "all checks passed\n"
        } else {
            "one or more checks failed\n"
        });
        out
    }
}

/// Probe the database, the search credential, and the budget settings.
pub async fn run_checks(config: &Config) -> HealthReport {
    let mut checks = Vec::new();

    let database = match DbContext::connect(config).await {
        Ok(ctx) => match ctx.jobs().running().await {
            Ok(jobs) => HealthCheck {
                name: "database",
                ok: true,
                detail: format!("connected, {} running job(s)", jobs.len()),
            },
            Err(e) => HealthCheck {
                name: "database",
                ok: false,
                detail: e.to_string(),
            },
        },
        Err(e) => HealthCheck {
            name: "database",
            ok: false,
            detail: e.to_string(),
        },
    };
    checks.push(database);

    let search = if config.use_mock_api {
        HealthCheck {
            name: "search_api",
            ok: true,
            detail: "mock client enabled".into(),
        }
    } else if config
        .serper_api_key
        .as_deref()
        .is_none_or(|key| key.is_empty())
    {
        HealthCheck {
            name: "search_api",
            ok: false,
            detail: "SERPER_API_KEY is not set".into(),
        }
    } else {
        HealthCheck {
            name: "search_api",
            ok: true,
            detail: format!("API key configured for {}", config.serper_base_url),
        }
    };
    checks.push(search);

    let budget_ok = config.daily_budget_usd > 0.0
        && config.cost_per_credit >= 0.0
        && config.budget_soft_pct <= config.budget_hard_pct;
    checks.push(HealthCheck {
        name: "budget",
        ok: budget_ok,
        detail: format!(
            "daily ${:.2}, ${:.4}/credit, soft {:.0}% / hard {:.0}%",
            config.daily_budget_usd,
            config.cost_per_credit,
            config.budget_soft_pct,
            config.budget_hard_pct
        ),
    });

    let healthy = checks.iter().all(|c| c.ok);
    HealthReport { healthy, checks }
}
