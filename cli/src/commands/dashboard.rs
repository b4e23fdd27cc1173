use anyhow::Result;
use serde::Serialize;

use crate::config::Config;
use nutrisense_core::db::Database;
use nutrisense_core::mealplan::WeekMeals;
use nutrisense_core::models::{HealthEntry, MealPlan};
use nutrisense_core::sync::UserData;

use super::health::print_health_table;
use super::helpers::{open_session, short_id};

const DAILY_STEP_GOAL: i64 = 10_000;
const SLEEP_GOAL_HOURS: f64 = 8.0;
const RECENT_ENTRIES: usize = 5;

#[derive(Debug, Serialize)]
pub(crate) struct Dashboard<'a> {
    pub name: &'a str,
    pub onboarded: bool,
    /// The newest health entry stands in for "today".
    pub latest: Option<&'a HealthEntry>,
    pub step_goal: i64,
    pub step_progress_pct: Option<f64>,
    pub meal_plan_count: usize,
    pub current_plan: Option<&'a MealPlan>,
    pub recent: Vec<&'a HealthEntry>,
}

impl<'a> Dashboard<'a> {
    pub(crate) fn from_data(data: &'a UserData) -> Self {
        let latest = data.health_entries.first();
        #[allow(clippy::cast_precision_loss)]
        let step_progress_pct = latest
            .and_then(|e| e.steps)
            .map(|steps| (steps as f64 * 100.0 / DAILY_STEP_GOAL as f64).min(100.0));
        Self {
            name: data.profile.as_ref().map_or("there", |p| p.display_name()),
            onboarded: data.profile.as_ref().is_some_and(|p| p.is_onboarded()),
            latest,
            step_goal: DAILY_STEP_GOAL,
            step_progress_pct,
            meal_plan_count: data.meal_plans.len(),
            current_plan: data.meal_plans.first(),
            recent: data.health_entries.iter().take(RECENT_ENTRIES).collect(),
        }
    }
}

pub(crate) fn cmd_dashboard(config: &Config, db: &Database, json: bool) -> Result<()> {
    let sync = open_session(config, db)?;
    let dashboard = Dashboard::from_data(sync.data());

    if json {
        println!("{}", serde_json::to_string_pretty(&dashboard)?);
        return Ok(());
    }

    println!("Welcome back, {}!\n", dashboard.name);
    if !dashboard.onboarded {
        println!("Finish your profile with `nutrisense onboard` for personalised plans.\n");
    }

    let latest = dashboard.latest;
    match latest.and_then(|e| e.steps) {
        Some(steps) => println!(
            "  Steps:  {steps} / {} ({:.0}%)",
            dashboard.step_goal,
            dashboard.step_progress_pct.unwrap_or_default()
        ),
        None => println!("  Steps:  - / {}", dashboard.step_goal),
    }
    match latest.and_then(|e| e.sleep_hours) {
        Some(hours) => println!("  Sleep:  {hours:.1} h (goal {SLEEP_GOAL_HOURS:.0} h)"),
        None => println!("  Sleep:  -"),
    }
    match latest.and_then(|e| e.mood) {
        Some(mood) => println!("  Mood:   {mood}/10"),
        None => println!("  Mood:   -"),
    }
    println!("  Plans:  {}", dashboard.meal_plan_count);

    if let Some(plan) = dashboard.current_plan {
        let days = WeekMeals::from_value(&plan.meals).map_or(0, |m| m.days().len());
        println!(
            "\nCurrent plan {} (week of {}, {days} days planned)",
            short_id(&plan.id),
            plan.week_start_date.format("%Y-%m-%d")
        );
    } else {
        println!("\nNo meal plan yet. Run `nutrisense plan generate`.");
    }

    if dashboard.recent.is_empty() {
        println!("\nNo health data yet. Start with `nutrisense health log`.");
    } else {
        println!("\nRecent activity");
        print_health_table(&dashboard.recent);
    }
    Ok(())
}
