use anyhow::{Result, bail};
use chrono::Local;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use crate::config::Config;
use crate::functions::Functions;
use nutrisense_core::db::Database;
use nutrisense_core::mealplan::{
    GroceryList, Meal, MealPlanPreferences, WeekMeals, to_new_meal_plan,
};
use nutrisense_core::models::{MealPlan, week_start};

use super::helpers::{open_session, short_id, truncate};

pub(crate) async fn cmd_plan_generate(
    config: &Config,
    db: &Database,
    functions: &Functions,
    json: bool,
) -> Result<()> {
    let mut sync = open_session(config, db)?;
    let Some(profile) = sync.profile() else {
        bail!("No profile found. Run `nutrisense onboard` first");
    };
    if !profile.is_onboarded() {
        eprintln!("Profile is incomplete; generating with default preferences.");
    }
    let prefs = MealPlanPreferences::from_profile(profile);

    if !json {
        eprintln!("Generating your weekly meal plan...");
    }
    let generated = functions.generate_meal_plan(&prefs).await?;
    let new_plan = to_new_meal_plan(&generated.meal_plan, week_start(Local::now().date_naive()))?;
    let saved = sync.add_meal_plan(&new_plan)?;
    sync.poll();

    if json {
        println!("{}", serde_json::to_string_pretty(&saved)?);
        return Ok(());
    }

    if let Some(explanation) = generated
        .meal_plan
        .get("explanation")
        .and_then(|e| e.as_str())
    {
        println!("{explanation}\n");
    }
    print_plan(&saved)?;
    println!("\nSaved as plan {}.", short_id(&saved.id));
    Ok(())
}

pub(crate) fn cmd_plan_list(config: &Config, db: &Database, json: bool) -> Result<()> {
    #[derive(Tabled)]
    struct PlanRow {
        #[tabled(rename = "ID")]
        id: String,
        #[tabled(rename = "Week of")]
        week: String,
        #[tabled(rename = "Days")]
        days: usize,
        #[tabled(rename = "Groceries")]
        groceries: usize,
        #[tabled(rename = "Created")]
        created: String,
    }

    let sync = open_session(config, db)?;
    let plans = sync.meal_plans();

    if json {
        println!("{}", serde_json::to_string_pretty(plans)?);
        return Ok(());
    }

    if plans.is_empty() {
        println!("No meal plans yet. Run `nutrisense plan generate` to create one.");
        return Ok(());
    }

    let rows: Vec<PlanRow> = plans
        .iter()
        .map(|p| PlanRow {
            id: short_id(&p.id).to_string(),
            week: p.week_start_date.format("%Y-%m-%d").to_string(),
            days: WeekMeals::from_value(&p.meals).map_or(0, |m| m.days().len()),
            groceries: p
                .grocery_list
                .as_ref()
                .and_then(|g| GroceryList::from_value(g).ok())
                .map_or(0, |g| g.item_count()),
            created: p.created_at.get(..10).unwrap_or(&p.created_at).to_string(),
        })
        .collect();

    let table = Table::new(rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(2..4)).with(Alignment::right()))
        .to_string();
    println!("{table}");
    Ok(())
}

pub(crate) fn cmd_plan_show(
    config: &Config,
    db: &Database,
    id: Option<&str>,
    json: bool,
) -> Result<()> {
    let sync = open_session(config, db)?;
    let plan = find_plan(sync.meal_plans(), id)?;

    if json {
        println!("{}", serde_json::to_string_pretty(plan)?);
    } else {
        println!(
            "Meal plan {} (week of {})\n",
            short_id(&plan.id),
            plan.week_start_date.format("%Y-%m-%d")
        );
        print_plan(plan)?;
    }
    Ok(())
}

pub(crate) fn cmd_plan_groceries(
    config: &Config,
    db: &Database,
    id: Option<&str>,
    json: bool,
) -> Result<()> {
    let sync = open_session(config, db)?;
    let plan = find_plan(sync.meal_plans(), id)?;
    let list = match &plan.grocery_list {
        Some(value) => GroceryList::from_value(value)?,
        None => GroceryList::default(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&list)?);
        return Ok(());
    }

    if list.item_count() == 0 {
        println!("Plan {} has no grocery list.", short_id(&plan.id));
        return Ok(());
    }
    for (category, items) in list.categories() {
        if items.is_empty() {
            continue;
        }
        println!("{category}");
        for item in items {
            println!("  - {item}");
        }
    }
    Ok(())
}

/// Latest plan when `id` is absent; otherwise the plan whose id starts with it.
fn find_plan<'a>(plans: &'a [MealPlan], id: Option<&str>) -> Result<&'a MealPlan> {
    let Some(id) = id else {
        return match plans.first() {
            Some(plan) => Ok(plan),
            None => bail!("No meal plans yet. Run `nutrisense plan generate` to create one"),
        };
    };

    let mut matches = plans.iter().filter(|p| p.id.starts_with(id));
    match (matches.next(), matches.next()) {
        (Some(plan), None) => Ok(plan),
        (Some(_), Some(_)) => bail!("Plan id '{id}' is ambiguous. Use more characters"),
        (None, _) => bail!("No meal plan with id '{id}'"),
    }
}

fn meal_cell(meal: Option<&Meal>) -> String {
    meal.map_or_else(
        || "-".to_string(),
        |m| match &m.calories {
            Some(cal) => format!("{} ({cal} kcal)", truncate(&m.name, 28)),
            None => truncate(&m.name, 28),
        },
    )
}

fn print_plan(plan: &MealPlan) -> Result<()> {
    #[derive(Tabled)]
    struct DayRow {
        #[tabled(rename = "Day")]
        day: String,
        #[tabled(rename = "Breakfast")]
        breakfast: String,
        #[tabled(rename = "Lunch")]
        lunch: String,
        #[tabled(rename = "Dinner")]
        dinner: String,
        #[tabled(rename = "Snacks")]
        snacks: String,
    }

    let meals = WeekMeals::from_value(&plan.meals)?;
    let rows: Vec<DayRow> = meals
        .days()
        .into_iter()
        .map(|(day, d)| DayRow {
            day: capitalize(day),
            breakfast: meal_cell(d.breakfast.as_ref()),
            lunch: meal_cell(d.lunch.as_ref()),
            dinner: meal_cell(d.dinner.as_ref()),
            snacks: if d.snacks.is_empty() {
                "-".to_string()
            } else {
                d.snacks
                    .iter()
                    .map(|s| truncate(&s.name, 20))
                    .collect::<Vec<_>>()
                    .join(", ")
            },
        })
        .collect();

    let table = Table::new(rows).with(Style::rounded()).to_string();
    println!("{table}");
    Ok(())
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_uppercase().chain(chars).collect()
    })
}
