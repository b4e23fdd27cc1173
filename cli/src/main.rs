mod commands;
mod config;
mod functions;
mod logging;
mod openai;
mod server;
mod spoonacular;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::process;

use crate::commands::{
    ProfileFields, RecipeFilters, cmd_chat, cmd_dashboard, cmd_health_history, cmd_health_log,
    cmd_onboard, cmd_plan_generate, cmd_plan_groceries, cmd_plan_list, cmd_plan_show,
    cmd_profile_options, cmd_profile_set, cmd_profile_show, cmd_recipes, cmd_signin, cmd_signout,
    cmd_signup, cmd_whoami,
};
use crate::config::{Config, UpstreamConfig};
use crate::functions::Functions;
use nutrisense_core::db::Database;

#[derive(Parser)]
#[command(
    name = "nutrisense",
    version,
    about = "Personal nutrition and wellness tracker",
    long_about = "Personal nutrition and wellness tracker.\n\n\
Track steps, sleep and mood, generate weekly AI meal plans, chat with a \
nutrition assistant and find recipes for what is in your fridge. \
`nutrisense serve` exposes the same data and functions over HTTP."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new user and sign in as it
    Signup {
        /// Use this id instead of a generated one
        #[arg(long)]
        user_id: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Sign in as an existing user
    Signin {
        /// User id
        user_id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Sign out of the current session
    Signout {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the signed-in user
    Whoami {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Fill in your profile (name, age and goal are required)
    Onboard {
        #[command(flatten)]
        fields: ProfileFields,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// View or edit your profile
    Profile {
        #[command(subcommand)]
        command: ProfileCommands,
    },
    /// Log and review steps, sleep and mood
    Health {
        #[command(subcommand)]
        command: HealthCommands,
    },
    /// Generate and browse weekly meal plans
    Plan {
        #[command(subcommand)]
        command: PlanCommands,
    },
    /// Ask the nutrition assistant a question
    Chat {
        /// Your message
        message: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Suggest recipes from ingredients you have
    Recipes {
        /// Comma separated ingredients (e.g. "chicken, rice, broccoli")
        ingredients: String,
        /// Diet filter (defaults to your allergies)
        #[arg(long)]
        diet: Option<String>,
        /// Cuisine filter (defaults to your first preferred cuisine)
        #[arg(long)]
        cuisine: Option<String>,
        /// Meal type (default: main course)
        #[arg(long)]
        meal_type: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Overview of your latest health data and meal plans
    Dashboard {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Start the HTTP API server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,
        /// Address to bind to (default: 127.0.0.1, use 0.0.0.0 to expose to network)
        #[arg(short, long, default_value = "127.0.0.1")]
        bind: String,
        /// Disable API key authentication (for development/testing)
        #[arg(long)]
        no_auth: bool,
    },
}

#[derive(Subcommand)]
enum ProfileCommands {
    /// Show your profile
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List the choices for goals, activity levels, allergies and cuisines
    Options {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Update individual profile fields
    Set {
        #[command(flatten)]
        fields: ProfileFields,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum HealthCommands {
    /// Log steps, sleep and/or mood
    Log {
        /// Step count
        #[arg(long)]
        steps: Option<i64>,
        /// Hours slept
        #[arg(long)]
        sleep: Option<f64>,
        /// Mood from 1 to 10
        #[arg(long)]
        mood: Option<i64>,
        /// Date (YYYY-MM-DD or today/yesterday, default: today)
        #[arg(long)]
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show recent health entries
    History {
        /// Number of days to show
        #[arg(short, long, default_value = "7")]
        days: u32,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum PlanCommands {
    /// Generate a weekly meal plan from your profile
    Generate {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List your meal plans, newest first
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show a meal plan (default: the latest)
    Show {
        /// Plan id or id prefix
        id: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the grocery list of a meal plan (default: the latest)
    Groceries {
        /// Plan id or id prefix
        id: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let default_level = if matches!(cli.command, Commands::Serve { .. }) {
        "info"
    } else {
        "warn"
    };
    logging::init_tracing(default_level);

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;
    let db = Database::open(&config.db_path)?;

    match cli.command {
        Commands::Signup { user_id, json } => cmd_signup(&config, &db, user_id, json),
        Commands::Signin { user_id, json } => cmd_signin(&config, &db, &user_id, json),
        Commands::Signout { json } => cmd_signout(&config, json),
        Commands::Whoami { json } => cmd_whoami(&config, &db, json),
        Commands::Onboard { fields, json } => cmd_onboard(&config, &db, fields, json),
        Commands::Profile { command } => match command {
            ProfileCommands::Show { json } => cmd_profile_show(&config, &db, json),
            ProfileCommands::Options { json } => cmd_profile_options(json),
            ProfileCommands::Set { fields, json } => cmd_profile_set(&config, &db, fields, json),
        },
        Commands::Health { command } => match command {
            HealthCommands::Log {
                steps,
                sleep,
                mood,
                date,
                json,
            } => cmd_health_log(&config, &db, steps, sleep, mood, date, json),
            HealthCommands::History { days, json } => {
                cmd_health_history(&config, &db, days, json)
            }
        },
        Commands::Plan { command } => match command {
            PlanCommands::Generate { json } => {
                let functions = Functions::new(&UpstreamConfig::from_env())?;
                cmd_plan_generate(&config, &db, &functions, json).await
            }
            PlanCommands::List { json } => cmd_plan_list(&config, &db, json),
            PlanCommands::Show { id, json } => cmd_plan_show(&config, &db, id.as_deref(), json),
            PlanCommands::Groceries { id, json } => {
                cmd_plan_groceries(&config, &db, id.as_deref(), json)
            }
        },
        Commands::Chat { message, json } => {
            let functions = Functions::new(&UpstreamConfig::from_env())?;
            cmd_chat(&config, &db, &functions, &message, json).await
        }
        Commands::Recipes {
            ingredients,
            diet,
            cuisine,
            meal_type,
            json,
        } => {
            let functions = Functions::new(&UpstreamConfig::from_env())?;
            let filters = RecipeFilters {
                diet,
                cuisine,
                meal_type,
            };
            cmd_recipes(&config, &db, &functions, &ingredients, filters, json).await
        }
        Commands::Dashboard { json } => cmd_dashboard(&config, &db, json),
        Commands::Serve {
            port,
            bind,
            no_auth,
        } => {
            let api_key = if no_auth {
                None
            } else {
                let (key, new) = config.load_or_create_api_key()?;
                if new {
                    eprintln!("Generated new API key in {}", config.data_dir.display());
                }
                Some(key)
            };
            let functions = Functions::new(&UpstreamConfig::from_env())?;
            server::start_server(db, functions, port, &bind, api_key).await
        }
    }
}
