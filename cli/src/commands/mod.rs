mod assistant;
mod dashboard;
mod health;
mod helpers;
mod plan;
mod profile;
mod session;

pub(crate) use assistant::{RecipeFilters, cmd_chat, cmd_recipes};
pub(crate) use dashboard::cmd_dashboard;
pub(crate) use health::{cmd_health_history, cmd_health_log};
pub(crate) use plan::{cmd_plan_generate, cmd_plan_groceries, cmd_plan_list, cmd_plan_show};
pub(crate) use profile::{
    ProfileFields, cmd_onboard, cmd_profile_options, cmd_profile_set, cmd_profile_show,
};
pub(crate) use session::{cmd_signin, cmd_signout, cmd_signup, cmd_whoami};
