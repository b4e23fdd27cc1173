pub mod chat;
pub mod db;
pub mod mealplan;
pub mod models;
pub mod openai;
pub mod realtime;
pub mod spoonacular;
pub mod sync;
