pub mod handlers;
pub mod intents;
pub mod keyboards;
