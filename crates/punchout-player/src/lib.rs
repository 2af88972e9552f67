pub mod aggregate;
pub mod capability;
pub mod config;
pub mod engine;
pub mod event_loop;
pub mod feeder;
pub mod flags;
pub mod player;
pub mod status;
pub mod time;
mod worker;

pub use config::PlayerConfig;
pub use player::{Player, PlayerParams};
pub use status::PlayerCallbacks;
pub use worker::{SeekPlan, plan_seek};
