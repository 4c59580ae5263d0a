pub mod add;
pub mod remove;
pub mod reset;
pub mod search;
pub mod stats;
pub mod status;
