pub mod events;
pub mod retry;
pub mod utils;
