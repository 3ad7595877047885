pub mod constant;
pub mod fakes;
pub mod logger;
pub mod utils;
