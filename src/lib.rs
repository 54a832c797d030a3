pub mod protocol;
pub mod stack;
pub mod utils;
