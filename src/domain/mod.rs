pub mod action;
pub mod command;
pub mod market;

pub use action::*;
pub use command::*;
pub use market::*;
