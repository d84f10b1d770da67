pub mod models;
pub mod enums;
pub mod user_context;

pub use models::*;
pub use enums::*;
pub use user_context::*;
