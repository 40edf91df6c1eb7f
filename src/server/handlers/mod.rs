pub mod health;
pub use self::health::health;

pub mod session;
pub use self::session::{login, logout, session};
