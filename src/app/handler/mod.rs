pub mod diagnostics;
pub mod health;
pub mod weather;
pub mod work;
