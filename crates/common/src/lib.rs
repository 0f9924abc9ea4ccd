pub mod time;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
