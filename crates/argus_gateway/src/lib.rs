pub mod broadcast;
pub mod server;
pub mod types;

pub use broadcast::Broadcaster;
pub use server::{router, serve, Services};
