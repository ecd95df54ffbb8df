pub mod admin;
pub mod proxy;

pub use admin::{AdminState, admin_router};
pub use proxy::{ProxyState, proxy_router};
