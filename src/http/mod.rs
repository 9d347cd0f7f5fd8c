pub mod origin_proxy;
pub mod range;
pub mod server;
pub mod store_server;

pub use origin_proxy::ProxyState;
pub use server::{build_router, serve};
