pub mod model;
pub mod service;

pub use model::{RequestMeta, Session};
pub use service::SessionService;
