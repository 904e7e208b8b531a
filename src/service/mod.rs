//! 动作分发层：请求信封、令牌认证与分发入口
pub mod actions;
pub mod auth;
pub mod dispatcher;

pub use actions::{Action, ActionRequest, ActionResponse};
pub use auth::{AuthContext, Authenticator, HmacTokenAuthenticator};
pub use dispatcher::CacheService;
