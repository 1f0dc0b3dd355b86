mod client;
mod proxy;

pub use client::{
    GetOptions, NetworkErrorKind, WebClient, WebConfig, WebError, WebResponse, DEFAULT_USER_AGENT,
};
pub use proxy::ProxyRule;
