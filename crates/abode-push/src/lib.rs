/// Abode Push
///
/// `PushDeliverer` implementations:
/// - `HttpPushDeliverer`: posts each batch to a push relay over HTTPS
/// - `LogPushDeliverer`: logs instead of sending, for local setups

pub mod http;
pub mod log;

pub use http::HttpPushDeliverer;
pub use log::LogPushDeliverer;
