pub mod api;
pub mod events;
pub mod ids;
pub mod models;

pub use ids::{HousingId, HousingRef, MessageId, ReminderId, UserId, VisitId};
