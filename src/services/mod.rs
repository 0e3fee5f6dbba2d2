pub mod reconciler;
pub mod stripe;
