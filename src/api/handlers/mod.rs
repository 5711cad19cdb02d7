pub mod donations;
pub mod root;
pub mod webhooks;
