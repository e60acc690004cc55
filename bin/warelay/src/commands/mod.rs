pub mod agents;
pub mod gateway;
pub mod onboard;
pub mod rules;
pub mod status;
