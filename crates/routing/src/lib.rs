//! Message routing: redirect rules, customer identity allocation and the
//! relay flows between customers, agents and the console.

pub mod engine;
pub mod forward;
pub mod resolver;

pub use engine::RoutingEngine;
pub use resolver::RedirectResolver;
