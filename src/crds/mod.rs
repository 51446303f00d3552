pub mod challenge;
pub mod gateway;

// Re-export types
pub use challenge::{Challenge, ChallengeSpec};
pub use gateway::{HTTPBackendRef, HTTPRoute, HTTPRouteRule, HTTPRouteSpec, ParentReference};
