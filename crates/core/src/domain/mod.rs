pub mod document;
pub mod guardrail;
pub mod schema;
pub mod session;
