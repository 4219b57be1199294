//! Agent Runtime - guarded document-drafting conversations
//!
//! This crate provides the orchestration layer of docwright:
//! - Screens every user message with a deterministic guardrail table
//! - Runs the collection dialogue against an external generation service
//! - Extracts and validates field values before anything is drafted
//! - Gates drafting on confirmed fields and checks drafted text for invented facts
//!
//! # Architecture
//!
//! The agent follows a constrained loop:
//! 1. **Guardrails** (`guardrails`) - classify raw text before any state changes
//! 2. **Collection** (`conversation`) - turn bookkeeping and readiness hints
//! 3. **Extraction** (`extractor`) - deterministic typed values with provenance
//! 4. **Drafting** (`drafting`) - precondition check, deterministic draft, fact containment
//!
//! # Key Types
//!
//! - `AgentRuntime` - `start` / `chat` / `generate` / `status` (see `runtime` module)
//! - `GenerationService` - pluggable port for the external model
//! - `SessionRegistry` - per-session locks and TTL sweep
//!
//! # Safety Principle
//!
//! The model is strictly a collaborator. It NEVER writes a field value that is
//! not stated in a user turn, and it never moves a session between states.

pub mod audit;
pub mod conversation;
pub mod drafting;
pub mod extractor;
pub mod generation;
pub mod guardrails;
pub mod llm;
pub mod registry;
pub mod runtime;

pub use generation::{
    ConversationContext, ConverseReply, GenerationError, GenerationService,
    ScriptedGenerationService, StubGenerationService,
};
pub use guardrails::GuardrailEngine;
pub use registry::SessionRegistry;
pub use runtime::{AgentRuntime, RuntimeSettings};
