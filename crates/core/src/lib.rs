// Orator core collaborator abstractions
//
// This crate defines the seams the resilience layer and the agent workers
// consume, without binding to any concrete backend:
// - DataService for the hosted row store, with an in-memory implementation
// - CompletionDriver and CompletionRegistry for AI-completion providers
// - Transcriber, Synthesizer and VoiceRegistry for speech
// - RankedChain, the "best available" selection shared by providers and agents
// - Telemetry initialization (console logging plus optional OTLP export)

pub mod completion;
pub mod data;
pub mod error;
pub mod memory;
pub mod selection;
pub mod speech;
pub mod telemetry;

// Re-exports for convenience
pub use completion::{
    Completion, CompletionDriver, CompletionMessage, CompletionOptions, CompletionRegistry,
    CompletionRole, EchoDriver, SharedCompletionDriver, TokenUsage,
};
pub use data::{DataService, Filter, OrderBy, Row};
pub use error::{ProviderError, RemoteError};
pub use memory::InMemoryDataService;
pub use selection::{RankedChain, Selection};
pub use speech::{Synthesizer, Transcriber, VoiceGender, VoiceOptions, VoiceRegistry};
pub use telemetry::{init_telemetry, TelemetryConfig, TelemetryGuard};
