pub mod anthropic;
pub mod catalog;
pub mod echo;
pub mod openai_compat;
pub mod router;
pub mod traits;
pub(crate) mod util;

// Re-exports for convenience.
pub use anthropic::AnthropicExecutor;
pub use catalog::{ProviderInfo, ProviderKind, KNOWN_PROVIDERS};
pub use echo::EchoExecutor;
pub use openai_compat::OpenAiCompatExecutor;
pub use router::ExecutorRouter;
pub use traits::{AgentExecutor, ExecutorSettings, RunRequest, RunResult, Usage};
