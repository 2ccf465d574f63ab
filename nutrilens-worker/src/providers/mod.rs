pub mod gemini;
pub mod openai_compatible;
pub mod provider;
pub mod query_dump;
pub mod stub;

pub use gemini::GeminiClient;
pub use openai_compatible::OpenAiCompatibleClient;
pub use provider::{
    InlineImage, Provider, ProviderContentBlock, ProviderError, ProviderRequest, ProviderResponse,
    ProviderUsage, extract_all_text,
};
pub use stub::StubProvider;
