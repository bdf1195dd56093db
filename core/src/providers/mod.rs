pub mod factory;
pub mod openai;

pub use factory::{OLLAMA_BASE_URL, create_provider};
pub use openai::OpenAIProvider;
