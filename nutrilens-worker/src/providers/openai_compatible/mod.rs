//! OpenAI-compatible chat completions provider (OpenAI, vLLM, llama.cpp, ...).

pub mod client;

pub use client::OpenAiCompatibleClient;
