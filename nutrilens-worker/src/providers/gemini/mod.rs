//! Google Gemini `generateContent` provider.

pub mod client;

pub use client::GeminiClient;
