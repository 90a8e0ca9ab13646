// Deckgen Gemini
//
// GenerativeProvider backed by the Gemini generateContent API.

mod provider;
pub mod types;

pub use provider::GeminiProvider;
