//! JSON resilience layer: turns unreliable model text into canonical results.

pub mod gate;
pub mod heal;
pub mod normalize;
pub mod salvage;
mod scanner;

pub use gate::{GateVerdict, evaluate};
pub use heal::{heal_text, parse_lenient};
pub use normalize::normalize;
pub use salvage::salvage;
