//! Plugin system: the `Plugin` trait, the registry, and the bundled plugins.
//!
//! Plugins extend the agent with callable capabilities exposed to the model
//! through function-calling schemas. The registry owns plugin lifecycle
//! (register, initialize, execute, cleanup) and the enabled/disabled state.

pub mod calculator;
pub mod registry;
pub mod search;
pub mod traits;
pub mod weather;

pub use calculator::CalculatorPlugin;
pub use registry::{PluginInfo, PluginRegistry};
pub use search::{DuckDuckGoBackend, SearchBackend, SearchCache, WebSearchPlugin};
pub use traits::{Plugin, PluginSchema};
pub use weather::WeatherPlugin;
