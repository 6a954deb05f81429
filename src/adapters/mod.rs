// Adapters layer: concrete connectors for external systems.

#[cfg(feature = "amazon")]
pub mod amazon;
#[cfg(feature = "facebook")]
pub mod facebook;
#[cfg(feature = "google")]
pub mod google;

pub(crate) mod http;
