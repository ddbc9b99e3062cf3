//! Provider adapters for the chorus hub.
//!
//! Each supported service has a [`PayloadFormat`] that knows how to read that
//! service's raw JSON, and every format is driven by the same rate-limited
//! [`Adapter`] over a [`Connector`](chorus_core::connector::Connector).
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use chorus_core::{connector::Connector, provider::ProviderRegistry};
//! # use chorus_providers::{CatalogAdapter, ServiceLimits};
//! # fn demo(conn: Arc<dyn Connector>) {
//! let mut registry = ProviderRegistry::new();
//! registry.register(Arc::new(CatalogAdapter::new(conn, ServiceLimits::default())));
//! # }
//! ```

mod adapter;
pub mod catalog;
pub mod error;
pub mod history;
mod payload;
pub mod registry;

pub use adapter::{Adapter, PayloadFormat, ServiceLimits};
pub use catalog::CatalogFormat;
pub use error::{Error, Result};
pub use history::HistoryFormat;
pub use registry::RegistryFormat;

/// Adapter for the primary catalog service.
pub type CatalogAdapter = Adapter<CatalogFormat>;
/// Adapter for the play-history service.
pub type HistoryAdapter = Adapter<HistoryFormat>;
/// Adapter for the metadata registry.
pub type RegistryAdapter = Adapter<RegistryFormat>;
