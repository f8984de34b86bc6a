//! Axum middleware for admission control.
//!
//! Provides a Tower-compatible layer that runs an [`AdmissionGateway`] in
//! front of an Axum application.
//!
//! # Example
//!
//! ```ignore
//! use axum::{Router, routing::get};
//! use admitgate::{middleware::AdmissionLayer, GatewayConfig, IpKey, MemoryStorage};
//!
//! let config = GatewayConfig::from_file("admission.yaml")?;
//! let gateway = config.gateway(MemoryStorage::new(), IpKey::new())?;
//!
//! let app = Router::new()
//!     .route("/api/data", get(handler))
//!     .layer(AdmissionLayer::new(gateway));
//!
//! axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
//! ```
//!
//! [`AdmissionGateway`]: crate::gateway::AdmissionGateway

mod layer;

pub use layer::{request_parts, AdmissionLayer, AdmissionService};
