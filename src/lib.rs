//! Admission control for HTTP services.
//!
//! `admitgate` decides, per request, whether a caller may proceed under the
//! rate limit configured for its route:
//!
//! - **Five Algorithms**: Fixed Window, Sliding Window Counter, Sliding
//!   Window Log, GCRA and Token Bucket
//! - **Atomic Counter Store**: every decision is one atomic read-modify-write,
//!   in memory or in Redis (Lua scripts)
//! - **Batched Admission**: optional local batches reconciled with the store
//!   every `batch_percent × limit` requests
//! - **Per-Route Configuration**: exact routes and glob patterns, loaded from
//!   YAML or JSON
//! - **Explicit Failure Policy**: fail open or fail closed when the store is
//!   unavailable, and always deny unconfigured routes
//! - **Framework Integration**: Axum/Tower middleware
//!
//! # Quick Start
//!
//! ```ignore
//! use admitgate::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> admitgate::Result<()> {
//!     let resolver = RouteResolver::builder()
//!         .route("/login", RouteConfig::new(FixedWindow::new(Quota::per_minute(5))))
//!         .route_pattern("/api/**", RouteConfig::new(TokenBucket::new(5.0, 1.67)))
//!         .build()?;
//!
//!     let gateway = AdmissionGateway::new(
//!         MemoryStorage::new(),
//!         resolver,
//!         IpKey::new(),
//!         GatewaySettings::new(FailureMode::FailClosed),
//!     );
//!
//!     let request = RequestParts::new("GET", "/login").with_client_ip("10.0.0.1".parse().unwrap());
//!     let result = gateway.admit("/login", &request, current_timestamp_ms()).await;
//!
//!     if result.allowed {
//!         println!("Request allowed");
//!     } else {
//!         println!("Denied ({:?}), retry after {} ms", result.reason, result.retry_after_ms);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Algorithms
//!
//! | Algorithm | Best For | State |
//! |-----------|----------|-------|
//! | GCRA | Precise rate control | One timestamp |
//! | Token Bucket | Bursty traffic | Tokens + timestamp |
//! | Sliding Window Log | Precision critical | One timestamp per request |
//! | Sliding Window Counter | General purpose | k + 1 counters |
//! | Fixed Window | Simple use cases | One counter |
//!
//! # Feature Flags
//!
//! - `memory` (default): In-memory storage with garbage collection
//! - `redis`: Redis storage backend
//! - `axum`: Axum middleware integration

pub mod algorithm;
pub mod config;
pub mod decision;
pub mod error;
pub mod gateway;
pub mod headers;
pub mod key;
pub mod quota;
pub mod resolver;
pub mod storage;

#[cfg(feature = "axum")]
pub mod middleware;

// Re-export main types
pub use algorithm::{Algorithm, AlgorithmConfig, AlgorithmKind, BatchedAdmission};
pub use config::{GatewayConfig, RouteEntry, Variant};
pub use decision::{Decision, DecisionMetadata, DenyReason, RateLimitInfo};
pub use error::{ConfigError, ConnectionError, RateLimitError, Result, StorageError};
pub use gateway::{AdmissionGateway, AdmitResult, FailureMode, GatewaySettings};
pub use headers::RateLimitHeaders;
pub use key::{
    CompositeKey, FallbackKey, FnKey, GlobalKey, HeaderKey, IpKey, Key, MethodKey, RequestParts,
};
pub use quota::Quota;
pub use resolver::{RouteConfig, RouteResolver};
pub use storage::{current_timestamp_ms, ChargeMode, Storage, StorageEntry};

// Re-export algorithms
pub use algorithm::{FixedWindow, SlidingWindowCounter, SlidingWindowLog, TokenBucket, GCRA};

// Re-export storage types
#[cfg(feature = "memory")]
pub use storage::{GcConfig, GcInterval, MemoryStorage};

#[cfg(feature = "redis")]
pub use storage::{RedisConfig, RedisStorage};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::algorithm::{Algorithm, AlgorithmConfig};
    pub use crate::config::GatewayConfig;
    pub use crate::decision::{Decision, DenyReason, RateLimitInfo};
    pub use crate::error::{RateLimitError, Result};
    pub use crate::gateway::{AdmissionGateway, AdmitResult, FailureMode, GatewaySettings};
    pub use crate::key::{HeaderKey, IpKey, Key, RequestParts};
    pub use crate::quota::Quota;
    pub use crate::resolver::{RouteConfig, RouteResolver};
    pub use crate::storage::{current_timestamp_ms, Storage};

    pub use crate::algorithm::{
        FixedWindow, SlidingWindowCounter, SlidingWindowLog, TokenBucket, GCRA,
    };

    #[cfg(feature = "memory")]
    pub use crate::storage::{GcConfig, GcInterval, MemoryStorage};
}
