// OTA channel integration: inventory, rate and booking sync with
// Booking.com, MakeMyTrip and OYO

// Resilience building blocks
pub mod circuit_breaker;
pub mod rate_limiter;
pub mod retry;

// Shared plumbing
pub mod config;
pub mod error;
pub mod executor;
pub mod logger;
pub mod types;

// Adapters and the pooling factory
pub mod adapter;
pub mod channels;
pub mod factory;

// Re-export key types for convenience
pub use adapter::ChannelAdapter;
pub use channels::{build_adapter, BookingComAdapter, MakeMyTripAdapter, OyoAdapter};
pub use circuit_breaker::{CircuitBreaker, CircuitMetrics, CircuitState};
pub use config::{ChannelCapabilities, ChannelConfig, Credentials};
pub use error::{ChannelError, Result};
pub use executor::RequestExecutor;
pub use factory::{ActiveChannelInfo, ChannelFactory, ChannelHealthReport, FactoryConfig};
pub use logger::{init_tracing, LogEntry, LogSink, MemoryLogSink, OperationLogger};
pub use rate_limiter::{RateLimitState, RateLimiter};
pub use retry::RetryHandler;
pub use types::{
    BookingChanges, BookingData, BookingStatus, ChannelKind, ConnectionHealth, ConnectionStatus,
    InventoryData, PricingData, SyncResult, SyncStatus,
};
