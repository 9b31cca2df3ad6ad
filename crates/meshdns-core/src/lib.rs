// # meshdns-core
//
// Core library for mesh-network DNS reconciliation and gateway rule management.
//
// ## Architecture Overview
//
// This library keeps two derived artifacts consistent with their sources:
// - **DeviceDirectory**: Trait for listing the devices of a mesh network
// - **DnsAuthority**: Trait for managing zones and A records
// - **ReconcileEngine**: Diffs the device list against an assignment cache and
//   applies add/drop operations, one reload per pass
// - **RuleStore**: Trait for the durable rule snapshot (file or memory)
// - **GatewayReloader**: Trait for making the gateway pick up a new config
// - **GatewayManager**: Owns the reverse-proxy rules and keeps the snapshot,
//   the rendered config and the running gateway in step
//
// ## Design Principles
//
// 1. **Separation of Concerns**: Core logic is separate from collaborator implementations
// 2. **Explicit State**: Every engine owns its state; tests build isolated instances
// 3. **Failure Isolation**: One device or one reload failing never aborts a pass
// 4. **Library-First**: All core functionality can be used as a library
// 5. **Crash Safety**: Snapshots and rendered configs are written atomically

pub mod traits;
pub mod reconcile;
pub mod gateway;
pub mod store;
pub mod config;
pub mod error;

// Re-export core types for convenience
pub use traits::{Device, DeviceDirectory, DnsAuthority, GatewayReloader, RuleSet, RuleStore};
pub use reconcile::{DeviceResolution, ReconcileEngine, ResolutionOutcome, SyncResult};
pub use gateway::{GatewayManager, GatewayStats, RestoreReport, RestoreSource};
pub use gateway::rule::{Protocol, ProxyRule, ValidationError};
pub use gateway::reloader::{CommandReloader, NoopReloader};
pub use config::{GatewayConfig, MeshDnsConfig, RuleStorageConfig, SyncConfig};
pub use error::{Error, Result};
pub use store::{FileRuleStore, MemoryRuleStore};
