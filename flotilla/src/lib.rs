//! Flotilla - multi-cluster container build dispatch and supervision.
//!
//! A control-plane crate that fans one logical container-image build
//! request out across heterogeneous worker clusters (one set per target
//! CPU architecture), tracks each worker build to completion, and
//! aggregates the outcomes into a single verdict with per-platform
//! diagnostics.
//!
//! # Core Concepts
//!
//! - **Cluster**: A remote build backend serving one CPU architecture,
//!   described by a static [`Cluster`] configuration entry.
//!
//! - **Selection**: The [`ClusterSelector`] queries candidate clusters
//!   for their current load and ranks them, consulting the per-platform
//!   [`ClusterHealthTracker`] for backoff and dead-cluster state.
//!
//! - **Worker build**: One remote build execution, owned by a
//!   [`WorkerBuildHandle`] from launch through logs, completion wait,
//!   cancellation, and failure diagnosis.
//!
//! - **Supervision**: The [`DispatchSupervisor`] runs one cancellable
//!   task per platform and joins them all, converting every per-platform
//!   outcome into a [`WorkerBuild`] record.
//!
//! - **Aggregation**: [`aggregate_builds`] folds the records into an
//!   [`OrchestrationResult`] whose verdict carries a JSON mapping of
//!   failed platforms to structured reasons.
//!
//! # Feature Flags
//!
//! - `metrics` - Prometheus metrics support
//!
//! # Example
//!
//! ```ignore
//! use flotilla::*;
//!
//! let supervisor = DispatchSupervisorBuilder::new(DispatchConfig::default())
//!     .with_provider(provider)
//!     .build()?;
//! let result = supervisor
//!     .dispatch(&platforms, &base_params, &platform_overrides, &global_overrides)
//!     .await?;
//! result.verdict()?;
//! ```

/// Result aggregation for one orchestration run.
///
/// The `aggregate` module combines settled [`WorkerBuild`] records into
/// an [`OrchestrationResult`] with per-platform failure reasons.
pub mod aggregate;

/// Worker build identities, statuses, records, and annotations.
pub mod build;

/// Static cluster configuration and dispatch tuning.
pub mod config;

/// The dispatch concurrency core.
///
/// The `dispatch` module provides the [`DispatchSupervisor`], its
/// builder, and the [`CancelToken`] observed by platform tasks.
pub mod dispatch;

/// Error taxonomy for dispatch and cluster sessions.
pub mod error;

/// Dispatch lifecycle event publishing.
///
/// The `events` module provides [`DispatchEvent`] payloads and the
/// [`InProcEventBus`] for in-process fan-out.
pub mod events;

/// Per-cluster failure and backoff bookkeeping.
pub mod health;

/// Build parameter merging and the shared upload-directory token.
pub mod params;

/// Cluster candidate ranking by priority and load.
pub mod selector;

/// Collaborator capability traits for cluster backends.
pub mod session;

/// Tracing spans and metric recording helpers.
pub mod telemetry;

#[cfg(feature = "metrics")]
/// Prometheus metrics, enabled by the `metrics` feature.
pub mod metrics;

/// Lifecycle supervision of one remote worker build.
pub mod worker;

pub use aggregate::{aggregate_builds, OrchestrationResult};
pub use build::{BuildAnnotations, BuildId, BuildRef, BuildStatus, WorkerBuild};
pub use config::{Cluster, DispatchConfig};
pub use dispatch::{CancelToken, DispatchSupervisor, DispatchSupervisorBuilder};
pub use error::{DispatchError, SessionError};
pub use events::{DispatchEvent, DispatchEventPayload, EventMeta, InProcEventBus};
pub use health::{ClusterHealth, ClusterHealthTracker, NoUsableCluster};
pub use params::{generate_upload_dir, worker_build_params, BuildParams};
pub use selector::{ClusterInfo, ClusterSelector};
pub use session::{ClusterConfigProvider, RemoteBuildSession};
pub use worker::WorkerBuildHandle;
