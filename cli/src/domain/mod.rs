//! Domain layer: pure business logic, types, and validation.
//!
//! This module has zero imports from `crate::infra`, `crate::commands`,
//! `crate::application`, `tokio`, `std::fs`, `std::process`, or sockets.
//! All functions are synchronous and take data in, returning data out.

pub mod baseline;
pub mod config;
pub mod connection;
pub mod error;
pub mod firewall;
pub mod guard;
pub mod instance;
pub mod ledger;
pub mod marker;
pub mod pipeline;
pub mod plan;
pub mod profile;
pub mod shell;
pub mod sshd;

pub use config::{BulwarkConfig, validate_config_key, validate_config_value};
pub use connection::{BatchOutcome, CommandBatch, ConnectionContext, CredentialRef};
pub use error::{CloudError, ConfigError, ExecError, HardenError, PlanError, ProfileError, RollbackError};
pub use instance::{Instance, InstanceSpec, PortRule};
pub use pipeline::PipelineRun;
pub use plan::DeploymentPlan;
pub use profile::{ProfileVariant, SecurityProfile};
