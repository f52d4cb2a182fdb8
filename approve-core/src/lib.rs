pub mod actor;
pub mod command;
pub mod config;
pub mod engine;
pub mod error;
pub mod issue;
pub mod notification;
pub mod owners;
pub mod pull_request;
pub mod reconcile;
pub mod resolver;
pub mod timeline;

pub use actor::Actor;
pub use command::{Command, CommandKind, CommandOrigin};
pub use config::ApprovalConfig;
pub use engine::{evaluate, Evaluation};
pub use error::{EngineError, OwnersError};
pub use issue::IssueLink;
pub use notification::{NotificationMeta, NOTIFICATION_MARKER};
pub use owners::{OwnersGroup, OwnersOracle, StaticOwners};
pub use pull_request::*;
pub use reconcile::{plan_effects, DesiredState, Effect, ObservedState};
pub use resolver::{ApprovalDecision, ApprovalState, GroupStatus};
pub use timeline::{BypassState, Timeline};
