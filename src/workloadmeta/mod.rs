//! Workload metadata store: the reconciled, continuously updated record of
//! the containers, pods and tasks running on this host.
//!
//! Collectors report partial views through [`Store::notify`]; the store keeps
//! one view per source, folds them into a composite per entity and fans the
//! resulting changes out to subscribers.

pub mod container;
pub mod dump;
pub mod ecs;
pub mod entity;
pub mod error;
pub mod event;
pub mod ledger;
pub mod merge;
pub mod pod;
pub mod store;
pub mod subscription;

pub use container::{Container, ContainerImage, ContainerPort, ContainerRuntime, ContainerState};
pub use dump::{WorkloadDumpResponse, WorkloadEntity};
pub use ecs::{EcsLaunchType, EcsTask};
pub use entity::{Entity, EntityId, EntityMeta, Kind};
pub use error::{ImageParseError, StoreError};
pub use event::{CollectorEvent, Event, EventType};
pub use ledger::SourceEntities;
pub use merge::GapFill;
pub use pod::{KubernetesPod, KubernetesPodOwner, OrchestratorContainer};
pub use store::{Store, StoreSettings};
pub use subscription::{EventBundle, Filter, Subscription, SubscriptionId};
