//! 应用层实现。
//!
//! 这里提供围绕领域模型的用例服务：占位者管理器维护本节点的
//! 集群成员视图，MUC 服务编排加入/离开/主题/隶属关系流程，
//! 并抽象外部适配器（集群广播、持久化、时钟）。

pub mod broadcaster;
pub mod clock;
pub mod errors;
pub mod occupant_manager;
pub mod repository;
pub mod services;

pub use broadcaster::{BroadcastError, ClusterBroadcaster};
pub use clock::{Clock, SystemClock};
pub use errors::{ApplicationError, ApplicationResult};
pub use occupant_manager::OccupantManager;
pub use repository::RoomRepository;
pub use services::{MucService, MucServiceDependencies};
