//! 集群化多人聊天（MUC）核心领域模型
//!
//! 包含占位者记录、房间聚合、历史策略、权限规则等核心实体，
//! 以及跨集群节点复制任务的定义。

pub mod errors;
pub mod events;
pub mod history;
pub mod occupant;
pub mod privileges;
pub mod room;
pub mod value_objects;

// 重新导出常用类型
pub use errors::*;
pub use events::*;
pub use history::*;
pub use occupant::*;
pub use privileges::*;
pub use room::*;
pub use value_objects::*;
