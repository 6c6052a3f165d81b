//! 隶属关系与角色变更的权限规则
//!
//! 纯判定函数，无 I/O、无副作用，便于真值表枚举测试。

use crate::value_objects::{Affiliation, Role};

/// 判断 actor 是否有权把目标占位者的隶属关系/角色改为给定的新值。
///
/// 权限按 owner > admin > member > none/outcast 的全序裁决：
/// - owner 可以修改任何人（包括其他 owner）；
/// - admin 不得动 owner，也不得把任何人提升到 admin/owner；
/// - 其余隶属关系没有修改权，唯一例外是 moderator 在不触碰
///   隶属关系的前提下可以调整角色，但不得撤销 owner/admin 的
///   moderator 角色。
pub fn is_privileged_to_change_affiliation_and_role(
    actor_affiliation: Affiliation,
    actor_role: Role,
    target_affiliation: Affiliation,
    target_role: Role,
    new_affiliation: Affiliation,
    new_role: Role,
) -> bool {
    match actor_affiliation {
        Affiliation::Owner => true,
        Affiliation::Admin => {
            if target_affiliation == new_affiliation {
                // 隶属关系不变时仅需保证目标不是 owner
                // （例如撤销某个 owner 的 moderator 角色是不允许的）。
                target_affiliation != Affiliation::Owner
            } else {
                // admin 不得修改 owner，也不得授予 admin/owner 隶属关系。
                target_affiliation != Affiliation::Owner
                    && new_affiliation != Affiliation::Admin
                    && new_affiliation != Affiliation::Owner
            }
        }
        _ => {
            // member 及以下没有修改权，除非 actor 是 moderator
            // 且本次操作不改变隶属关系。
            if actor_role == Role::Moderator && target_affiliation == new_affiliation {
                // moderator 不得撤销隶属关系高于自己的占位者的
                // moderator 角色。
                if target_role == Role::Moderator && new_role != Role::Moderator {
                    return target_affiliation != Affiliation::Owner
                        && target_affiliation != Affiliation::Admin;
                }
            }
            false
        }
    }
}
