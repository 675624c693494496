//! 通知分类
//!
//! 把 App Store 的 (notificationType, subtype) 映射为内部事件类型。
//! 映射是一张静态表，新增通知类型只需加一行。

use crate::models::{DecodedNotification, EventKind};

/// 分类规则：`subtype` 为 `None` 表示匹配任意子类型
struct Rule {
    notification_type: &'static str,
    subtype: Option<&'static str>,
    kind: EventKind,
}

const fn rule(
    notification_type: &'static str,
    subtype: Option<&'static str>,
    kind: EventKind,
) -> Rule {
    Rule {
        notification_type,
        subtype,
        kind,
    }
}

static RULES: &[Rule] = &[
    rule("DID_RENEW", None, EventKind::Renewed),
    rule("SUBSCRIBED", None, EventKind::Renewed),
    rule("REFUND", None, EventKind::Refunded),
    rule("EXPIRED", None, EventKind::Expired),
    rule("GRACE_PERIOD_EXPIRED", None, EventKind::Expired),
    rule(
        "DID_CHANGE_RENEWAL_STATUS",
        Some("AUTO_RENEW_DISABLED"),
        EventKind::AutoRenewDisabled,
    ),
    rule(
        "DID_CHANGE_RENEWAL_STATUS",
        Some("AUTO_RENEW_ENABLED"),
        EventKind::AutoRenewEnabled,
    ),
];

/// 按类型与子类型分类，精确匹配子类型的规则优先于通配规则
pub fn classify(notification_type: &str, subtype: Option<&str>) -> EventKind {
    let mut wildcard = None;

    for rule in RULES.iter().filter(|r| r.notification_type == notification_type) {
        match rule.subtype {
            Some(expected) if Some(expected) == subtype => return rule.kind,
            Some(_) => {}
            None => {
                wildcard.get_or_insert(rule.kind);
            }
        }
    }

    wildcard.unwrap_or(EventKind::Ignored)
}

/// 分类已解码的通知，摘要通知一律忽略
pub fn classify_notification(notification: &DecodedNotification) -> EventKind {
    if notification.is_summary() {
        return EventKind::Ignored;
    }
    classify(
        &notification.notification_type,
        notification.subtype.as_deref(),
    )
}
