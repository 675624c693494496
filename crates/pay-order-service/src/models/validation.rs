//! 结构化校验结果
//!
//! 数据记录与校验逻辑分离：记录是纯数据，校验是返回 `ValidationResult` 的自由函数。

use serde::Serialize;

/// 校验结果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
}

impl ValidationResult {
    /// 由错误列表构造，列表为空即通过
    pub fn from_errors(errors: Vec<String>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }

    /// 错误信息拼接（用于日志和错误响应）
    pub fn message(&self) -> String {
        self.errors.join(", ")
    }
}

/// 金额规则：金额 > 0，0 ≤ 优惠 ≤ 金额
pub(crate) fn check_amounts(amount: i64, discount: i64, errors: &mut Vec<String>) {
    if amount <= 0 {
        errors.push("订单金额必须大于0".to_string());
    }
    if discount < 0 {
        errors.push("优惠金额不能小于0".to_string());
    }
    if discount > amount {
        errors.push("优惠金额不能大于订单金额".to_string());
    }
}
