//! 商品目录
//!
//! 可购买商品的静态定价表，仅在下单时查询。目录在进程启动时构建一次并注入服务，
//! 构建时逐条校验定义，非法定义直接拒绝启动。

use std::collections::HashMap;

use serde::Serialize;

use crate::error::{PayError, Result};
use crate::models::validation::check_amounts;
use crate::models::{GoodsType, ValidationResult};

pub const MONTHLY_FIRST: &str = "MONTHLY_FIRST";
pub const MONTHLY_NORMAL: &str = "MONTHLY_NORMAL";
pub const YEARLY_FIRST: &str = "YEARLY_FIRST";
pub const YEARLY_NORMAL: &str = "YEARLY_NORMAL";

/// 商品定义（只读）
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GoodsDefinition {
    pub goods_name: String,
    pub goods_type: GoodsType,
    /// 原价（最小货币单位）
    pub amount: i64,
    pub discount: i64,
    pub description: String,
}

impl GoodsDefinition {
    fn new(name: &str, goods_type: GoodsType, amount: i64, discount: i64, description: &str) -> Self {
        Self {
            goods_name: name.to_string(),
            goods_type,
            amount,
            discount,
            description: description.to_string(),
        }
    }

    pub fn final_amount(&self) -> i64 {
        self.amount - self.discount
    }
}

/// 校验商品定义
pub fn validate_goods(goods: &GoodsDefinition) -> ValidationResult {
    let mut errors = Vec::new();
    if goods.goods_name.trim().is_empty() {
        errors.push("商品名称不能为空".to_string());
    }
    check_amounts(goods.amount, goods.discount, &mut errors);
    ValidationResult::from_errors(errors)
}

/// 内置商品
fn default_definitions() -> Vec<GoodsDefinition> {
    vec![
        GoodsDefinition::new(MONTHLY_FIRST, GoodsType::Monthly, 2900, 1000, "月度会员首充优惠"),
        GoodsDefinition::new(MONTHLY_NORMAL, GoodsType::Monthly, 2900, 0, "月度会员"),
        GoodsDefinition::new(YEARLY_FIRST, GoodsType::Yearly, 29900, 10000, "年度会员首充优惠"),
        GoodsDefinition::new(YEARLY_NORMAL, GoodsType::Yearly, 29900, 0, "年度会员"),
    ]
}

/// 商品目录
#[derive(Debug, Clone)]
pub struct GoodsCatalog {
    goods: HashMap<String, GoodsDefinition>,
}

impl GoodsCatalog {
    /// 由定义列表构建目录（名称区分大小写）
    pub fn new(definitions: Vec<GoodsDefinition>) -> Result<Self> {
        let mut goods = HashMap::with_capacity(definitions.len());
        for definition in definitions {
            let result = validate_goods(&definition);
            if !result.valid {
                return Err(PayError::Validation(format!(
                    "商品 {} 定义无效: {}",
                    definition.goods_name,
                    result.message()
                )));
            }
            goods.insert(definition.goods_name.clone(), definition);
        }
        Ok(Self { goods })
    }

    /// 内置四档会员商品
    pub fn with_defaults() -> Result<Self> {
        Self::new(default_definitions())
    }

    /// 按商品名称查询
    pub fn lookup(&self, goods_name: &str) -> Result<&GoodsDefinition> {
        self.goods
            .get(goods_name)
            .ok_or_else(|| PayError::GoodsNotFound(goods_name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.goods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.goods.is_empty()
    }
}
