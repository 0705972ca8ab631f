//! 数据模型定义

mod coupon;
mod enums;
mod payment;
mod redemption;
mod verdict;

pub use coupon::*;
pub use enums::*;
pub use payment::*;
pub use redemption::*;
pub use verdict::*;
