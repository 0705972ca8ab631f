//! 请求和响应的数据传输对象

pub mod request;
pub mod response;

pub use request::{
    CreateOrderBody, IssueCouponBody, PaymentReferenceBody, RedeemBody, RedemptionListQuery,
    VerifyPaymentBody,
};
pub use response::{ApiResponse, CouponDto, ExpireOverdueResponse, ListResponse};
