//! 券核销引擎
//!
//! 负责券的发放、查询校验、支付门控与并发安全的核销提交。
//!
//! ## 组件
//!
//! - `repository`：券存储（唯一持有 used_count 上限约束）、核销流水、支付订单存储
//! - `service`：查询校验、核销编排、支付门控、券发放
//! - `gateway`：支付网关客户端与签名校验

pub mod error;
pub mod gateway;
pub mod models;
pub mod repository;
pub mod service;

pub use error::{CouponError, Result};
