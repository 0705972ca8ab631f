//! 支付签名
//!
//! 签名为 `HMAC-SHA256(order_id + "|" + payment_id, key_secret)` 的小写十六进制。

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

fn mac(order_id: &str, payment_id: &str, secret: &str) -> Option<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(order_id.as_bytes());
    mac.update(b"|");
    mac.update(payment_id.as_bytes());
    Some(mac)
}

/// 计算签名
pub fn sign(order_id: &str, payment_id: &str, secret: &str) -> String {
    mac(order_id, payment_id, secret)
        .map(|m| hex::encode(m.finalize().into_bytes()))
        .unwrap_or_default()
}

/// 常量时间校验签名
pub fn verify(order_id: &str, payment_id: &str, signature: &str, secret: &str) -> bool {
    let Ok(expected) = hex::decode(signature.trim()) else {
        return false;
    };
    mac(order_id, payment_id, secret).is_some_and(|m| m.verify_slice(&expected).is_ok())
}
