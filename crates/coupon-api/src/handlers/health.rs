//! 健康检查

use axum::{Json, extract::State};
use serde_json::{Value, json};

use crate::state::AppState;

/// 存活探针：服务进程正常即返回 ok
pub async fn health_check(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": state.service_name,
    }))
}

/// 就绪探针：检查数据库和 Redis 连接是否可用
///
/// 内存后端没有外部依赖，始终就绪
pub async fn readiness_check(State(state): State<AppState>) -> Json<Value> {
    let Some(infra) = &state.infra else {
        return Json(json!({
            "status": "ok",
            "service": state.service_name,
            "checks": { "storage": "memory" }
        }));
    };

    let db_ok = infra.database.health_check().await.is_ok();
    let cache_ok = infra.cache.health_check().await.is_ok();
    let all_ok = db_ok && cache_ok;

    Json(json!({
        "status": if all_ok { "ok" } else { "degraded" },
        "service": state.service_name,
        "checks": {
            "database": if db_ok { "ok" } else { "fail" },
            "redis": if cache_ok { "ok" } else { "fail" }
        }
    }))
}
