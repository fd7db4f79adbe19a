//! Filesystem routes — thin wrappers over the dispatcher so the loopback
//! surface and the control-server surface stay in lockstep (including the
//! snake/camel argument adapter).

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde_json::Value;

use crate::agent::Agent;

macro_rules! fs_route {
    ($name:ident, $method:literal) => {
        pub async fn $name(
            State(agent): State<Arc<Agent>>,
            Json(body): Json<Value>,
        ) -> Json<Value> {
            Json(agent.dispatcher.dispatch($method, &body).await)
        }
    };
}

fs_route!(list, "fs_list");
fs_route!(read, "fs_read");
fs_route!(read_range, "fs_read_range");
fs_route!(write, "fs_write");
fs_route!(delete_path, "fs_delete");
fs_route!(move_path, "fs_move");
fs_route!(search, "fs_search");
fs_route!(grep, "fs_grep");
fs_route!(patch, "fs_patch");
