use rusqlite::Connection;

use crate::access::Actor;
use crate::ipc::error::{err, fail};
use crate::ipc::types::{AppState, Request};
use crate::repo::SqliteRepository;

pub fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

pub fn opt_str(req: &Request, key: &str) -> Option<String> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
}

pub fn opt_i64(req: &Request, key: &str) -> Option<i64> {
    req.params.get(key).and_then(|v| v.as_i64())
}

pub fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

/// Resolve the calling actor from the mandatory `actorId` parameter.
pub fn load_actor(conn: &Connection, req: &Request) -> Result<Actor, serde_json::Value> {
    let actor_id = required_str(req, "actorId")?;
    let repo = SqliteRepository::new(conn);
    Actor::load(&repo, &actor_id).map_err(|e| fail(&req.id, e))
}
