//! RPC method handlers organized by domain.

use std::sync::Arc;

use parking_lot::RwLock;

use recoin_core::identity::{AuthenticatedUser, ItemKind, ItemRef};
use recoin_core::ids::{ConversationId, ItemId, UserId};
use recoin_engine::{EngineError, ThreadEngine};
use recoin_store::Database;

use crate::rpc::{self, RpcResponse};
use crate::wire;

/// Shared state available to all RPC handlers.
///
/// The bound user is process-scoped: `auth.login` binds it, every
/// mutation acts on behalf of it. Identity issuance happens outside
/// this service, so whatever the client presents is trusted.
pub struct HandlerState {
    pub db: Database,
    pub engine: Arc<ThreadEngine>,
    current_user: RwLock<Option<AuthenticatedUser>>,
}

impl HandlerState {
    pub fn new(db: Database, engine: Arc<ThreadEngine>) -> Self {
        Self {
            db,
            engine,
            current_user: RwLock::new(None),
        }
    }

    pub fn bind_user(&self, user: AuthenticatedUser) {
        *self.current_user.write() = Some(user);
    }

    pub fn clear_user(&self) {
        *self.current_user.write() = None;
    }

    pub fn current_user(&self) -> Option<AuthenticatedUser> {
        self.current_user.read().clone()
    }
}

/// Dispatch an RPC method to the appropriate handler.
///
/// Normalizes camelCase params to snake_case before routing, so all
/// handlers receive consistent snake_case keys.
pub async fn dispatch(
    state: &Arc<HandlerState>,
    method: &str,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let params = wire::normalize_params(params);

    match method {
        // Auth
        "auth.login" => auth_login(state, &params, id),
        "auth.logout" => auth_logout(state, id),
        "auth.current" => auth_current(state, id),

        // Chat
        "chat.send" | "chat.sendMessage" => chat_send(state, &params, id),
        "chat.conversations" | "chat.list" => chat_conversations(state, &params, id),
        "chat.messages" => chat_messages(state, &params, id),
        "chat.select" | "chat.setActiveConversation" => chat_select(state, &params, id),
        "chat.active" => chat_active(state, id),
        "chat.resolve" | "chat.markAsResolved" => chat_resolve(state, &params, id),
        "chat.markRead" => chat_mark_read(state, &params, id),
        "chat.unreadCount" | "chat.getUnreadCount" => chat_unread_count(state, &params, id),

        // System
        "system.ping" | "health" => health(state, id),
        "system.getInfo" => system_get_info(id),

        _ => RpcResponse::method_not_found(id, method),
    }
}

fn auth_required(id: Option<serde_json::Value>) -> RpcResponse {
    RpcResponse::domain_error(id, "AUTH_ERROR", "No user bound; call auth.login first")
}

fn engine_error(id: Option<serde_json::Value>, err: EngineError) -> RpcResponse {
    RpcResponse::domain_error(id, err.code(), err.to_string())
}

// ── Auth handlers ──

fn auth_login(
    state: &Arc<HandlerState>,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let user_id = match rpc::require_str(params, "user_id") {
        Ok(s) => UserId::from_raw(s),
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    let name = match rpc::require_str(params, "name") {
        Ok(n) => n,
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    let email = rpc::optional_str(params, "email").unwrap_or_default();

    let user = AuthenticatedUser::new(user_id, name, email);
    tracing::info!(user_id = %user.id, "User bound");
    state.bind_user(user.clone());
    RpcResponse::success(id, wire::user_to_wire(&user))
}

fn auth_logout(state: &Arc<HandlerState>, id: Option<serde_json::Value>) -> RpcResponse {
    state.clear_user();
    RpcResponse::success(id, serde_json::json!({"loggedOut": true}))
}

fn auth_current(state: &Arc<HandlerState>, id: Option<serde_json::Value>) -> RpcResponse {
    match state.current_user() {
        Some(user) => {
            RpcResponse::success(id, serde_json::json!({"user": wire::user_to_wire(&user)}))
        }
        None => RpcResponse::success(id, serde_json::json!({"user": null})),
    }
}

// ── Chat handlers ──

fn chat_send(
    state: &Arc<HandlerState>,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let Some(user) = state.current_user() else {
        return auth_required(id);
    };

    let receiver_id = match rpc::require_str(params, "receiver_id") {
        Ok(s) => UserId::from_raw(s),
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    let item_id = match rpc::require_str(params, "item_id") {
        Ok(s) => ItemId::from_raw(s),
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    let item_kind = match rpc::require_str(params, "item_type") {
        Ok(s) => match s.parse::<ItemKind>() {
            Ok(kind) => kind,
            Err(e) => return RpcResponse::invalid_params(id, e),
        },
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    let content = match rpc::require_str(params, "content") {
        Ok(c) => c,
        Err(e) => return RpcResponse::invalid_params(id, e),
    };

    let item = ItemRef::new(item_id, item_kind);
    match state.engine.send_message(&user.id, &receiver_id, &item, content) {
        Ok(outcome) => RpcResponse::success(id, wire::send_response(&outcome)),
        Err(e) => engine_error(id, e),
    }
}

fn chat_conversations(
    state: &Arc<HandlerState>,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let Some(user) = state.current_user() else {
        return auth_required(id);
    };

    let include_resolved = rpc::optional_bool(params, "include_resolved").unwrap_or(false);
    let limit = rpc::optional_i64(params, "limit").unwrap_or(50) as u32;
    let offset = rpc::optional_i64(params, "offset").unwrap_or(0) as u32;

    match state
        .engine
        .conversations_for(&user.id, include_resolved, limit, offset)
    {
        Ok(conversations) => {
            RpcResponse::success(id, wire::conversation_list_response(&conversations, limit))
        }
        Err(e) => engine_error(id, e),
    }
}

fn chat_messages(
    state: &Arc<HandlerState>,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let conversation_id = match rpc::require_str(params, "conversation_id") {
        Ok(s) => ConversationId::from_raw(s),
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    let limit = rpc::optional_i64(params, "limit").map(|v| v as u32);
    let offset = rpc::optional_i64(params, "offset").map(|v| v as u32);

    match state.engine.messages(&conversation_id, limit, offset) {
        Ok(messages) => {
            RpcResponse::success(id, wire::message_list_response(&messages, limit.unwrap_or(1000)))
        }
        Err(e) => engine_error(id, e),
    }
}

fn chat_select(
    state: &Arc<HandlerState>,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let Some(user) = state.current_user() else {
        return auth_required(id);
    };

    // Absent conversation_id clears the selection
    let conversation_id = rpc::optional_str(params, "conversation_id").map(ConversationId::from_raw);

    match state.engine.select(&user.id, conversation_id.as_ref()) {
        Ok(Some(conversation)) => RpcResponse::success(
            id,
            serde_json::json!({"conversation": wire::conversation_to_wire(&conversation)}),
        ),
        Ok(None) => RpcResponse::success(id, serde_json::json!({"conversation": null})),
        Err(e) => engine_error(id, e),
    }
}

fn chat_active(state: &Arc<HandlerState>, id: Option<serde_json::Value>) -> RpcResponse {
    let Some(user) = state.current_user() else {
        return auth_required(id);
    };

    match state.engine.active_conversation(&user.id) {
        Ok(Some(conversation)) => RpcResponse::success(
            id,
            serde_json::json!({"conversation": wire::conversation_to_wire(&conversation)}),
        ),
        Ok(None) => RpcResponse::success(id, serde_json::json!({"conversation": null})),
        Err(e) => engine_error(id, e),
    }
}

fn chat_resolve(
    state: &Arc<HandlerState>,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let Some(user) = state.current_user() else {
        return auth_required(id);
    };

    let conversation_id = match rpc::require_str(params, "conversation_id") {
        Ok(s) => ConversationId::from_raw(s),
        Err(e) => return RpcResponse::invalid_params(id, e),
    };

    match state.engine.resolve(&user.id, &conversation_id) {
        Ok(()) => RpcResponse::success(id, serde_json::json!({"resolved": true})),
        Err(e) => engine_error(id, e),
    }
}

fn chat_mark_read(
    state: &Arc<HandlerState>,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let Some(user) = state.current_user() else {
        return auth_required(id);
    };

    let conversation_id = match rpc::require_str(params, "conversation_id") {
        Ok(s) => ConversationId::from_raw(s),
        Err(e) => return RpcResponse::invalid_params(id, e),
    };

    match state.engine.mark_read(&user.id, &conversation_id) {
        Ok(count) => RpcResponse::success(id, serde_json::json!({"markedRead": count})),
        Err(e) => engine_error(id, e),
    }
}

fn chat_unread_count(
    state: &Arc<HandlerState>,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    // Explicit user_id wins; otherwise the bound user
    let user_id = match rpc::optional_str(params, "user_id") {
        Some(s) => UserId::from_raw(s),
        None => match state.current_user() {
            Some(user) => user.id,
            None => return auth_required(id),
        },
    };

    match state.engine.unread_count(&user_id) {
        Ok(count) => RpcResponse::success(id, serde_json::json!({"unreadCount": count})),
        Err(e) => engine_error(id, e),
    }
}

// ── System handlers ──

fn system_get_info(id: Option<serde_json::Value>) -> RpcResponse {
    RpcResponse::success(
        id,
        serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "name": "recoin",
        }),
    )
}

fn health(state: &Arc<HandlerState>, id: Option<serde_json::Value>) -> RpcResponse {
    let db_ok = state
        .db
        .with_conn(|conn| {
            conn.execute_batch("SELECT 1")?;
            Ok(true)
        })
        .unwrap_or(false);

    RpcResponse::success(
        id,
        serde_json::json!({
            "status": if db_ok { "healthy" } else { "degraded" },
            "components": {
                "database": if db_ok { "ok" } else { "error" },
            },
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast;

    fn setup() -> Arc<HandlerState> {
        let db = Database::in_memory().unwrap();
        let (event_tx, _event_rx) = broadcast::channel(100);
        let engine = Arc::new(ThreadEngine::new(db.clone(), event_tx));
        Arc::new(HandlerState::new(db, engine))
    }

    /// Helper: bind a user through the RPC surface.
    async fn login(state: &Arc<HandlerState>, user_id: &str, name: &str) {
        let resp = dispatch(
            state,
            "auth.login",
            &serde_json::json!({"user_id": user_id, "name": name}),
            Some(serde_json::json!(1)),
        )
        .await;
        assert!(resp.error.is_none());
    }

    /// Helper: send a message and return the conversation id.
    async fn send(state: &Arc<HandlerState>, receiver: &str, item: &str, content: &str) -> String {
        let resp = dispatch(
            state,
            "chat.send",
            &serde_json::json!({
                "receiverId": receiver,
                "itemId": item,
                "itemType": "lost",
                "content": content,
            }),
            Some(serde_json::json!(1)),
        )
        .await;
        assert!(resp.error.is_none(), "send failed: {:?}", resp.error);
        resp.result.unwrap()["conversation"]["id"]
            .as_str()
            .unwrap()
            .to_string()
    }

    // ── Dispatch tests ──

    #[tokio::test]
    async fn dispatch_unknown_method() {
        let state = setup();
        let resp = dispatch(
            &state,
            "foo.bar",
            &serde_json::json!({}),
            Some(serde_json::json!(1)),
        )
        .await;
        assert!(resp.error.is_some());
        assert_eq!(resp.error.as_ref().unwrap().code, "METHOD_NOT_FOUND");
    }

    // ── Auth tests ──

    #[tokio::test]
    async fn login_binds_and_logout_clears() {
        let state = setup();
        login(&state, "user_a", "Alex").await;

        let resp = dispatch(&state, "auth.current", &serde_json::json!({}), None).await;
        let result = resp.result.unwrap();
        assert_eq!(result["user"]["userId"], "user_a");
        assert_eq!(result["user"]["name"], "Alex");

        let resp = dispatch(&state, "auth.logout", &serde_json::json!({}), None).await;
        assert_eq!(resp.result.unwrap()["loggedOut"], true);

        let resp = dispatch(&state, "auth.current", &serde_json::json!({}), None).await;
        assert!(resp.result.unwrap()["user"].is_null());
    }

    #[tokio::test]
    async fn login_rebinds_on_second_call() {
        let state = setup();
        login(&state, "user_a", "Alex").await;
        login(&state, "user_b", "Blair").await;

        let resp = dispatch(&state, "auth.current", &serde_json::json!({}), None).await;
        assert_eq!(resp.result.unwrap()["user"]["userId"], "user_b");
    }

    #[tokio::test]
    async fn login_requires_user_id_and_name() {
        let state = setup();
        let resp = dispatch(
            &state,
            "auth.login",
            &serde_json::json!({"name": "Alex"}),
            Some(serde_json::json!(1)),
        )
        .await;
        assert_eq!(resp.error.as_ref().unwrap().code, "INVALID_PARAMS");
    }

    // ── Send tests ──

    #[tokio::test]
    async fn send_requires_bound_user() {
        let state = setup();
        let resp = dispatch(
            &state,
            "chat.send",
            &serde_json::json!({
                "receiverId": "user_b",
                "itemId": "item_1",
                "itemType": "lost",
                "content": "hello",
            }),
            Some(serde_json::json!(1)),
        )
        .await;
        assert_eq!(resp.error.as_ref().unwrap().code, "AUTH_ERROR");
    }

    #[tokio::test]
    async fn send_returns_wire_shape() {
        let state = setup();
        login(&state, "user_a", "Alex").await;

        let resp = dispatch(
            &state,
            "chat.send",
            &serde_json::json!({
                "receiverId": "user_b",
                "itemId": "item_1",
                "itemType": "found",
                "content": "I think this is yours",
            }),
            Some(serde_json::json!(1)),
        )
        .await;
        assert!(resp.error.is_none());
        let result = resp.result.unwrap();
        assert_eq!(result["created"], true);
        assert!(result["conversation"]["id"].is_string());
        assert_eq!(result["conversation"]["isActive"], true);
        assert_eq!(result["conversation"]["participants"][0], "user_a");
        assert_eq!(result["conversation"]["itemType"], "found");
        assert_eq!(result["message"]["content"], "I think this is yours");
        assert_eq!(result["message"]["read"], false);
        assert_eq!(
            result["conversation"]["lastMessage"]["id"],
            result["message"]["id"]
        );
    }

    #[tokio::test]
    async fn send_alias_accepted() {
        let state = setup();
        login(&state, "user_a", "Alex").await;

        let resp = dispatch(
            &state,
            "chat.sendMessage",
            &serde_json::json!({
                "receiverId": "user_b",
                "itemId": "item_1",
                "itemType": "lost",
                "content": "hello",
            }),
            Some(serde_json::json!(1)),
        )
        .await;
        assert!(resp.error.is_none());
    }

    #[tokio::test]
    async fn repeat_send_reuses_conversation() {
        let state = setup();
        login(&state, "user_a", "Alex").await;

        let first = send(&state, "user_b", "item_1", "hello").await;
        let resp = dispatch(
            &state,
            "chat.send",
            &serde_json::json!({
                "receiverId": "user_b",
                "itemId": "item_1",
                "itemType": "lost",
                "content": "still there?",
            }),
            Some(serde_json::json!(2)),
        )
        .await;
        let result = resp.result.unwrap();
        assert_eq!(result["created"], false);
        assert_eq!(result["conversation"]["id"], first.as_str());
    }

    #[tokio::test]
    async fn send_missing_param_rejected() {
        let state = setup();
        login(&state, "user_a", "Alex").await;

        let resp = dispatch(
            &state,
            "chat.send",
            &serde_json::json!({"receiverId": "user_b", "content": "hello"}),
            Some(serde_json::json!(1)),
        )
        .await;
        assert_eq!(resp.error.as_ref().unwrap().code, "INVALID_PARAMS");
    }

    #[tokio::test]
    async fn send_unknown_item_type_rejected() {
        let state = setup();
        login(&state, "user_a", "Alex").await;

        let resp = dispatch(
            &state,
            "chat.send",
            &serde_json::json!({
                "receiverId": "user_b",
                "itemId": "item_1",
                "itemType": "auction",
                "content": "hello",
            }),
            Some(serde_json::json!(1)),
        )
        .await;
        assert_eq!(resp.error.as_ref().unwrap().code, "INVALID_PARAMS");
    }

    #[tokio::test]
    async fn send_to_self_is_validation_error() {
        let state = setup();
        login(&state, "user_a", "Alex").await;

        let resp = dispatch(
            &state,
            "chat.send",
            &serde_json::json!({
                "receiverId": "user_a",
                "itemId": "item_1",
                "itemType": "lost",
                "content": "hello me",
            }),
            Some(serde_json::json!(1)),
        )
        .await;
        assert_eq!(resp.error.as_ref().unwrap().code, "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn send_empty_content_is_validation_error() {
        let state = setup();
        login(&state, "user_a", "Alex").await;

        let resp = dispatch(
            &state,
            "chat.send",
            &serde_json::json!({
                "receiverId": "user_b",
                "itemId": "item_1",
                "itemType": "lost",
                "content": "   ",
            }),
            Some(serde_json::json!(1)),
        )
        .await;
        assert_eq!(resp.error.as_ref().unwrap().code, "VALIDATION_ERROR");
    }

    // ── List tests ──

    #[tokio::test]
    async fn conversations_list_shape() {
        let state = setup();
        login(&state, "user_a", "Alex").await;
        send(&state, "user_b", "item_1", "hello").await;

        let resp = dispatch(
            &state,
            "chat.conversations",
            &serde_json::json!({}),
            Some(serde_json::json!(2)),
        )
        .await;
        let result = resp.result.unwrap();
        assert_eq!(result["totalCount"], 1);
        assert!(result["conversations"][0]["id"].is_string());
        assert!(result["conversations"][0]["isActive"].is_boolean());
        assert!(result["hasMore"].is_boolean());
    }

    #[tokio::test]
    async fn conversations_filter_follows_include_resolved() {
        let state = setup();
        login(&state, "user_a", "Alex").await;
        let conv = send(&state, "user_b", "item_1", "hello").await;

        let resp = dispatch(
            &state,
            "chat.resolve",
            &serde_json::json!({"conversationId": conv}),
            Some(serde_json::json!(2)),
        )
        .await;
        assert_eq!(resp.result.unwrap()["resolved"], true);

        let resp = dispatch(&state, "chat.conversations", &serde_json::json!({}), None).await;
        assert_eq!(resp.result.unwrap()["totalCount"], 0);

        let resp = dispatch(
            &state,
            "chat.conversations",
            &serde_json::json!({"includeResolved": true}),
            None,
        )
        .await;
        let result = resp.result.unwrap();
        assert_eq!(result["totalCount"], 1);
        assert_eq!(result["conversations"][0]["isActive"], false);
    }

    #[tokio::test]
    async fn messages_list_in_order() {
        let state = setup();
        login(&state, "user_a", "Alex").await;
        let conv = send(&state, "user_b", "item_1", "first").await;
        send(&state, "user_b", "item_1", "second").await;

        let resp = dispatch(
            &state,
            "chat.messages",
            &serde_json::json!({"conversationId": conv}),
            Some(serde_json::json!(3)),
        )
        .await;
        let result = resp.result.unwrap();
        assert_eq!(result["totalCount"], 2);
        assert_eq!(result["messages"][0]["content"], "first");
        assert_eq!(result["messages"][1]["content"], "second");
    }

    #[tokio::test]
    async fn messages_unknown_conversation_not_found() {
        let state = setup();
        let resp = dispatch(
            &state,
            "chat.messages",
            &serde_json::json!({"conversationId": "conv_missing"}),
            Some(serde_json::json!(1)),
        )
        .await;
        assert_eq!(resp.error.as_ref().unwrap().code, "NOT_FOUND");
    }

    // ── Selection tests ──

    #[tokio::test]
    async fn select_and_active_roundtrip() {
        let state = setup();
        login(&state, "user_a", "Alex").await;
        let conv = send(&state, "user_b", "item_1", "hello").await;

        // Sending already selected the thread
        let resp = dispatch(&state, "chat.active", &serde_json::json!({}), None).await;
        assert_eq!(resp.result.unwrap()["conversation"]["id"], conv.as_str());

        // Clear, then re-select explicitly
        let resp = dispatch(&state, "chat.select", &serde_json::json!({}), None).await;
        assert!(resp.result.unwrap()["conversation"].is_null());

        let resp = dispatch(
            &state,
            "chat.setActiveConversation",
            &serde_json::json!({"conversationId": conv}),
            None,
        )
        .await;
        assert_eq!(resp.result.unwrap()["conversation"]["id"], conv.as_str());
    }

    #[tokio::test]
    async fn select_resolved_conversation_rejected() {
        let state = setup();
        login(&state, "user_a", "Alex").await;
        let conv = send(&state, "user_b", "item_1", "hello").await;

        dispatch(
            &state,
            "chat.markAsResolved",
            &serde_json::json!({"conversationId": conv}),
            None,
        )
        .await;

        let resp = dispatch(
            &state,
            "chat.select",
            &serde_json::json!({"conversationId": conv}),
            None,
        )
        .await;
        assert_eq!(resp.error.as_ref().unwrap().code, "VALIDATION_ERROR");
    }

    // ── Read state tests ──

    #[tokio::test]
    async fn mark_read_and_unread_count() {
        let state = setup();
        login(&state, "user_a", "Alex").await;
        let conv = send(&state, "user_b", "item_1", "hello").await;

        // The receiver's side of the counter
        let resp = dispatch(
            &state,
            "chat.unreadCount",
            &serde_json::json!({"userId": "user_b"}),
            None,
        )
        .await;
        assert_eq!(resp.result.unwrap()["unreadCount"], 1);

        // Receiver logs in and acknowledges
        login(&state, "user_b", "Blair").await;
        let resp = dispatch(
            &state,
            "chat.markRead",
            &serde_json::json!({"conversationId": conv}),
            None,
        )
        .await;
        assert_eq!(resp.result.unwrap()["markedRead"], 1);

        let resp = dispatch(&state, "chat.getUnreadCount", &serde_json::json!({}), None).await;
        assert_eq!(resp.result.unwrap()["unreadCount"], 0);
    }

    #[tokio::test]
    async fn unread_count_needs_user_or_binding() {
        let state = setup();
        let resp = dispatch(&state, "chat.unreadCount", &serde_json::json!({}), None).await;
        assert_eq!(resp.error.as_ref().unwrap().code, "AUTH_ERROR");
    }

    // ── System tests ──

    #[tokio::test]
    async fn health_check() {
        let state = setup();
        let resp = dispatch(&state, "health", &serde_json::json!({}), None).await;
        let result = resp.result.unwrap();
        assert_eq!(result["status"], "healthy");
        assert_eq!(result["components"]["database"], "ok");
    }

    #[tokio::test]
    async fn system_info() {
        let state = setup();
        let resp = dispatch(&state, "system.getInfo", &serde_json::json!({}), None).await;
        let result = resp.result.unwrap();
        assert_eq!(result["name"], "recoin");
        assert!(result["version"].is_string());
    }
}
