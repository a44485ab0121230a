use std::{future::Future, pin::Pin, sync::Arc};

/// A boxed, `Send` future, the common return shape for injected callbacks.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A tunnel-lifecycle notification fired by the plugin handler or the MOTD
/// prober. Carries everything [`crate::notify::GroupNotification`] variants
/// need without requiring the callee to reach back into credential state.
#[derive(Debug, Clone)]
pub enum GroupNotification {
    TunnelConnected {
        group_id: String,
        tunnel_id: String,
        public_addr: String,
        remote_port: u16,
        user_name: String,
        display_game_name: String,
    },
    TunnelDisconnected {
        group_id: String,
        tunnel_id: String,
    },
    MotdSuccess {
        group_id: String,
        tunnel_id: String,
        motd: String,
        online: u32,
        max: u32,
        version: String,
    },
    MotdFailed {
        group_id: String,
        tunnel_id: String,
    },
}

/// Injected callback used to notify the bot transport of a tunnel-lifecycle
/// event without the caller (plugin handler, MOTD prober) depending on the
/// `bot` crate directly — see SPEC_FULL.md §9 / DESIGN.md's "plugin"/"motd"
/// entries for why this indirection exists.
pub type NotifyFn = Arc<dyn Fn(GroupNotification) -> BoxFuture<'static, ()> + Send + Sync>;

/// Injected callback used by the plugin handler to start a MOTD probe for a
/// newly activated Minecraft tunnel, again without a direct crate dependency.
pub type MotdStartFn = Arc<
    dyn Fn(MotdStartRequest) -> BoxFuture<'static, ()> + Send + Sync,
>;

/// Injected callback used by the plugin handler to cancel a tunnel's MOTD
/// probe on disconnect.
pub type MotdCancelFn = Arc<dyn Fn(String) -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct MotdStartRequest {
    pub tunnel_id: String,
    pub group_id: Option<String>,
    pub public_addr: String,
    pub remote_port: u16,
}
