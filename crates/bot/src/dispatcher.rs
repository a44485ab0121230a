//! Chat command pipeline (§4.11): finds the bot's own `@mention`, resolves
//! a locale-aware command alias, enforces ACL/quota rules, and dispatches
//! to the matching handler.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use firefrp_common::{now_ms, GameType};
use firefrp_config::UpdateChannel;
use firefrp_core::{CreateCredentialRequest, CredentialService};
use firefrp_frps::{AdminClient, FrpsSupervisor};
use firefrp_store::{Credential, CredentialStatus};
use firefrp_update::UpdateService;
use tracing::{info, warn};

use crate::frame::EventFrame;
use crate::transport::{BotTransport, EventHandlerFn};

/// Per-user non-terminal credential cap (P9).
const USER_CREDENTIAL_CAP: usize = 3;
/// Per-group successful-`open` rate cap (P10).
const GROUP_OPEN_RATE_CAP: usize = 10;
const GROUP_OPEN_RATE_WINDOW_MS: i64 = 60 * 60 * 1000;

pub struct BotDispatcherConfig {
    pub current_version: String,
    pub install_root: PathBuf,
    pub data_dir: PathBuf,
}

/// Owns nothing the credential state machine doesn't already expose;
/// everything here is ACL/quota bookkeeping and reply formatting on top of
/// [`CredentialService`]'s public API.
pub struct BotDispatcher {
    transport: Arc<BotTransport>,
    credentials: Arc<CredentialService>,
    supervisor: Arc<FrpsSupervisor>,
    admin_client: AdminClient,
    updates: UpdateService,
    config: BotDispatcherConfig,
    group_open_log: DashMap<String, Vec<i64>>,
}

impl BotDispatcher {
    pub fn new(
        transport: Arc<BotTransport>,
        credentials: Arc<CredentialService>,
        supervisor: Arc<FrpsSupervisor>,
        admin_client: AdminClient,
        updates: UpdateService,
        config: BotDispatcherConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            transport,
            credentials,
            supervisor,
            admin_client,
            updates,
            config,
            group_open_log: DashMap::new(),
        })
    }

    /// Adapts this dispatcher into the [`EventHandlerFn`] shape
    /// `BotTransport` invokes for every inbound event.
    pub fn as_event_handler(self: &Arc<Self>) -> EventHandlerFn {
        let this = Arc::clone(self);
        Arc::new(move |event: EventFrame| {
            let this = Arc::clone(&this);
            Box::pin(async move { this.handle_event(event).await })
        })
    }

    async fn handle_event(&self, event: EventFrame) {
        if event.post_type != "message" {
            return;
        }
        if event.message_type.as_deref() != Some("group") {
            return;
        }
        let Some(group_id) = event.group_id.clone() else { return };
        let Some(user_id) = event.user_id.clone() else { return };

        let self_id = match event.self_id.clone() {
            Some(id) => {
                if self.transport.configured_self_id().await.is_none() {
                    self.transport.set_self_id(id.clone()).await;
                }
                id
            },
            None => match self.transport.configured_self_id().await {
                Some(id) => id,
                None => return,
            },
        };

        if !self.credentials.is_group_allowed(&group_id).await {
            return;
        }

        let Some(body) = extract_command_body(&event, &self_id) else { return };
        let body = body.trim();

        let is_admin = self.credentials.admin_users().await.iter().any(|u| u == &user_id);

        if body.is_empty() {
            let reply = self.help_text(is_admin).await;
            self.reply(&group_id, &user_id, &reply).await;
            return;
        }

        let mut tokens = body.split_whitespace();
        let Some(raw_command) = tokens.next() else {
            return;
        };
        let args: Vec<&str> = tokens.collect();

        let Some((canonical, admin_required)) = resolve_command(raw_command) else {
            self.reply(&group_id, &user_id, "unrecognised command; send with no text for help").await;
            return;
        };

        if admin_required && !is_admin {
            self.reply(&group_id, &user_id, "this command is restricted to administrators").await;
            return;
        }

        let reply = self.dispatch(canonical, &group_id, &user_id, &event, &args).await;
        self.reply(&group_id, &user_id, &reply).await;
    }

    async fn dispatch(
        &self,
        canonical: &str,
        group_id: &str,
        user_id: &str,
        event: &EventFrame,
        args: &[&str],
    ) -> String {
        match canonical {
            "open" => self.cmd_open(group_id, user_id, event, args).await,
            "status" => self.cmd_status(user_id).await,
            "list" => self.cmd_list(group_id).await,
            "help" => {
                let is_admin = self.credentials.admin_users().await.iter().any(|u| u == user_id);
                self.help_text(is_admin).await
            },
            "tunnels" => self.cmd_tunnels().await,
            "kick" => self.cmd_kick(args).await,
            "groups" => self.cmd_groups().await,
            "addgroup" => self.cmd_addgroup(args).await,
            "rmgroup" => self.cmd_rmgroup(args).await,
            "server" => self.cmd_server().await,
            "update" => self.cmd_update(group_id).await,
            "channel" => self.cmd_channel(args).await,
            _ => "unrecognised command".to_string(),
        }
    }

    async fn cmd_open(&self, group_id: &str, user_id: &str, event: &EventFrame, args: &[&str]) -> String {
        let game_type = match args.first() {
            Some(raw) => match GameType::resolve(raw) {
                Some(g) => g,
                None => {
                    return format!(
                        "unknown game type '{raw}'; must be one of: {}",
                        GameType::legal_set_description()
                    )
                },
            },
            None => GameType::Minecraft,
        };

        let config = self.credentials.config_snapshot().await;
        let default_ttl = config.key_ttl_minutes;
        let ttl_minutes = match args.get(1) {
            Some(raw) => match raw.parse::<u32>() {
                Ok(v) => v.clamp(5, default_ttl.max(5)),
                Err(_) => return "ttlMinutes must be a positive integer".to_string(),
            },
            None => default_ttl,
        };

        if self.credentials.count_non_terminal_for_user(user_id).await >= USER_CREDENTIAL_CAP {
            return format!("you already have {USER_CREDENTIAL_CAP} active/pending tunnels; close one before opening another");
        }

        if self.group_open_rate_limited(group_id) {
            return "this group has hit its hourly tunnel-open rate limit; try again later".to_string();
        }

        let user_name = event.sender.display_name().map(str::to_string).unwrap_or_else(|| user_id.to_string());
        let request = CreateCredentialRequest {
            user_id: user_id.to_string(),
            user_name,
            group_id: Some(group_id.to_string()),
            game_type,
            ttl_minutes,
        };

        match self.credentials.create(request).await {
            Ok(cred) => {
                self.record_group_open_success(group_id);
                format!(
                    "tunnel opened: id={} key={} remotePort={} expiresAt={}",
                    cred.tunnel_id, cred.key, cred.remote_port, cred.expires_at
                )
            },
            Err(e) => {
                warn!(error = %e, "failed to open tunnel");
                format!("could not open a tunnel right now: {e}")
            },
        }
    }

    /// Checks the group's hourly open cap (P10) without recording anything.
    /// Expired timestamps are pruned as a side effect so the log doesn't
    /// grow unbounded, but no new entry is added here — only a caller that
    /// goes on to succeed should treat this as "one more open used".
    fn group_open_rate_limited(&self, group_id: &str) -> bool {
        let now = now_ms();
        let mut entry = self.group_open_log.entry(group_id.to_string()).or_default();
        entry.retain(|&ts| now - ts < GROUP_OPEN_RATE_WINDOW_MS);
        entry.len() >= GROUP_OPEN_RATE_CAP
    }

    /// Records a successful open against the group's hourly budget (P10).
    /// Call only after `create` has returned `Ok`; a failed open must not
    /// consume the group's budget.
    fn record_group_open_success(&self, group_id: &str) {
        let now = now_ms();
        let mut entry = self.group_open_log.entry(group_id.to_string()).or_default();
        entry.retain(|&ts| now - ts < GROUP_OPEN_RATE_WINDOW_MS);
        entry.push(now);
    }

    async fn cmd_status(&self, user_id: &str) -> String {
        let creds = self.credentials.get_active_by_user(user_id).await;
        if creds.is_empty() {
            return "you have no active or pending tunnels".to_string();
        }
        let now = now_ms();
        let lines: Vec<String> = creds.iter().map(|c| format_credential_line(c, now)).collect();
        lines.join("\n")
    }

    async fn cmd_list(&self, group_id: &str) -> String {
        let creds = self.credentials.get_active_by_group(group_id).await;
        if creds.is_empty() {
            return "this group has no active or pending tunnels".to_string();
        }

        let config = self.credentials.config_snapshot().await;
        let host = config.server.public_addr.clone();
        let now = now_ms();

        let mut lines = Vec::with_capacity(creds.len());
        for cred in &creds {
            let mut line = format_credential_line(cred, now);
            if cred.status == CredentialStatus::Active && cred.game_type == GameType::Minecraft && !host.is_empty() {
                match firefrp_motd::probe_once(&host, cred.remote_port).await {
                    Ok(status) => {
                        line.push_str(&format!(
                            " — {} ({}/{} online, {})",
                            status.motd, status.online, status.max, status.version
                        ));
                    },
                    Err(_) => line.push_str(" — (offline or unreachable)"),
                }
            }
            lines.push(line);
        }
        lines.join("\n")
    }

    async fn cmd_tunnels(&self) -> String {
        let creds = self.credentials.get_all_active().await;
        if creds.is_empty() {
            return "no active or pending tunnels".to_string();
        }
        let now = now_ms();
        creds.iter().map(|c| format_credential_line(c, now)).collect::<Vec<_>>().join("\n")
    }

    async fn cmd_kick(&self, args: &[&str]) -> String {
        let Some(tunnel_id) = args.first() else {
            return "usage: kick <tunnelId>".to_string();
        };
        let Some(cred) = self.credentials.get_by_tunnel_id(tunnel_id).await else {
            return format!("no such tunnel: {tunnel_id}");
        };
        match self.credentials.revoke(cred.id).await {
            Ok(_) => format!("tunnel {tunnel_id} revoked"),
            Err(e) => format!("failed to revoke {tunnel_id}: {e}"),
        }
    }

    async fn cmd_groups(&self) -> String {
        let groups = self.credentials.allowed_groups().await;
        if groups.is_empty() {
            "allowedGroups is empty — every group is currently allowed".to_string()
        } else {
            format!("allowed groups: {}", groups.join(", "))
        }
    }

    async fn cmd_addgroup(&self, args: &[&str]) -> String {
        let Some(group) = args.first() else {
            return "usage: addgroup <groupId>".to_string();
        };
        match self.credentials.add_allowed_group((*group).to_string()).await {
            Ok(true) => format!("added {group} to allowedGroups"),
            Ok(false) => format!("{group} was already allowed"),
            Err(e) => format!("failed to persist config: {e}"),
        }
    }

    async fn cmd_rmgroup(&self, args: &[&str]) -> String {
        let Some(group) = args.first() else {
            return "usage: rmgroup <groupId>".to_string();
        };
        match self.credentials.remove_allowed_group(group).await {
            Ok(true) => format!("removed {group} from allowedGroups"),
            Ok(false) => format!("{group} was not in allowedGroups"),
            Err(e) => format!("failed to persist config: {e}"),
        }
    }

    async fn cmd_server(&self) -> String {
        let status = self.supervisor.status().await;
        let mut lines = vec![format!(
            "frps: state={:?} version={} restarts={}",
            status.state, status.version, status.restart_count
        )];
        match self.admin_client.server_info().await {
            Ok(info) => lines.push(format!("admin: version={} bindPort={}", info.version, info.bind_port)),
            Err(e) => lines.push(format!("admin API unavailable: {e}")),
        }
        match self.admin_client.list_tcp_proxies().await {
            Ok(proxies) => lines.push(format!("active proxies: {}", proxies.len())),
            Err(_) => lines.push("active proxies: unknown".to_string()),
        }
        lines.join("\n")
    }

    async fn cmd_update(&self, group_id: &str) -> String {
        let channel = self.credentials.update_channel().await;
        self.transport.send_group_notice(group_id, "checking for updates...").await.ok();

        let release = match self.updates.check(channel, &self.config.current_version).await {
            Ok(Some(release)) => release,
            Ok(None) => return "already up to date".to_string(),
            Err(e) => return format!("update check failed: {e}"),
        };

        self.transport
            .send_group_notice(group_id, &format!("downloading {}...", release.tag_name))
            .await
            .ok();

        match self.updates.apply(&release, &self.config.install_root, &self.config.data_dir).await {
            Ok(()) => {
                self.transport.send_group_notice(group_id, "update staged, restarting now").await.ok();
                info!(version = %release.tag_name, "exiting for update");
                std::process::exit(0);
            },
            Err(e) => format!("update failed: {e}"),
        }
    }

    async fn cmd_channel(&self, args: &[&str]) -> String {
        match args.first() {
            None => format!("update channel: {}", self.credentials.update_channel().await),
            Some(raw) => match raw.parse::<UpdateChannel>() {
                Ok(channel) => match self.credentials.set_update_channel(channel).await {
                    Ok(()) => format!("update channel set to {channel}"),
                    Err(e) => format!("failed to persist config: {e}"),
                },
                Err(()) => "channel must be one of: auto, dev, stable".to_string(),
            },
        }
    }

    async fn help_text(&self, is_admin: bool) -> String {
        let mut lines = vec![
            "open [gameType] [ttlMinutes] — open a tunnel".to_string(),
            "status — list your tunnels".to_string(),
            "list — list this group's tunnels".to_string(),
            "help — show this message".to_string(),
        ];
        if is_admin {
            lines.push("tunnels — list every tunnel".to_string());
            lines.push("kick <tunnelId> — revoke a tunnel".to_string());
            lines.push("groups / addgroup <id> / rmgroup <id> — manage allowed groups".to_string());
            lines.push("server — show frps status".to_string());
            lines.push("update — check for and apply an update".to_string());
            lines.push("channel [auto|dev|stable] — show or set the update channel".to_string());
        }
        lines.join("\n")
    }

    async fn reply(&self, group_id: &str, user_id: &str, body: &str) {
        let header = self.reply_header().await;
        let text = format!("{header}\n{body}");
        if let Err(e) = self.transport.send_group_message(group_id, user_id, &text).await {
            warn!(error = %e, "failed to send reply");
        }
    }

    async fn reply_header(&self) -> String {
        let config = self.credentials.config_snapshot().await;
        format!("{} v{}", config.server.name, self.config.current_version)
    }
}

fn format_credential_line(cred: &Credential, now: i64) -> String {
    let remaining_minutes = ((cred.expires_at - now).max(0)) / 60_000;
    format!(
        "{} [{}] {} port={} remaining={}m",
        cred.tunnel_id,
        status_label(cred.status),
        cred.game_type,
        cred.remote_port,
        remaining_minutes
    )
}

fn status_label(status: CredentialStatus) -> &'static str {
    match status {
        CredentialStatus::Pending => "pending",
        CredentialStatus::Active => "active",
        CredentialStatus::Expired => "expired",
        CredentialStatus::Revoked => "revoked",
        CredentialStatus::Disconnected => "disconnected",
    }
}

/// Finds the first `at` segment targeting `self_id`, then joins every
/// subsequent `text` segment as the command body (§4.11 step 1).
fn extract_command_body(event: &EventFrame, self_id: &str) -> Option<String> {
    let mut found_self_mention = false;
    let mut parts: Vec<&str> = Vec::new();
    for segment in &event.message {
        if !found_self_mention {
            if segment.as_at() == Some(self_id) {
                found_self_mention = true;
            }
            continue;
        }
        if let Some(text) = segment.as_text() {
            parts.push(text);
        }
    }
    if !found_self_mention {
        return None;
    }
    Some(parts.concat())
}

/// Canonical command name and whether it requires `adminUsers` membership,
/// including the locale-specific aliases from §4.11's table.
fn resolve_command(token: &str) -> Option<(&'static str, bool)> {
    let lower = token.to_ascii_lowercase();
    let aliases: HashMap<&'static str, (&'static str, bool)> = command_aliases();
    aliases.get(lower.as_str()).copied().or_else(|| aliases.get(token).copied())
}

fn command_aliases() -> HashMap<&'static str, (&'static str, bool)> {
    HashMap::from([
        ("open", ("open", false)),
        ("开服", ("open", false)),
        ("status", ("status", false)),
        ("状态", ("status", false)),
        ("list", ("list", false)),
        ("列表", ("list", false)),
        ("help", ("help", false)),
        ("帮助", ("help", false)),
        ("tunnels", ("tunnels", true)),
        ("隧道列表", ("tunnels", true)),
        ("kick", ("kick", true)),
        ("踢掉", ("kick", true)),
        ("groups", ("groups", true)),
        ("群列表", ("groups", true)),
        ("addgroup", ("addgroup", true)),
        ("加群", ("addgroup", true)),
        ("rmgroup", ("rmgroup", true)),
        ("移群", ("rmgroup", true)),
        ("server", ("server", true)),
        ("服务器", ("server", true)),
        ("update", ("update", true)),
        ("更新", ("update", true)),
        ("channel", ("channel", true)),
        ("通道", ("channel", true)),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::MessageSegment;

    fn event_with(message: Vec<MessageSegment>) -> EventFrame {
        EventFrame {
            post_type: "message".to_string(),
            message_type: Some("group".to_string()),
            self_id: Some("1".to_string()),
            user_id: Some("2".to_string()),
            group_id: Some("3".to_string()),
            sender: crate::frame::Sender::default(),
            message,
        }
    }

    #[test]
    fn extract_command_body_joins_text_after_self_mention() {
        let event = event_with(vec![
            MessageSegment::at("1"),
            MessageSegment::text(" open"),
            MessageSegment::text(" minecraft"),
        ]);
        assert_eq!(extract_command_body(&event, "1"), Some(" open minecraft".to_string()));
    }

    #[test]
    fn extract_command_body_none_without_self_mention() {
        let event = event_with(vec![MessageSegment::text("hello")]);
        assert_eq!(extract_command_body(&event, "1"), None);
    }

    #[test]
    fn resolve_command_matches_canonical_and_chinese_alias() {
        assert_eq!(resolve_command("open"), Some(("open", false)));
        assert_eq!(resolve_command("开服"), Some(("open", false)));
        assert_eq!(resolve_command("KICK"), Some(("kick", true)));
        assert_eq!(resolve_command("nonsense"), None);
    }

    #[test]
    fn format_credential_line_never_goes_negative_on_remaining_time() {
        let cred = Credential {
            id: 1,
            tunnel_id: "T-1".to_string(),
            key: "ff-key".to_string(),
            user_id: "u1".to_string(),
            user_name: "Alice".to_string(),
            group_id: None,
            game_type: GameType::Minecraft,
            status: CredentialStatus::Active,
            remote_port: 20000,
            proxy_name: "ff-1-mine".to_string(),
            client_id: None,
            created_at: 0,
            activated_at: Some(0),
            expires_at: 0,
            updated_at: 0,
        };
        let line = format_credential_line(&cred, 10_000);
        assert!(line.contains("remaining=0m"));
    }
}
