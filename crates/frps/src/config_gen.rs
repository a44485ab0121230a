/// Every field the generated TOML needs (§6.3). Built by the caller from
/// `FireFrpConfig` plus the locally-known plugin callback address.
#[derive(Debug, Clone)]
pub struct FrpsConfigInput {
    pub bind_addr: String,
    pub bind_port: u16,
    pub auth_token: String,
    pub admin_addr: String,
    pub admin_port: u16,
    pub admin_user: String,
    pub admin_password: String,
    pub port_range_start: u16,
    pub port_range_end: u16,
    /// `127.0.0.1:<serverPort>` — where frps should call the plugin back.
    pub plugin_addr: String,
}

/// Escapes `value` for a TOML double-quoted string (§4.7): `\\`, `"`,
/// `\n`, `\r`, `\t`, applied in that order so a literal backslash in the
/// input is never re-escaped by a later rule (P8).
pub fn escape_toml_string(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            other => out.push(other),
        }
    }
    out
}

/// Renders the subprocess TOML document (§6.3). Plain string templating
/// rather than a `toml`/`toml_edit` document builder: the shape is fixed
/// and small, and hand-escaping every string through [`escape_toml_string`]
/// makes the round-trip property (P8) a direct function of this one
/// helper rather than of a serializer's own quoting rules.
pub fn render_frps_toml(input: &FrpsConfigInput) -> String {
    format!(
        r#"bindAddr = "{bind_addr}"
bindPort = {bind_port}

[auth]
method = "token"
token  = "{auth_token}"

[webServer]
addr     = "{admin_addr}"
port     = {admin_port}
user     = "{admin_user}"
password = "{admin_password}"

allowPorts = [{{ start = {port_start}, end = {port_end} }}]
maxPortsPerClient = 1

[[httpPlugins]]
name = "firefrp-manager"
addr = "{plugin_addr}"
path = "/frps-plugin/handler"
ops  = ["Login", "NewProxy", "CloseProxy", "Ping"]
"#,
        bind_addr = escape_toml_string(&input.bind_addr),
        bind_port = input.bind_port,
        auth_token = escape_toml_string(&input.auth_token),
        admin_addr = escape_toml_string(&input.admin_addr),
        admin_port = input.admin_port,
        admin_user = escape_toml_string(&input.admin_user),
        admin_password = escape_toml_string(&input.admin_password),
        port_start = input.port_range_start,
        port_end = input.port_range_end,
        plugin_addr = escape_toml_string(&input.plugin_addr),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(password: &str) -> FrpsConfigInput {
        FrpsConfigInput {
            bind_addr: "0.0.0.0".to_string(),
            bind_port: 7000,
            auth_token: "token".to_string(),
            admin_addr: "127.0.0.1".to_string(),
            admin_port: 7400,
            admin_user: "admin".to_string(),
            admin_password: password.to_string(),
            port_range_start: 20000,
            port_range_end: 29999,
            plugin_addr: "127.0.0.1:8080".to_string(),
        }
    }

    #[test]
    fn escapes_every_special_character() {
        let escaped = escape_toml_string("a\"b\\c\nd\re\tf");
        assert_eq!(escaped, "a\\\"b\\\\c\\nd\\re\\tf");
    }

    /// P8: round-trip a password containing every escaped character through
    /// the generated TOML and a real TOML parser.
    #[test]
    fn round_trips_special_characters_through_toml_parse() {
        let password = "p\"a\\s\ns\rw\to\"rd";
        let rendered = render_frps_toml(&sample(password));

        let parsed: toml::Value = rendered.parse().unwrap();
        let recovered = parsed
            .get("webServer")
            .and_then(|v| v.get("password"))
            .and_then(|v| v.as_str())
            .unwrap();
        assert_eq!(recovered, password);
    }

    #[test]
    fn renders_fixed_shape() {
        let rendered = render_frps_toml(&sample("secret"));
        assert!(rendered.contains("[[httpPlugins]]"));
        assert!(rendered.contains("ops  = [\"Login\", \"NewProxy\", \"CloseProxy\", \"Ping\"]"));
        assert!(rendered.contains("maxPortsPerClient = 1"));
    }
}
