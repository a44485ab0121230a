use serde::{Deserialize, Serialize};

/// The closed whitelist of game types a tunnel may be opened for (§6.9).
/// Any value outside this set is rejected with the legal set listed back
/// to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameType {
    Minecraft,
    Terraria,
    DontStarveTogether,
    Starbound,
    Factorio,
    Valheim,
    Palworld,
}

impl GameType {
    /// All variants, in whitelist order — used to render the "legal set"
    /// error message and the `groups`/`tunnels` listings.
    pub const ALL: &'static [GameType] = &[
        GameType::Minecraft,
        GameType::Terraria,
        GameType::DontStarveTogether,
        GameType::Starbound,
        GameType::Factorio,
        GameType::Valheim,
        GameType::Palworld,
    ];

    /// Canonical lowercase wire/storage value, e.g. `"minecraft"`.
    pub fn canonical(self) -> &'static str {
        match self {
            GameType::Minecraft => "minecraft",
            GameType::Terraria => "terraria",
            GameType::DontStarveTogether => "dont_starve_together",
            GameType::Starbound => "starbound",
            GameType::Factorio => "factorio",
            GameType::Valheim => "valheim",
            GameType::Palworld => "palworld",
        }
    }

    /// Human-facing display name used in chat notifications.
    pub fn display_name(self) -> &'static str {
        match self {
            GameType::Minecraft => "Minecraft",
            GameType::Terraria => "Terraria",
            GameType::DontStarveTogether => "Don't Starve Together",
            GameType::Starbound => "Starbound",
            GameType::Factorio => "Factorio",
            GameType::Valheim => "Valheim",
            GameType::Palworld => "Palworld",
        }
    }

    /// A short, stable abbreviation used to build `proxyName` (§3:
    /// `ff-{id}-{4-char gameAbbrev}`).
    pub fn abbrev(self) -> &'static str {
        match self {
            GameType::Minecraft => "mine",
            GameType::Terraria => "terr",
            GameType::DontStarveTogether => "dst_",
            GameType::Starbound => "strb",
            GameType::Factorio => "fact",
            GameType::Valheim => "valh",
            GameType::Palworld => "palw",
        }
    }

    /// Case-insensitive alias resolution, e.g. `"mc"` or `"MC"` ->
    /// [`GameType::Minecraft`].
    pub fn resolve(input: &str) -> Option<GameType> {
        let lower = input.trim().to_ascii_lowercase();
        match lower.as_str() {
            "minecraft" | "mc" => Some(GameType::Minecraft),
            "terraria" | "tr" => Some(GameType::Terraria),
            "dont_starve_together" | "dst" => Some(GameType::DontStarveTogether),
            "starbound" => Some(GameType::Starbound),
            "factorio" => Some(GameType::Factorio),
            "valheim" => Some(GameType::Valheim),
            "palworld" => Some(GameType::Palworld),
            _ => None,
        }
    }

    /// Rendered for the "unknown game type" error message.
    pub fn legal_set_description() -> String {
        GameType::ALL
            .iter()
            .map(|g| g.canonical())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl std::fmt::Display for GameType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.canonical())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_canonical_and_alias_case_insensitively() {
        assert_eq!(GameType::resolve("minecraft"), Some(GameType::Minecraft));
        assert_eq!(GameType::resolve("MC"), Some(GameType::Minecraft));
        assert_eq!(GameType::resolve("Dst"), Some(GameType::DontStarveTogether));
    }

    #[test]
    fn rejects_unknown_game_type() {
        assert_eq!(GameType::resolve("skyrim"), None);
    }

    #[test]
    fn abbreviations_are_four_chars() {
        for g in GameType::ALL {
            assert_eq!(g.abbrev().len(), 4);
        }
    }
}
