//! Gamelog line parser.
//!
//! Input is newline-delimited DXX gamelog text; output is an ordered event
//! list plus a running per-player summary. Parsing is line-oriented and
//! regex-driven; every pattern matches a whole line, case-insensitively,
//! after whitespace trimming. Lines matching no pattern are retained only for
//! diagnostics.
//!
//! The game writes the local player as "You"/"Yourself". Those tokens are
//! rewritten to the bound identity at parse time, so that streams uploaded by
//! different players merge on equal participant names.
//!
//! The parser is restartable: only complete lines are consumed, the byte
//! count of consumed input is reported, and no state is kept between calls.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use thiserror::Error;

/// `'name' is joining the game.`
static RE_JOIN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^'(?P<name>[^']+)' is joining the game\.?$").unwrap());

/// `victim was killed by killer [with weapon]` — checked before the plain
/// kill pattern, which would otherwise split this line at the wrong spot.
static RE_KILLED_BY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?P<victim>.+?) (?:was|were) killed by (?P<killer>.+?)(?: with (?P<weapon>.+?))?[.!]?$")
        .unwrap()
});

/// `killer killed victim with weapon`
static RE_KILL_WEAPON: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?P<killer>.+?) killed (?P<victim>.+?) with (?P<weapon>.+?)[.!]?$").unwrap()
});

/// `killer killed victim`
static RE_KILL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(?P<killer>.+?) killed (?P<victim>.+?)[.!]?$").unwrap());

/// `player died` / `player was destroyed`
static RE_DIED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(?P<player>.+?) (?:died|was destroyed)[.!]?$").unwrap());

/// `player has left the game`
static RE_QUIT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?P<player>.+?) (?:has left the game|is leaving the game)\.?$").unwrap()
});

/// `Reactor destroyed!` / `The control center has been destroyed`
static RE_REACTOR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:the )?(?:reactor|control center) (?:has been )?destroyed[.!]?$").unwrap()
});

/// `player has escaped [through the exit tunnel]`
static RE_ESCAPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?P<player>.+?) has escaped(?: through the exit tunnel)?[.!]?$").unwrap()
});

/// `player captured the flag`
static RE_FLAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?P<player>.+?) (?:has )?captured the flag[.!]?$").unwrap()
});

/// `player reached the kill goal`
static RE_KILLGOAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?P<player>.+?) (?:has )?reached the kill goal[.!]?$").unwrap()
});

/// `sender: text` — last resort before Unknown. Callsigns are short and
/// colon-free, so the sender field is kept tight.
static RE_CHAT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?P<sender>\S[^:]{0,15}): (?P<text>.+)$").unwrap());

/// Detects "You ..." action lines for identity inference.
static RE_YOU_ACTION: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^you(?:rself)?\b").unwrap());

/// Parse failures; partial events are never returned alongside one.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    /// The upload contains NUL bytes; it is not gamelog text.
    #[error("gamelog content contains binary data")]
    BinaryContent,
}

/// One parsed gamelog event. Participant names are post-rewrite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LogEvent {
    /// Kill with distinct killer and victim.
    Kill {
        /// Killer name.
        killer: String,
        /// Victim name.
        victim: String,
        /// Weapon display name, when the line named one.
        weapon: Option<String>,
    },
    /// Self-kill.
    Suicide {
        /// Player name.
        player: String,
        /// Weapon display name, when the line named one.
        weapon: Option<String>,
    },
    /// Death without a credited killer.
    Death {
        /// Player name.
        player: String,
    },
    /// Chat line.
    Chat {
        /// Sender name.
        sender: String,
        /// Message text.
        text: String,
    },
    /// Player joined.
    Join {
        /// Player name.
        player: String,
    },
    /// Player left.
    Quit {
        /// Player name.
        player: String,
    },
    /// Reactor destroyed.
    ReactorDestroyed,
    /// Player escaped the mine.
    Escape {
        /// Player name.
        player: String,
    },
    /// CTF flag capture.
    FlagCaptured {
        /// Player name.
        player: String,
    },
    /// Kill goal reached.
    KillGoal {
        /// Player name.
        player: String,
    },
}

/// Output of one parse call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParseOutput {
    /// Events in line order.
    pub events: Vec<LogEvent>,
    /// Lines no pattern matched, for diagnostics only.
    pub unknown: Vec<String>,
    /// Bytes of input consumed; anything past this is an incomplete final
    /// line the caller should re-submit with the next chunk.
    pub consumed: usize,
    /// Identity inferred from the stream when none was bound.
    pub inferred_identity: Option<String>,
}

/// Numeric tallies for one player name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerLogStats {
    /// Kills of other players.
    pub kills: u32,
    /// Deaths from any cause.
    pub deaths: u32,
    /// Self-kills.
    pub suicides: u32,
    /// Current kill streak.
    pub kill_streak: u32,
    /// Best kill streak.
    pub max_kill_streak: u32,
    /// Kills per weapon name.
    pub weapons: BTreeMap<String, u32>,
    /// Kills per victim name.
    pub victims: BTreeMap<String, u32>,
    /// Deaths per killer name.
    pub killers: BTreeMap<String, u32>,
}

/// Per-player summary over a parsed event list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogSummary {
    /// The identity "You" was rewritten to, when known.
    pub identity: Option<String>,
    /// Set when the identity was inferred from the stream rather than bound
    /// by the caller.
    pub identity_provisional: bool,
    /// Tallies per player name.
    pub players: BTreeMap<String, PlayerLogStats>,
}

/// Parse complete lines of `input`. With no bound identity the parser tries
/// to infer one: a single `'name' is joining the game.` line plus at least
/// one "You ..." action line binds that name provisionally.
pub fn parse_gamelog(input: &str, identity: Option<&str>) -> Result<ParseOutput, ParseError> {
    if input.contains('\0') {
        return Err(ParseError::BinaryContent);
    }

    let consumed = input.rfind('\n').map(|i| i + 1).unwrap_or(0);
    let complete = &input[..consumed];

    let inferred = if identity.is_none() { infer_identity(complete) } else { None };
    let bound = identity.map(str::to_string).or_else(|| inferred.clone());

    let mut out = ParseOutput { consumed, inferred_identity: inferred, ..Default::default() };
    for line in complete.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match parse_line(line, bound.as_deref()) {
            Some(event) => out.events.push(event),
            None => out.unknown.push(line.to_string()),
        }
    }
    Ok(out)
}

/// Tally a parsed event list. `identity`/`provisional` flow into the summary
/// unchanged.
pub fn summarize(events: &[LogEvent], identity: Option<&str>, provisional: bool) -> LogSummary {
    let mut summary = LogSummary {
        identity: identity.map(str::to_string),
        identity_provisional: provisional,
        ..Default::default()
    };
    for event in events {
        match event {
            LogEvent::Kill { killer, victim, weapon } => {
                {
                    let k = summary.players.entry(killer.clone()).or_default();
                    k.kills += 1;
                    k.kill_streak += 1;
                    k.max_kill_streak = k.max_kill_streak.max(k.kill_streak);
                    *k.victims.entry(victim.clone()).or_default() += 1;
                    if let Some(weapon) = weapon {
                        *k.weapons.entry(weapon.clone()).or_default() += 1;
                    }
                }
                let v = summary.players.entry(victim.clone()).or_default();
                v.deaths += 1;
                v.kill_streak = 0;
                *v.killers.entry(killer.clone()).or_default() += 1;
            }
            LogEvent::Suicide { player, .. } => {
                let p = summary.players.entry(player.clone()).or_default();
                p.suicides += 1;
                p.deaths += 1;
                p.kill_streak = 0;
            }
            LogEvent::Death { player } => {
                let p = summary.players.entry(player.clone()).or_default();
                p.deaths += 1;
                p.kill_streak = 0;
            }
            _ => {}
        }
    }
    summary
}

fn infer_identity(text: &str) -> Option<String> {
    let mut join_name: Option<String> = None;
    let mut you_seen = false;
    for line in text.lines() {
        let line = line.trim();
        if let Some(caps) = RE_JOIN.captures(line) {
            let name = caps["name"].to_string();
            match &join_name {
                Some(existing) if *existing != name => return None,
                _ => join_name = Some(name),
            }
        } else if RE_YOU_ACTION.is_match(line) {
            you_seen = true;
        }
    }
    if you_seen {
        join_name
    } else {
        None
    }
}

/// Rewrite the "You"/"Yourself" tokens to the bound identity; other names
/// pass through.
fn resolve<'a>(name: &'a str, identity: Option<&'a str>) -> &'a str {
    if name.eq_ignore_ascii_case("you") || name.eq_ignore_ascii_case("yourself") {
        identity.unwrap_or(name)
    } else {
        name
    }
}

fn is_self_token(name: &str) -> bool {
    matches!(
        name.to_ascii_lowercase().as_str(),
        "yourself" | "himself" | "herself" | "themselves"
    )
}

fn parse_line(line: &str, identity: Option<&str>) -> Option<LogEvent> {
    if let Some(caps) = RE_JOIN.captures(line) {
        return Some(LogEvent::Join { player: caps["name"].to_string() });
    }
    if RE_REACTOR.is_match(line) {
        return Some(LogEvent::ReactorDestroyed);
    }
    if let Some(caps) = RE_KILLED_BY.captures(line) {
        return Some(kill_event(
            &caps["killer"],
            &caps["victim"],
            caps.name("weapon").map(|m| m.as_str()),
            identity,
        ));
    }
    if let Some(caps) = RE_KILL_WEAPON.captures(line) {
        return Some(kill_event(&caps["killer"], &caps["victim"], Some(&caps["weapon"]), identity));
    }
    if let Some(caps) = RE_KILL.captures(line) {
        return Some(kill_event(&caps["killer"], &caps["victim"], None, identity));
    }
    if let Some(caps) = RE_DIED.captures(line) {
        return Some(LogEvent::Death { player: resolve(&caps["player"], identity).to_string() });
    }
    if let Some(caps) = RE_QUIT.captures(line) {
        return Some(LogEvent::Quit { player: resolve(&caps["player"], identity).to_string() });
    }
    if let Some(caps) = RE_ESCAPE.captures(line) {
        return Some(LogEvent::Escape { player: resolve(&caps["player"], identity).to_string() });
    }
    if let Some(caps) = RE_FLAG.captures(line) {
        return Some(LogEvent::FlagCaptured {
            player: resolve(&caps["player"], identity).to_string(),
        });
    }
    if let Some(caps) = RE_KILLGOAL.captures(line) {
        return Some(LogEvent::KillGoal { player: resolve(&caps["player"], identity).to_string() });
    }
    if let Some(caps) = RE_CHAT.captures(line) {
        return Some(LogEvent::Chat {
            sender: resolve(&caps["sender"], identity).to_string(),
            text: caps["text"].to_string(),
        });
    }
    None
}

fn kill_event(
    killer: &str,
    victim: &str,
    weapon: Option<&str>,
    identity: Option<&str>,
) -> LogEvent {
    let weapon = weapon.map(str::to_string);
    let killer = resolve(killer, identity).to_string();
    if is_self_token(victim) {
        return LogEvent::Suicide { player: killer, weapon };
    }
    let victim = resolve(victim, identity).to_string();
    if killer.eq_ignore_ascii_case(&victim) {
        LogEvent::Suicide { player: killer, weapon }
    } else {
        LogEvent::Kill { killer, victim, weapon }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kill_with_weapon() {
        let out = parse_gamelog("alice killed bob with Plasma Cannon.\n", None).unwrap();
        assert_eq!(
            out.events,
            vec![LogEvent::Kill {
                killer: "alice".to_string(),
                victim: "bob".to_string(),
                weapon: Some("Plasma Cannon".to_string()),
            }]
        );
        assert!(out.unknown.is_empty());
    }

    #[test]
    fn test_you_rewritten_to_identity() {
        let out = parse_gamelog("You killed bob with Plasma Cannon\n", Some("alice")).unwrap();
        assert_eq!(
            out.events,
            vec![LogEvent::Kill {
                killer: "alice".to_string(),
                victim: "bob".to_string(),
                weapon: Some("Plasma Cannon".to_string()),
            }]
        );
    }

    #[test]
    fn test_you_were_killed_by() {
        let out = parse_gamelog("You were killed by bob with Fusion Cannon!\n", Some("alice")).unwrap();
        assert_eq!(
            out.events,
            vec![LogEvent::Kill {
                killer: "bob".to_string(),
                victim: "alice".to_string(),
                weapon: Some("Fusion Cannon".to_string()),
            }]
        );
    }

    #[test]
    fn test_suicide_forms() {
        let out = parse_gamelog(
            "You killed yourself!\nbob killed himself with Proximity Bomb.\n",
            Some("alice"),
        )
        .unwrap();
        assert_eq!(
            out.events,
            vec![
                LogEvent::Suicide { player: "alice".to_string(), weapon: None },
                LogEvent::Suicide {
                    player: "bob".to_string(),
                    weapon: Some("Proximity Bomb".to_string()),
                },
            ]
        );
    }

    #[test]
    fn test_case_insensitive_matching() {
        let out = parse_gamelog("ALICE KILLED BOB WITH LASER\n", None).unwrap();
        assert_eq!(out.events.len(), 1);
        assert!(matches!(&out.events[0], LogEvent::Kill { weapon: Some(w), .. } if w == "LASER"));
    }

    #[test]
    fn test_join_quit_reactor_escape() {
        let text = "'alice' is joining the game.\n\
                    Reactor destroyed!\n\
                    bob has left the game\n\
                    alice has escaped through the exit tunnel\n";
        let out = parse_gamelog(text, Some("alice")).unwrap();
        assert_eq!(
            out.events,
            vec![
                LogEvent::Join { player: "alice".to_string() },
                LogEvent::ReactorDestroyed,
                LogEvent::Quit { player: "bob".to_string() },
                LogEvent::Escape { player: "alice".to_string() },
            ]
        );
    }

    #[test]
    fn test_chat_and_unknown() {
        let out = parse_gamelog("bob: good game\nsome nonsense line here\n", None).unwrap();
        assert_eq!(
            out.events,
            vec![LogEvent::Chat { sender: "bob".to_string(), text: "good game".to_string() }]
        );
        assert_eq!(out.unknown, vec!["some nonsense line here".to_string()]);
    }

    #[test]
    fn test_incomplete_final_line_not_consumed() {
        let text = "alice killed bob\nbob killed al";
        let out = parse_gamelog(text, None).unwrap();
        assert_eq!(out.events.len(), 1);
        assert_eq!(out.consumed, "alice killed bob\n".len());
        // Re-submitting the tail plus its completion parses the rest.
        let rest = format!("{}{}", &text[out.consumed..], "ice\n");
        let out2 = parse_gamelog(&rest, None).unwrap();
        assert_eq!(out2.events.len(), 1);
    }

    #[test]
    fn test_identity_inference() {
        let text = "'alice' is joining the game.\nYou killed bob with Laser\n";
        let out = parse_gamelog(text, None).unwrap();
        assert_eq!(out.inferred_identity.as_deref(), Some("alice"));
        assert!(matches!(&out.events[1], LogEvent::Kill { killer, .. } if killer == "alice"));
    }

    #[test]
    fn test_identity_not_inferred_with_two_joins() {
        let text = "'alice' is joining the game.\n\
                    'bob' is joining the game.\n\
                    You killed bob with Laser\n";
        let out = parse_gamelog(text, None).unwrap();
        assert_eq!(out.inferred_identity, None);
        // Without an identity the token stays literal.
        assert!(matches!(&out.events[2], LogEvent::Kill { killer, .. } if killer == "You"));
    }

    #[test]
    fn test_binary_content_rejected() {
        assert_eq!(parse_gamelog("abc\0def\n", None), Err(ParseError::BinaryContent));
    }

    #[test]
    fn test_summary_stats() {
        let text = "alice killed bob with Laser\n\
                    alice killed bob with Plasma Cannon\n\
                    bob killed alice with Fusion Cannon\n\
                    alice killed herself\n";
        let out = parse_gamelog(text, None).unwrap();
        let summary = summarize(&out.events, None, false);

        let alice = &summary.players["alice"];
        assert_eq!(alice.kills, 2);
        assert_eq!(alice.deaths, 2); // one kill by bob, one suicide
        assert_eq!(alice.suicides, 1);
        assert_eq!(alice.max_kill_streak, 2);
        assert_eq!(alice.kill_streak, 0);
        assert_eq!(alice.weapons["Laser"], 1);
        assert_eq!(alice.victims["bob"], 2);

        let bob = &summary.players["bob"];
        assert_eq!(bob.kills, 1);
        assert_eq!(bob.deaths, 2);
        assert_eq!(bob.killers["alice"], 2);
    }

    #[test]
    fn test_restartable_no_state() {
        let text = "alice killed bob\n";
        let a = parse_gamelog(text, None).unwrap();
        let b = parse_gamelog(text, None).unwrap();
        assert_eq!(a, b);
    }
}
