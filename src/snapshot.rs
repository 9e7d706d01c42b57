//! The invocation snapshot: a serializable projection of the triggering
//! message and its surroundings, bound into every script's outermost scope.
//!
//! The snapshot is data the command dispatcher already had in hand when it
//! decided to run the script. Anything *not* in here (other members, role
//! rosters, old messages) is fetched lazily through the bridge.

use serde::{Deserialize, Serialize};

/// Everything a script knows about its trigger without asking the platform.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InvocationSnapshot {
    /// The message that invoked the command.
    pub message: MessageSnapshot,
    /// The member who sent it.
    pub author: MemberSnapshot,
    /// The channel it was sent in.
    pub channel: ChannelSnapshot,
    /// The guild it was sent in.
    pub guild: GuildSnapshot,
    /// Members mentioned in the message, in order of appearance.
    pub mentions: Vec<MemberSnapshot>,
    /// The raw text after the command name, unparsed.
    pub args_raw: String,
}

impl InvocationSnapshot {
    /// The argument text split on whitespace, the way the default `args`
    /// binding sees it.
    pub fn args_words(&self) -> Vec<&str> {
        self.args_raw.split_whitespace().collect()
    }
}

/// The triggering message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MessageSnapshot {
    #[allow(missing_docs)]
    pub id: String,
    /// Full message text, command prefix included.
    pub content: String,
}

/// A guild member.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MemberSnapshot {
    #[allow(missing_docs)]
    pub id: String,
    /// Account name.
    pub name: String,
    /// Per-guild nickname, when set.
    pub nick: Option<String>,
    /// Role ids held by the member.
    pub roles: Vec<String>,
    /// Whether the account is a bot.
    pub bot: bool,
}

/// A guild channel.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChannelSnapshot {
    #[allow(missing_docs)]
    pub id: String,
    #[allow(missing_docs)]
    pub name: String,
}

/// The guild itself.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GuildSnapshot {
    #[allow(missing_docs)]
    pub id: String,
    #[allow(missing_docs)]
    pub name: String,
}
