use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display};

/// The author of a message in the caller's flat history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
    /// Any role we don't recognise, treated like a user prompt
    #[serde(other)]
    Other,
}
