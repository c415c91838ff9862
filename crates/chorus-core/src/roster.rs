use serde::{Deserialize, Serialize};

use crate::ids::{GroupId, ParticipantId};

/// Personality marker the backend uses for its scheduling persona.
/// The misspelling is what the backend actually sends.
const SCHEDULER_PERSONALITIES: &[&str] = &["sheduler", "scheduler"];

/// Anyone who can author a message: the human user or a persona.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: ParticipantId,
    #[serde(rename = "name", alias = "displayName")]
    pub display_name: String,
    #[serde(default, rename = "avatar", alias = "avatarRef", skip_serializing_if = "Option::is_none")]
    pub avatar_ref: Option<String>,
}

impl Participant {
    pub fn new(id: impl Into<ParticipantId>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            avatar_ref: None,
        }
    }
}

/// A configured AI identity: who it is plus how the backend should run it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Persona {
    #[serde(flatten)]
    pub participant: Participant,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub personality: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_prompt: Option<String>,
    /// Knowledge-augmented personas are served from the RAG endpoint.
    #[serde(default)]
    pub rag: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub knowledge: Option<String>,
}

impl Persona {
    pub fn new(id: impl Into<ParticipantId>, name: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            participant: Participant::new(id, name),
            model: model.into(),
            personality: String::new(),
            custom_prompt: None,
            rag: false,
            knowledge: None,
        }
    }

    pub fn id(&self) -> &ParticipantId {
        &self.participant.id
    }

    pub fn name(&self) -> &str {
        &self.participant.display_name
    }

    pub fn is_scheduler(&self) -> bool {
        SCHEDULER_PERSONALITIES.contains(&self.personality.as_str())
    }

    /// The persona prompt with the group substituted in: `#groupName#` is
    /// replaced by the group name and the group description is appended.
    pub fn prompt_for(&self, group: &Group) -> String {
        let prompt = self
            .custom_prompt
            .as_deref()
            .unwrap_or_default()
            .replace("#groupName#", &group.name);
        format!("{prompt}\n{}", group.description.as_deref().unwrap_or_default())
    }
}

/// A chat group: its metadata and the ordered member list.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub members: Vec<ParticipantId>,
    /// Discussion mode: every unmuted persona answers and the scheduler is skipped.
    #[serde(default, alias = "isGroupDiscussionMode")]
    pub all_respond: bool,
}

/// Profile of the human user, as supplied by the session bootstrap.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    #[serde(default, alias = "nickname")]
    pub display_name: Option<String>,
    #[serde(default, alias = "avatar_url")]
    pub avatar: Option<String>,
}

/// Raw roster document handed over by the conversation roster source.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterDocument {
    pub group: Group,
    #[serde(alias = "characters")]
    pub personas: Vec<Persona>,
    #[serde(default)]
    pub user: Option<UserProfile>,
}

/// The fixed cast of one conversation: the group, its personas in member
/// order, and the human user.
#[derive(Clone, Debug)]
pub struct Roster {
    pub group: Group,
    pub personas: Vec<Persona>,
    pub user: Participant,
}

impl Roster {
    /// Resolve a roster document. Personas are ordered by the group's member
    /// list and scheduler personas are dropped. A group without a member list
    /// takes every persona in document order.
    pub fn resolve(doc: RosterDocument, default_user_name: &str) -> Self {
        let RosterDocument { group, personas, user } = doc;
        let candidates = personas.into_iter().filter(|p| !p.is_scheduler());

        let personas: Vec<Persona> = if group.members.is_empty() {
            candidates.collect()
        } else {
            let mut selected: Vec<Persona> =
                candidates.filter(|p| group.members.contains(p.id())).collect();
            selected.sort_by_key(|p| group.members.iter().position(|m| m == p.id()));
            selected
        };

        let user = user.unwrap_or_default();
        let user = Participant {
            id: ParticipantId::from(USER_PARTICIPANT_ID),
            display_name: user
                .display_name
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| default_user_name.to_string()),
            avatar_ref: user.avatar,
        };

        Self { group, personas, user }
    }

    pub fn persona(&self, id: &ParticipantId) -> Option<&Persona> {
        self.personas.iter().find(|p| p.id() == id)
    }

    pub fn participants(&self) -> impl Iterator<Item = &Participant> {
        self.personas.iter().map(|p| &p.participant)
    }
}

/// Reserved id of the human user within a conversation.
pub const USER_PARTICIPANT_ID: &str = "user";

#[cfg(test)]
mod tests {
    use super::*;

    fn doc() -> RosterDocument {
        serde_json::from_str(
            r#"{
                "group": {"id": 1, "name": "Salon", "description": "Friendly debate", "members": [3, 1, 2]},
                "characters": [
                    {"id": 1, "name": "Alice", "model": "m1", "personality": "kind"},
                    {"id": 2, "name": "Bob", "model": "m2", "personality": "blunt", "rag": true, "knowledge": "kb-1"},
                    {"id": 3, "name": "Carol", "model": "m3", "personality": "curious", "custom_prompt": "You are in #groupName#."},
                    {"id": 9, "name": "Router", "model": "m0", "personality": "sheduler"}
                ],
                "user": {"nickname": "Dana"}
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn resolve_orders_by_members_and_drops_scheduler() {
        let roster = Roster::resolve(doc(), "me");
        let names: Vec<&str> = roster.personas.iter().map(Persona::name).collect();
        assert_eq!(names, vec!["Carol", "Alice", "Bob"]);
        assert_eq!(roster.user.display_name, "Dana");
    }

    #[test]
    fn resolve_without_members_keeps_document_order() {
        let mut doc = doc();
        doc.group.members.clear();
        doc.user = None;
        let roster = Roster::resolve(doc, "me");
        let names: Vec<&str> = roster.personas.iter().map(Persona::name).collect();
        assert_eq!(names, vec!["Alice", "Bob", "Carol"]);
        assert_eq!(roster.user.display_name, "me");
    }

    #[test]
    fn prompt_substitutes_group() {
        let roster = Roster::resolve(doc(), "me");
        let carol = roster.persona(&ParticipantId::from(3)).unwrap();
        assert_eq!(carol.prompt_for(&roster.group), "You are in Salon.\nFriendly debate");

        let alice = roster.persona(&ParticipantId::from(1)).unwrap();
        assert_eq!(alice.prompt_for(&roster.group), "\nFriendly debate");
    }

    #[test]
    fn rag_flags_deserialize() {
        let roster = Roster::resolve(doc(), "me");
        let bob = roster.persona(&"2".into()).unwrap();
        assert!(bob.rag);
        assert_eq!(bob.knowledge.as_deref(), Some("kb-1"));
    }

    #[test]
    fn discussion_mode_alias() {
        let group: Group =
            serde_json::from_str(r#"{"id":"g","name":"G","isGroupDiscussionMode":true}"#).unwrap();
        assert!(group.all_respond);
    }
}
